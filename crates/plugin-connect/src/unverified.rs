//! TLS dialing for plugins configured with `insecure_skip_verify`
//!
//! tonic's own TLS layer always verifies the server, so these channels are
//! dialed through a custom connector: plain TCP, then a rustls handshake whose
//! certificate verifier accepts any server certificate. Handshake signatures
//! are still checked, and a client identity is still presented when configured.

use crate::error::ConnectError;
use crate::tls::TlsSettings;
use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tonic::codegen::http::Uri;
use tower::Service;

/// Accepts every server certificate.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// rustls client configuration that skips server verification and speaks h2.
pub(crate) fn client_config(tls: &TlsSettings) -> Result<ClientConfig, ConnectError> {
    let provider = Arc::new(crypto::ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }));

    let mut config = match &tls.client_identity {
        Some(identity) => {
            let certs = CertificateDer::pem_slice_iter(&identity.cert_pem)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConnectError::Tls(format!("invalid client certificate: {:?}", e)))?;
            let key = PrivateKeyDer::from_pem_slice(&identity.key_pem)
                .map_err(|e| ConnectError::Tls(format!("invalid client key: {:?}", e)))?;

            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ConnectError::Tls(e.to_string()))?
        }
        None => builder.with_no_client_auth(),
    };

    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}

/// Connector handed to `Endpoint::connect_with_connector_lazy`.
///
/// The endpoint URI carries the `http` scheme so tonic does not layer its own
/// TLS on top; this connector performs the handshake itself.
#[derive(Clone)]
pub(crate) struct UnverifiedTlsConnector {
    connector: TlsConnector,
    server_name: Option<ServerName<'static>>,
}

impl UnverifiedTlsConnector {
    pub(crate) fn new(tls: &TlsSettings) -> Result<Self, ConnectError> {
        let server_name = match tls.server_name.as_deref() {
            Some(name) => Some(
                ServerName::try_from(name)
                    .map_err(|e| ConnectError::Tls(format!("invalid server name {}: {}", name, e)))?
                    .to_owned(),
            ),
            None => None,
        };

        Ok(Self {
            connector: TlsConnector::from(Arc::new(client_config(tls)?)),
            server_name,
        })
    }
}

impl Service<Uri> for UnverifiedTlsConnector {
    type Response = TokioIo<TlsStream<TcpStream>>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connector = self.connector.clone();
        let server_name = self.server_name.clone();

        Box::pin(async move {
            let host = uri
                .host()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "plugin address has no host")
                })?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            let port = uri.port_u16().unwrap_or(443);

            let server_name = match server_name {
                Some(name) => name,
                None => ServerName::try_from(host.as_str())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
                    .to_owned(),
            };

            let tcp = TcpStream::connect((host.as_str(), port)).await?;
            tcp.set_nodelay(true)?;

            let stream = connector.connect(server_name, tcp).await?;
            Ok(TokioIo::new(stream))
        })
    }
}
