//! TLS material used to secure the connection to a remote plugin

use crate::error::ConnectError;
use std::fmt;
use std::path::Path;

/// Client certificate and private key presented to the plugin (mutual TLS).
#[derive(Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// TLS settings for one remote plugin.
///
/// Verification of the server certificate is on unless
/// `insecure_skip_verify` is set explicitly.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// CA bundle used to verify the plugin. `None` means the public webpki roots.
    pub ca_certificate: Option<Vec<u8>>,
    pub client_identity: Option<ClientIdentity>,
    /// Overrides the name checked against the server certificate.
    pub server_name: Option<String>,
    pub insecure_skip_verify: bool,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field(
                "ca_certificate",
                &self.ca_certificate.as_ref().map(|pem| pem.len()),
            )
            .field("client_identity", &self.client_identity)
            .field("server_name", &self.server_name)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

impl TlsSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_certificate(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_certificate = Some(pem.into());
        self
    }

    pub fn with_client_identity(
        mut self,
        cert_pem: impl Into<Vec<u8>>,
        key_pem: impl Into<Vec<u8>>,
    ) -> Self {
        self.client_identity = Some(ClientIdentity {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        });
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    pub fn with_insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Load PEM material from disk.
    ///
    /// The client certificate and key must be given together.
    pub fn from_files(
        ca_file: Option<&Path>,
        cert_file: Option<&Path>,
        key_file: Option<&Path>,
    ) -> Result<Self, ConnectError> {
        let mut settings = Self::new();

        if let Some(path) = ca_file {
            settings.ca_certificate = Some(read_pem(path)?);
        }

        settings.client_identity = match (cert_file, key_file) {
            (Some(cert), Some(key)) => Some(ClientIdentity {
                cert_pem: read_pem(cert)?,
                key_pem: read_pem(key)?,
            }),
            (None, None) => None,
            _ => {
                return Err(ConnectError::Tls(
                    "client certificate and key must be configured together".to_string(),
                ))
            }
        };

        Ok(settings)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ConnectError> {
    let contents = std::fs::read(path).map_err(|source| ConnectError::Certificate {
        path: path.to_path_buf(),
        source,
    })?;

    if !contents
        .windows(PEM_MARKER.len())
        .any(|window| window == PEM_MARKER)
    {
        return Err(ConnectError::Tls(format!(
            "{} does not contain PEM data",
            path.display()
        )));
    }

    Ok(contents)
}

const PEM_MARKER: &[u8] = b"-----BEGIN ";
