//! The seam between `RemotePlugin` and the RPC transport
//!
//! `Transport` dials channels and builds typed clients on them; `PluginChannel`
//! reports connectivity and is closed exactly once. `TonicTransport` is the
//! production implementation; `crate::testing` provides fakes.

use crate::client::GrpcPluginClient;
use crate::error::ConnectError;
use crate::tls::TlsSettings;
use crate::unverified::UnverifiedTlsConnector;
use plugin_interface::PluginCapabilities;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::debug;

/// Self-reported health of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectivityState {
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    TransientFailure = 3,
    /// Terminal: the channel was closed and will never carry another call.
    Shutdown = 4,
}

impl ConnectivityState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectivityState::Idle,
            1 => ConnectivityState::Connecting,
            2 => ConnectivityState::Ready,
            3 => ConnectivityState::TransientFailure,
            _ => ConnectivityState::Shutdown,
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectivityState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Shared connectivity state of one channel.
///
/// Clones observe the same state. Once `Shutdown` is recorded it never changes.
#[derive(Debug, Clone)]
pub struct ConnectivityCell(Arc<AtomicU8>);

impl ConnectivityCell {
    pub fn new(state: ConnectivityState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> ConnectivityState {
        ConnectivityState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectivityState) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == ConnectivityState::Shutdown as u8 {
                    None
                } else {
                    Some(state as u8)
                }
            });
    }
}

impl Default for ConnectivityCell {
    fn default() -> Self {
        Self::new(ConnectivityState::Idle)
    }
}

/// Credentials a channel is dialed with.
#[derive(Debug, Clone, PartialEq)]
pub enum DialCredentials {
    /// No transport security. Only for plugins on a trusted network or socket.
    Insecure,
    Tls(TlsSettings),
}

impl DialCredentials {
    pub fn is_tls(&self) -> bool {
        matches!(self, DialCredentials::Tls(_))
    }
}

/// A live network channel to a plugin.
pub trait PluginChannel: Send + Sync + 'static {
    fn connectivity_state(&self) -> ConnectivityState;

    /// Release the channel. Consuming `self` makes a double close unrepresentable.
    fn close(self) -> Result<(), ConnectError>
    where
        Self: Sized;
}

/// Dials plugin channels and builds typed clients on top of them.
pub trait Transport: Send + Sync + 'static {
    type Channel: PluginChannel;

    /// Must not block on the network: failures reflect address or credential
    /// validation only.
    fn dial(
        &self,
        address: &str,
        credentials: &DialCredentials,
    ) -> Result<Self::Channel, ConnectError>;

    fn new_client(
        &self,
        channel: &Self::Channel,
    ) -> Result<Arc<dyn PluginCapabilities>, ConnectError>;
}

/// gRPC transport backed by tonic.
///
/// Channels are created with `connect_lazy`, so the TCP and TLS handshakes
/// happen on first use and tonic reconnects on its own afterwards.
#[derive(Debug, Clone, Default)]
pub struct TonicTransport {
    connect_timeout: Option<Duration>,
}

impl TonicTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each (re)connection attempt made on behalf of a call.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Transport for TonicTransport {
    type Channel = TonicChannel;

    fn dial(
        &self,
        address: &str,
        credentials: &DialCredentials,
    ) -> Result<TonicChannel, ConnectError> {
        // Skip-verify channels run their own TLS handshake over a plain
        // `http` endpoint.
        let unverified = match credentials {
            DialCredentials::Tls(tls) if tls.insecure_skip_verify => Some(tls),
            _ => None,
        };

        let uri = match unverified {
            Some(_) => endpoint_uri(address.strip_prefix("https://").unwrap_or(address), false),
            None => endpoint_uri(address, credentials.is_tls()),
        };

        let mut endpoint =
            Endpoint::from_shared(uri).map_err(|e| ConnectError::InvalidAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        let channel = match (unverified, credentials) {
            (Some(tls), _) => {
                debug!("Dialing {} (lazy, unverified TLS)", endpoint.uri());
                endpoint.connect_with_connector_lazy(UnverifiedTlsConnector::new(tls)?)
            }
            (None, DialCredentials::Tls(tls)) => {
                let endpoint = endpoint.tls_config(client_tls_config(tls))?;
                debug!("Dialing {} (lazy)", endpoint.uri());
                endpoint.connect_lazy()
            }
            (None, DialCredentials::Insecure) => {
                debug!("Dialing {} (lazy)", endpoint.uri());
                endpoint.connect_lazy()
            }
        };

        Ok(TonicChannel {
            channel,
            state: ConnectivityCell::new(ConnectivityState::Idle),
            closed: CancellationToken::new(),
        })
    }

    fn new_client(
        &self,
        channel: &TonicChannel,
    ) -> Result<Arc<dyn PluginCapabilities>, ConnectError> {
        Ok(Arc::new(GrpcPluginClient::new(
            channel.channel.clone(),
            channel.state.clone(),
            channel.closed.clone(),
        )))
    }
}

/// A tonic channel plus the connectivity state its clients report into.
///
/// Closing cancels `closed`, which every client built on the channel watches:
/// unary calls and stream drains still in progress end with `Cancelled`.
#[derive(Debug)]
pub struct TonicChannel {
    channel: Channel,
    state: ConnectivityCell,
    closed: CancellationToken,
}

impl PluginChannel for TonicChannel {
    fn connectivity_state(&self) -> ConnectivityState {
        self.state.get()
    }

    fn close(self) -> Result<(), ConnectError> {
        self.state.set(ConnectivityState::Shutdown);
        self.closed.cancel();
        drop(self.channel);
        Ok(())
    }
}

/// Plugin addresses are usually bare `host:port`; tonic wants a URI.
fn endpoint_uri(address: &str, tls: bool) -> String {
    if address.contains("://") {
        address.to_string()
    } else if tls {
        format!("https://{}", address)
    } else {
        format!("http://{}", address)
    }
}

fn client_tls_config(tls: &TlsSettings) -> ClientTlsConfig {
    let mut config = match &tls.ca_certificate {
        Some(pem) => ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem)),
        None => ClientTlsConfig::new().with_webpki_roots(),
    };

    if let Some(identity) = &tls.client_identity {
        config = config.identity(Identity::from_pem(&identity.cert_pem, &identity.key_pem));
    }

    if let Some(server_name) = &tls.server_name {
        config = config.domain_name(server_name.clone());
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uri_adds_scheme() {
        assert_eq!(endpoint_uri("localhost:10000", false), "http://localhost:10000");
        assert_eq!(endpoint_uri("localhost:10000", true), "https://localhost:10000");
        assert_eq!(
            endpoint_uri("http://127.0.0.1:10000", true),
            "http://127.0.0.1:10000"
        );
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let cell = ConnectivityCell::default();
        assert_eq!(cell.get(), ConnectivityState::Idle);

        cell.set(ConnectivityState::Ready);
        assert_eq!(cell.get(), ConnectivityState::Ready);

        cell.set(ConnectivityState::Shutdown);
        cell.set(ConnectivityState::Ready);
        assert_eq!(cell.get(), ConnectivityState::Shutdown);
    }

    #[tokio::test]
    async fn test_tonic_dial_is_lazy_and_close_shuts_down() {
        // Nothing listens here; a lazy dial must still succeed.
        let transport = TonicTransport::new();
        let channel = transport
            .dial("127.0.0.1:1", &DialCredentials::Insecure)
            .unwrap();

        assert_eq!(channel.connectivity_state(), ConnectivityState::Idle);

        let state = channel.state.clone();
        channel.close().unwrap();
        assert_eq!(state.get(), ConnectivityState::Shutdown);
    }

    #[tokio::test]
    async fn test_connect_timeout_bounds_failed_handshake() {
        let transport = TonicTransport::new().with_connect_timeout(Duration::from_millis(200));
        let channel = transport
            .dial("127.0.0.1:1", &DialCredentials::Insecure)
            .unwrap();
        let client = transport.new_client(&channel).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            client.check_health(Default::default()),
        )
        .await;

        assert!(matches!(result, Ok(Err(_))));
    }

    #[tokio::test]
    async fn test_tonic_dial_rejects_invalid_address() {
        let transport = TonicTransport::new();
        let result = transport.dial("not a valid address", &DialCredentials::Insecure);

        assert!(matches!(result, Err(ConnectError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn test_skip_verify_dial_is_lazy() {
        let transport = TonicTransport::new();
        let credentials =
            DialCredentials::Tls(TlsSettings::new().with_insecure_skip_verify(true));

        let channel = transport.dial("https://127.0.0.1:1", &credentials).unwrap();
        assert_eq!(channel.connectivity_state(), ConnectivityState::Idle);
        channel.close().unwrap();
    }

    #[tokio::test]
    async fn test_skip_verify_rejects_bad_server_name() {
        let transport = TonicTransport::new();
        let credentials = DialCredentials::Tls(
            TlsSettings::new()
                .with_insecure_skip_verify(true)
                .with_server_name("bad name!"),
        );

        let result = transport.dial("127.0.0.1:1", &credentials);
        assert!(matches!(result, Err(ConnectError::Tls(_))));
    }

    #[tokio::test]
    async fn test_close_cancels_client_calls() {
        let transport = TonicTransport::new();
        let channel = transport
            .dial("127.0.0.1:1", &DialCredentials::Insecure)
            .unwrap();
        let client = transport.new_client(&channel).unwrap();

        channel.close().unwrap();

        match client.check_health(Default::default()).await {
            Err(plugin_interface::PluginError::Rpc(status)) => {
                assert_eq!(status.code(), tonic::Code::Cancelled)
            }
            other => panic!("expected cancelled call, got {:?}", other),
        }
    }

    #[test]
    fn test_display_matches_grpc_names() {
        assert_eq!(ConnectivityState::TransientFailure.to_string(), "TRANSIENT_FAILURE");
        assert_eq!(ConnectivityState::Shutdown.to_string(), "SHUTDOWN");
    }
}
