//! Identity and connection parameters of a remote plugin

use crate::tls::TlsSettings;

/// Immutable description of one remote plugin.
///
/// `tls` of `None` selects an unencrypted channel, meant for plugins on a
/// trusted local network or socket.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    plugin_id: String,
    address: String,
    tls: Option<TlsSettings>,
}

impl PluginDescriptor {
    /// Create a descriptor for a plugin reachable at `address` (e.g. "10.0.0.5:10000")
    pub fn new(plugin_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            address: address.into(),
            tls: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn tls(&self) -> Option<&TlsSettings> {
        self.tls.as_ref()
    }
}
