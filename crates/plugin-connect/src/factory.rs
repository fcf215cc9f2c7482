//! ConnectionFactory: dials a remote plugin with the credentials its descriptor asks for

use crate::descriptor::PluginDescriptor;
use crate::error::ConnectError;
use crate::transport::{DialCredentials, Transport};
use plugin_interface::PluginCapabilities;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ConnectionFactory<T: Transport> {
    descriptor: PluginDescriptor,
    transport: T,
}

impl<T: Transport> ConnectionFactory<T> {
    pub fn new(descriptor: PluginDescriptor, transport: T) -> Self {
        Self {
            descriptor,
            transport,
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Insecure when the descriptor carries no TLS settings, TLS otherwise.
    pub fn credentials(&self) -> DialCredentials {
        match self.descriptor.tls() {
            None => DialCredentials::Insecure,
            Some(tls) => DialCredentials::Tls(tls.clone()),
        }
    }

    /// Dial the plugin. Yields either a channel or an error, never both.
    pub fn connect(&self) -> Result<T::Channel, ConnectError> {
        let credentials = self.credentials();

        match &credentials {
            DialCredentials::Insecure => debug!(
                "Dialing remote plugin {} at {} without transport security",
                self.descriptor.plugin_id(),
                self.descriptor.address()
            ),
            DialCredentials::Tls(tls) => {
                if tls.insecure_skip_verify {
                    warn!(
                        "TLS certificate verification is disabled for remote plugin {}",
                        self.descriptor.plugin_id()
                    );
                }
                debug!(
                    "Dialing remote plugin {} at {} over TLS",
                    self.descriptor.plugin_id(),
                    self.descriptor.address()
                );
            }
        }

        self.transport
            .dial(self.descriptor.address(), &credentials)
    }

    pub fn build_client(
        &self,
        channel: &T::Channel,
    ) -> Result<Arc<dyn PluginCapabilities>, ConnectError> {
        self.transport.new_client(channel)
    }
}
