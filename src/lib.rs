/*!
 * Plugin Host - runs backend plugins that live in other processes
 *
 * Reads `[plugin.<id>]` tables from a TOML configuration, builds a
 * `RemotePlugin` for every plugin with a remote server address and
 * registers it with a `PluginRegistry` so the host can dispatch to it
 * exactly like an in-process plugin.
 */

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{HostConfig, LogConfig, LogLevel, RemotePluginOpts};
pub use error::{HostError, Result};

use plugin_connect::{PluginRegistry, RemotePlugin, TonicTransport};
use std::sync::Arc;
use tracing::info;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register a `RemotePlugin` for every remote plugin in the configuration
///
/// Plugins are registered but not started. Every plugin dials through a
/// clone of `transport`.
pub async fn register_remote_plugins(
    config: &HostConfig,
    registry: &PluginRegistry,
    transport: &TonicTransport,
) -> Result<Vec<String>> {
    let mut registered = Vec::new();

    for (plugin_id, opts) in config.remote_plugins()? {
        let descriptor = opts.descriptor(&plugin_id)?;
        info!(
            "Configured remote plugin {} at {} (tls: {})",
            plugin_id,
            descriptor.address(),
            descriptor.tls().is_some()
        );

        registry
            .register(Arc::new(RemotePlugin::with_transport(
                descriptor,
                transport.clone(),
            )))
            .await?;
        registered.push(plugin_id);
    }

    Ok(registered)
}
