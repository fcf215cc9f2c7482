//! PluginRegistry: the set of backend plugins the host can dispatch to

use crate::error::ConnectError;
use plugin_interface::{BackendPlugin, PluginError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Central registry of backend plugins in the host
///
/// Responsibilities:
/// - Maintain the plugins known to the host, keyed by plugin ID
/// - Keep decommissioned plugins out of new dispatch
/// - Drive start/stop for every managed plugin
///
/// # Example
///
/// ```rust,no_run
/// use plugin_connect::{PluginDescriptor, PluginRegistry, RemotePlugin};
/// use plugin_interface::{CheckHealthRequest, PluginCapabilities};
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let registry = PluginRegistry::new();
///
/// let plugin = RemotePlugin::new(PluginDescriptor::new("my-datasource", "10.0.0.5:10000"));
/// registry.register(Arc::new(plugin)).await?;
/// registry.start_all().await;
///
/// if let Some(plugin) = registry.get("my-datasource").await {
///     let health = plugin.check_health(CheckHealthRequest::default()).await?;
///     println!("{}", health.message);
/// }
/// # Ok(())
/// # }
/// ```
pub struct PluginRegistry {
    plugins: Arc<RwLock<HashMap<String, Arc<dyn BackendPlugin>>>>,
}

impl PluginRegistry {
    /// Create a new empty PluginRegistry
    pub fn new() -> Self {
        Self {
            plugins: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a plugin. Registration does not start it.
    pub async fn register(&self, plugin: Arc<dyn BackendPlugin>) -> Result<(), ConnectError> {
        let plugin_id = plugin.plugin_id().to_string();

        let mut plugins = self.plugins.write().await;
        if plugins.contains_key(&plugin_id) {
            return Err(ConnectError::DuplicatePlugin(plugin_id));
        }

        info!("Registering plugin: {}", plugin_id);
        plugins.insert(plugin_id, plugin);
        Ok(())
    }

    /// Remove a plugin from the registry and stop it
    pub async fn unregister(&self, plugin_id: &str) -> Result<(), ConnectError> {
        info!("Unregistering plugin: {}", plugin_id);

        let plugin = {
            let mut plugins = self.plugins.write().await;
            plugins
                .remove(plugin_id)
                .ok_or_else(|| ConnectError::PluginNotFound(plugin_id.to_string()))?
        };

        if let Err(e) = plugin.stop().await {
            warn!("Failed to stop plugin {} while unregistering: {}", plugin_id, e);
        }

        Ok(())
    }

    /// Get a plugin for dispatch
    ///
    /// Decommissioned plugins are never handed out, even while they remain
    /// registered and connected.
    pub async fn get(&self, plugin_id: &str) -> Option<Arc<dyn BackendPlugin>> {
        let plugins = self.plugins.read().await;
        let plugin = plugins.get(plugin_id)?;

        if plugin.is_decommissioned() {
            debug!("Refusing dispatch to decommissioned plugin: {}", plugin_id);
            return None;
        }

        Some(plugin.clone())
    }

    /// Retire a plugin from new dispatch without disconnecting it
    pub async fn decommission(&self, plugin_id: &str) -> Result<(), ConnectError> {
        let plugin = {
            let plugins = self.plugins.read().await;
            plugins
                .get(plugin_id)
                .cloned()
                .ok_or_else(|| ConnectError::PluginNotFound(plugin_id.to_string()))?
        };

        plugin
            .decommission()
            .map_err(|e| ConnectError::Client(e.to_string()))
    }

    /// IDs of all registered plugins, sorted
    pub async fn list(&self) -> Vec<String> {
        let plugins = self.plugins.read().await;
        let mut ids: Vec<String> = plugins.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_registered(&self, plugin_id: &str) -> bool {
        let plugins = self.plugins.read().await;
        plugins.contains_key(plugin_id)
    }

    /// Start every managed plugin, returning the ones that failed
    pub async fn start_all(&self) -> Vec<(String, PluginError)> {
        let mut failures = Vec::new();

        for plugin in self.snapshot().await {
            if !plugin.is_managed() {
                continue;
            }

            if let Err(e) = plugin.start().await {
                warn!("Failed to start plugin {}: {}", plugin.plugin_id(), e);
                failures.push((plugin.plugin_id().to_string(), e));
            }
        }

        failures
    }

    /// Stop every plugin (but keep them registered)
    pub async fn stop_all(&self) {
        info!("Stopping all plugins");

        for plugin in self.snapshot().await {
            if let Err(e) = plugin.stop().await {
                warn!("Failed to stop plugin {}: {}", plugin.plugin_id(), e);
            }
        }
    }

    /// Lifecycle calls run outside the registry lock.
    async fn snapshot(&self) -> Vec<Arc<dyn BackendPlugin>> {
        let plugins = self.plugins.read().await;
        plugins.values().cloned().collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
