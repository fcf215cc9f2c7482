/*!
 * Configuration types for the plugin host
 */

use crate::error::{HostError, Result};
use plugin_connect::{PluginDescriptor, TlsSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level host configuration, loaded from TOML
///
/// ```toml
/// [log]
/// level = "debug"
///
/// [plugin.my-datasource]
/// remote_server_addr = "10.0.0.5:10000"
/// remote_server_tls_enabled = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub log: LogConfig,

    /// Raw `[plugin.<id>]` tables keyed by plugin id
    #[serde(default)]
    pub plugin: BTreeMap<String, toml::Table>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum log level
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Connection options for a plugin served by another process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemotePluginOpts {
    /// `host:port` or a full URI; empty means the plugin is not remote
    #[serde(rename = "remote_server_addr", default)]
    pub address: String,

    #[serde(rename = "remote_server_tls_enabled", default)]
    pub tls_enabled: bool,

    #[serde(rename = "remote_server_tls_ca_file", default)]
    pub ca_file: Option<PathBuf>,

    #[serde(rename = "remote_server_tls_cert_file", default)]
    pub cert_file: Option<PathBuf>,

    #[serde(rename = "remote_server_tls_key_file", default)]
    pub key_file: Option<PathBuf>,

    #[serde(rename = "remote_server_tls_insecure_skip_verify", default)]
    pub insecure_skip_verify: bool,

    #[serde(rename = "remote_server_tls_server_name", default)]
    pub server_name: Option<String>,
}

impl RemotePluginOpts {
    /// Build the dial descriptor, loading TLS material from disk when TLS is enabled
    pub fn descriptor(&self, plugin_id: &str) -> Result<PluginDescriptor> {
        let descriptor = PluginDescriptor::new(plugin_id, self.address.trim());

        if !self.tls_enabled {
            return Ok(descriptor);
        }

        let mut tls = TlsSettings::from_files(
            non_empty(&self.ca_file),
            non_empty(&self.cert_file),
            non_empty(&self.key_file),
        )?
        .with_insecure_skip_verify(self.insecure_skip_verify);

        if let Some(server_name) = self.server_name.as_deref().filter(|s| !s.is_empty()) {
            tls = tls.with_server_name(server_name);
        }

        Ok(descriptor.with_tls(tls))
    }
}

/// Unset keys and `key = ""` both mean no file.
fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

impl HostConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| HostError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Ids of every configured plugin, sorted
    pub fn plugin_ids(&self) -> Vec<&str> {
        self.plugin.keys().map(String::as_str).collect()
    }

    /// Plain string settings of one plugin
    ///
    /// Scalars are rendered as strings; nested tables and arrays are skipped.
    pub fn plugin_settings(&self, plugin_id: &str) -> Option<BTreeMap<String, String>> {
        let table = self.plugin.get(plugin_id)?;

        let settings = table
            .iter()
            .filter_map(|(key, value)| {
                let rendered = match value {
                    toml::Value::String(s) => s.clone(),
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    toml::Value::Datetime(d) => d.to_string(),
                    toml::Value::Array(_) | toml::Value::Table(_) => return None,
                };
                Some((key.clone(), rendered))
            })
            .collect();

        Some(settings)
    }

    /// Remote options of every plugin with a non-empty `remote_server_addr`
    pub fn remote_plugins(&self) -> Result<BTreeMap<String, RemotePluginOpts>> {
        let mut remotes = BTreeMap::new();

        for (plugin_id, table) in &self.plugin {
            let opts: RemotePluginOpts = toml::Value::Table(table.clone()).try_into()?;
            if opts.address.trim().is_empty() {
                continue;
            }
            remotes.insert(plugin_id.clone(), opts);
        }

        Ok(remotes)
    }

    /// Descriptor for one remote plugin
    pub fn descriptor(&self, plugin_id: &str) -> Result<PluginDescriptor> {
        let remotes = self.remote_plugins()?;
        let opts = remotes
            .get(plugin_id)
            .ok_or_else(|| HostError::UnknownPlugin(plugin_id.to_string()))?;
        opts.descriptor(plugin_id)
    }
}
