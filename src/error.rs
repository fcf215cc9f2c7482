/*!
 * Error types for the plugin host
 */

use plugin_connect::ConnectError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_UNHEALTHY: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration file could not be read
    #[error("Failed to read configuration file {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration file is not valid TOML for the host
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No `[plugin.<id>]` table with this id
    #[error("Plugin not configured: {0}")]
    UnknownPlugin(String),

    /// Building a descriptor or registering a plugin failed
    #[error(transparent)]
    Connect(#[from] ConnectError),
}
