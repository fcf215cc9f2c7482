//! Error types for the plugin-connect crate

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Invalid plugin address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Failed to read TLS material from {path:?}: {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build plugin client: {0}")]
    Client(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
