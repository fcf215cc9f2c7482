//! Plugin Connect: client-side gRPC connectivity for remote backend plugins
//!
//! This crate lets the host treat a plugin running in another process, reachable
//! only over the network, exactly like an in-process plugin.
//!
//! # Architecture
//!
//! - **ConnectionFactory**: dials the plugin address with insecure or TLS credentials
//! - **RemotePlugin**: implements `BackendPlugin` by proxying to the remote plugin via gRPC
//! - **PluginRegistry**: the set of plugins available for dispatch
//! - **Transport / PluginChannel**: the seam between the proxy and the RPC transport,
//!   implemented by `TonicTransport` and by the fakes in [`testing`]
//!
//! # Example
//!
//! ```rust,no_run
//! use plugin_connect::{PluginDescriptor, RemotePlugin};
//! use plugin_interface::{BackendPlugin, CheckHealthRequest, PluginCapabilities};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let descriptor = PluginDescriptor::new("my-datasource", "10.0.0.5:10000");
//!     let plugin = RemotePlugin::new(descriptor);
//!
//!     plugin.start().await?;
//!     let health = plugin.check_health(CheckHealthRequest::default()).await?;
//!     println!("{}: {}", plugin.plugin_id(), health.message);
//!     plugin.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod privilege;
pub mod registry;
pub mod remote;
pub mod testing;
pub mod tls;
pub mod transport;
mod unverified;

pub use client::GrpcPluginClient;
pub use descriptor::PluginDescriptor;
pub use error::ConnectError;
pub use factory::ConnectionFactory;
pub use registry::PluginRegistry;
pub use remote::{ProxyState, RemotePlugin};
pub use tls::{ClientIdentity, TlsSettings};
pub use transport::{
    ConnectivityCell, ConnectivityState, DialCredentials, PluginChannel, TonicChannel,
    TonicTransport, Transport,
};
