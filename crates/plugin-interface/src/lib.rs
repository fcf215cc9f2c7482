//! Plugin Interface: the capability surface a backend plugin offers the host
//!
//! This crate defines the traits the host's plugin registry talks to. A plugin
//! may live in-process or in a separate process behind a gRPC connection; the
//! host cannot tell the difference.
//!
//! # Architecture
//!
//! - **PluginCapabilities**: the seven forwarded operations (metrics, health,
//!   query, resource call, stream subscribe/publish/run)
//! - **BackendPlugin**: lifecycle on top of the capabilities (start, stop,
//!   liveness, decommissioning)
//! - **CallResourceResponseSender / StreamSender**: caller-supplied sinks for
//!   operations that answer with more than one message
//!
//! # Example
//!
//! ```rust,no_run
//! use plugin_interface::{BackendPlugin, CheckHealthRequest, HealthStatus};
//!
//! async fn is_healthy<P: BackendPlugin>(plugin: &P) -> plugin_interface::Result<bool> {
//!     if plugin.is_decommissioned() || plugin.exited().await {
//!         return Ok(false);
//!     }
//!
//!     let result = plugin.check_health(CheckHealthRequest::default()).await?;
//!     Ok(result.status() == HealthStatus::Ok)
//! }
//! ```

use async_trait::async_trait;
use thiserror::Error;

pub use plugin_proto::{
    CallResourceRequest, CallResourceResponse, CheckHealthRequest, CheckHealthResponse,
    CollectMetricsRequest, CollectMetricsResponse, DataQuery, DataResponse, HealthStatus,
    PluginContext, PublishStreamRequest, PublishStreamResponse, PublishStreamStatus,
    QueryDataRequest, QueryDataResponse, RunStreamRequest, StreamPacket, StringList,
    SubscribeStreamRequest, SubscribeStreamResponse, SubscribeStreamStatus, TimeRange,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PluginError {
    /// No usable client: the plugin was never started, was stopped, or its
    /// channel has shut down. Retrying is the host's decision.
    #[error("plugin unavailable")]
    Unavailable,

    #[error("unable to establish connection with remote plugin")]
    Connection(#[source] BoxError),

    #[error("failed to create plugin client")]
    ClientConstruction(#[source] BoxError),

    #[error("failed to close plugin connection")]
    Close(#[source] BoxError),

    #[error(transparent)]
    Rpc(#[from] tonic::Status),

    #[error("failed to deliver plugin response: {0}")]
    Send(String),
}

impl PluginError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PluginError::Unavailable)
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;

/// Receives the response messages of a resource call.
#[async_trait]
pub trait CallResourceResponseSender: Send + Sync {
    async fn send(&self, response: CallResourceResponse) -> Result<()>;
}

/// Receives the packets of a running stream.
#[async_trait]
pub trait StreamSender: Send + Sync {
    async fn send(&self, packet: StreamPacket) -> Result<()>;
}

#[async_trait]
impl CallResourceResponseSender for tokio::sync::mpsc::Sender<CallResourceResponse> {
    async fn send(&self, response: CallResourceResponse) -> Result<()> {
        tokio::sync::mpsc::Sender::send(self, response)
            .await
            .map_err(|e| PluginError::Send(e.to_string()))
    }
}

#[async_trait]
impl StreamSender for tokio::sync::mpsc::Sender<StreamPacket> {
    async fn send(&self, packet: StreamPacket) -> Result<()> {
        tokio::sync::mpsc::Sender::send(self, packet)
            .await
            .map_err(|e| PluginError::Send(e.to_string()))
    }
}

/// The operations a backend plugin exposes to the host.
///
/// Implementations forward requests and responses unchanged. Cancellation is
/// expressed by dropping the returned future; deadlines belong to the caller.
#[async_trait]
pub trait PluginCapabilities: Send + Sync {
    async fn collect_metrics(&self, req: CollectMetricsRequest) -> Result<CollectMetricsResponse>;

    async fn check_health(&self, req: CheckHealthRequest) -> Result<CheckHealthResponse>;

    async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse>;

    /// Streams every response message of the call into `sender`.
    async fn call_resource(
        &self,
        req: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()>;

    async fn subscribe_stream(&self, req: SubscribeStreamRequest)
        -> Result<SubscribeStreamResponse>;

    async fn publish_stream(&self, req: PublishStreamRequest) -> Result<PublishStreamResponse>;

    /// Streams every packet into `sender` until the plugin ends the stream.
    async fn run_stream(&self, req: RunStreamRequest, sender: &dyn StreamSender) -> Result<()>;
}

/// A plugin as seen by the host's registry.
#[async_trait]
pub trait BackendPlugin: PluginCapabilities {
    fn plugin_id(&self) -> &str;

    async fn start(&self) -> Result<()>;

    /// Idempotent: stopping a stopped plugin succeeds.
    async fn stop(&self) -> Result<()>;

    /// Whether the host drives this plugin's lifecycle.
    fn is_managed(&self) -> bool;

    /// Liveness check polled by the host to detect a crashed or closed plugin.
    async fn exited(&self) -> bool;

    /// Retires the plugin from new dispatch. The flag is never cleared.
    fn decommission(&self) -> Result<()>;

    fn is_decommissioned(&self) -> bool;
}
