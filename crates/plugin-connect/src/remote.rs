//! RemotePlugin: BackendPlugin implementation that proxies to a remote plugin via gRPC

use crate::descriptor::PluginDescriptor;
use crate::factory::ConnectionFactory;
use crate::privilege::warn_if_elevated;
use crate::transport::{ConnectivityState, PluginChannel, TonicTransport, Transport};
use async_trait::async_trait;
use plugin_interface::{
    BackendPlugin, CallResourceRequest, CallResourceResponseSender, CheckHealthRequest,
    CheckHealthResponse, CollectMetricsRequest, CollectMetricsResponse, PluginCapabilities,
    PluginError, PublishStreamRequest, PublishStreamResponse, QueryDataRequest,
    QueryDataResponse, Result, RunStreamRequest, StreamSender, SubscribeStreamRequest,
    SubscribeStreamResponse,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Lifecycle of the connection. Decommissioning is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    NotStarted,
    Started,
    Stopped,
}

/// Everything guarded by the proxy's lock.
///
/// Invariant: `client` is `Some` only while `channel` is `Some` and the last
/// `start` succeeded.
struct Connection<C> {
    state: ProxyState,
    channel: Option<C>,
    client: Option<Arc<dyn PluginCapabilities>>,
}

impl<C: PluginChannel> Connection<C> {
    fn new() -> Self {
        Self {
            state: ProxyState::NotStarted,
            channel: None,
            client: None,
        }
    }

    /// Drop the client and hand back the channel for closing.
    fn clear(&mut self) -> Option<C> {
        self.client = None;
        self.channel.take()
    }
}

/// A plugin running in another process, presented as an in-process `BackendPlugin`.
///
/// Capability calls resolve the current client under the read lock and release
/// it before the RPC is sent, so a slow call never holds up `start`, `stop` or
/// other callers.
///
/// # Example
///
/// ```rust,no_run
/// use plugin_connect::{PluginDescriptor, RemotePlugin};
/// use plugin_interface::{BackendPlugin, PluginCapabilities, QueryDataRequest};
///
/// # async fn example() -> anyhow::Result<()> {
/// let plugin = RemotePlugin::new(PluginDescriptor::new("my-datasource", "127.0.0.1:10000"));
/// plugin.start().await?;
///
/// let response = plugin.query_data(QueryDataRequest::default()).await?;
/// println!("{} responses", response.responses.len());
/// # Ok(())
/// # }
/// ```
pub struct RemotePlugin<T: Transport = TonicTransport> {
    factory: ConnectionFactory<T>,
    connection: RwLock<Connection<T::Channel>>,
    decommissioned: AtomicBool,
}

impl RemotePlugin<TonicTransport> {
    pub fn new(descriptor: PluginDescriptor) -> Self {
        Self::with_transport(descriptor, TonicTransport::new())
    }
}

impl<T: Transport> RemotePlugin<T> {
    pub fn with_transport(descriptor: PluginDescriptor, transport: T) -> Self {
        Self {
            factory: ConnectionFactory::new(descriptor, transport),
            connection: RwLock::new(Connection::new()),
            decommissioned: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        self.factory.descriptor()
    }

    pub async fn state(&self) -> ProxyState {
        self.connection.read().await.state
    }

    /// The client, if a connection exists, is not shut down, and a client was built.
    async fn plugin_client(&self) -> Option<Arc<dyn PluginCapabilities>> {
        let connection = self.connection.read().await;
        let channel = connection.channel.as_ref()?;

        if channel.connectivity_state() == ConnectivityState::Shutdown {
            return None;
        }

        connection.client.clone()
    }

    async fn usable_client(&self) -> Result<Arc<dyn PluginCapabilities>> {
        self.plugin_client().await.ok_or(PluginError::Unavailable)
    }
}

#[async_trait]
impl<T: Transport> PluginCapabilities for RemotePlugin<T> {
    async fn collect_metrics(&self, req: CollectMetricsRequest) -> Result<CollectMetricsResponse> {
        let client = self.usable_client().await?;
        client.collect_metrics(req).await
    }

    async fn check_health(&self, req: CheckHealthRequest) -> Result<CheckHealthResponse> {
        let client = self.usable_client().await?;
        client.check_health(req).await
    }

    async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse> {
        let client = self.usable_client().await?;
        client.query_data(req).await
    }

    async fn call_resource(
        &self,
        req: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        let client = self.usable_client().await?;
        client.call_resource(req, sender).await
    }

    async fn subscribe_stream(
        &self,
        req: SubscribeStreamRequest,
    ) -> Result<SubscribeStreamResponse> {
        let client = self.usable_client().await?;
        client.subscribe_stream(req).await
    }

    async fn publish_stream(&self, req: PublishStreamRequest) -> Result<PublishStreamResponse> {
        let client = self.usable_client().await?;
        client.publish_stream(req).await
    }

    async fn run_stream(&self, req: RunStreamRequest, sender: &dyn StreamSender) -> Result<()> {
        let client = self.usable_client().await?;
        client.run_stream(req, sender).await
    }
}

#[async_trait]
impl<T: Transport> BackendPlugin for RemotePlugin<T> {
    fn plugin_id(&self) -> &str {
        self.descriptor().plugin_id()
    }

    async fn start(&self) -> Result<()> {
        let mut connection = self.connection.write().await;

        // A repeated start re-dials; the previous channel must not leak.
        if let Some(previous) = connection.clear() {
            debug!("Replacing connection to remote plugin {}", self.plugin_id());
            if let Err(e) = previous.close() {
                warn!(
                    "Failed to close previous connection to remote plugin {}: {}",
                    self.plugin_id(),
                    e
                );
            }
        }
        connection.state = ProxyState::NotStarted;

        let channel = self.factory.connect().map_err(|e| {
            debug!("Dial of remote plugin {} failed: {}", self.plugin_id(), e);
            PluginError::Connection(Box::new(e))
        })?;

        let client = match self.factory.build_client(&channel) {
            Ok(client) => client,
            Err(e) => {
                if let Err(close_err) = channel.close() {
                    debug!(
                        "Failed to close channel after client construction error for {}: {}",
                        self.plugin_id(),
                        close_err
                    );
                }
                return Err(PluginError::ClientConstruction(Box::new(e)));
            }
        };

        connection.channel = Some(channel);
        connection.client = Some(client);
        connection.state = ProxyState::Started;
        drop(connection);

        info!(
            "Connected to remote plugin {} at {}",
            self.plugin_id(),
            self.descriptor().address()
        );

        warn_if_elevated(self.plugin_id());

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut connection = self.connection.write().await;

        let Some(channel) = connection.clear() else {
            return Ok(());
        };
        connection.state = ProxyState::Stopped;

        info!("Stopping remote plugin {}", self.plugin_id());

        channel
            .close()
            .map_err(|e| PluginError::Close(Box::new(e)))
    }

    fn is_managed(&self) -> bool {
        true
    }

    async fn exited(&self) -> bool {
        let connection = self.connection.read().await;
        match &connection.channel {
            Some(channel) => channel.connectivity_state() == ConnectivityState::Shutdown,
            None => true,
        }
    }

    fn decommission(&self) -> Result<()> {
        if !self.decommissioned.swap(true, Ordering::AcqRel) {
            info!("Decommissioning remote plugin {}", self.plugin_id());
        }
        Ok(())
    }

    fn is_decommissioned(&self) -> bool {
        self.decommissioned.load(Ordering::Acquire)
    }
}
