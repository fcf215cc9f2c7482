//! GrpcPluginClient: `PluginCapabilities` over the `pluginv2` gRPC services

use crate::transport::{ConnectivityCell, ConnectivityState};
use async_trait::async_trait;
use plugin_interface::{
    CallResourceRequest, CallResourceResponseSender, CheckHealthRequest, CheckHealthResponse,
    CollectMetricsRequest, CollectMetricsResponse, PluginCapabilities, PluginError,
    PublishStreamRequest, PublishStreamResponse, QueryDataRequest, QueryDataResponse, Result,
    RunStreamRequest, StreamSender, SubscribeStreamRequest, SubscribeStreamResponse,
};
use plugin_proto::{DataClient, DiagnosticsClient, ResourceClient, StreamClient};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::{Code, Response, Status};
use tracing::debug;

/// Typed client for one remote plugin.
///
/// This struct is cheaply cloneable (internally uses Arc via tonic's Channel).
/// Every call reports its outcome into the channel's `ConnectivityCell`, which
/// is how runtime connectivity loss becomes visible to the proxy. Once `closed`
/// is cancelled, calls and stream drains end with a `Cancelled` status.
#[derive(Debug, Clone)]
pub struct GrpcPluginClient {
    data: DataClient<Channel>,
    diagnostics: DiagnosticsClient<Channel>,
    resource: ResourceClient<Channel>,
    stream: StreamClient<Channel>,
    state: ConnectivityCell,
    closed: CancellationToken,
}

impl GrpcPluginClient {
    pub fn new(channel: Channel, state: ConnectivityCell, closed: CancellationToken) -> Self {
        Self {
            data: DataClient::new(channel.clone()),
            diagnostics: DiagnosticsClient::new(channel.clone()),
            resource: ResourceClient::new(channel.clone()),
            stream: StreamClient::new(channel),
            state,
            closed,
        }
    }

    async fn until_closed<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                Err(PluginError::Rpc(Status::cancelled("plugin connection closed")))
            }
            result = call => result,
        }
    }

    fn observe<T>(&self, result: std::result::Result<Response<T>, Status>) -> Result<T> {
        match result {
            Ok(response) => {
                self.state.set(ConnectivityState::Ready);
                Ok(response.into_inner())
            }
            Err(status) => {
                if status.code() == Code::Unavailable {
                    self.state.set(ConnectivityState::TransientFailure);
                }
                Err(PluginError::Rpc(status))
            }
        }
    }
}

#[async_trait]
impl PluginCapabilities for GrpcPluginClient {
    async fn collect_metrics(&self, req: CollectMetricsRequest) -> Result<CollectMetricsResponse> {
        self.until_closed(async {
            let result = self.diagnostics.clone().collect_metrics(req).await;
            self.observe(result)
        })
        .await
    }

    async fn check_health(&self, req: CheckHealthRequest) -> Result<CheckHealthResponse> {
        self.until_closed(async {
            let result = self.diagnostics.clone().check_health(req).await;
            self.observe(result)
        })
        .await
    }

    async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse> {
        debug!("Forwarding {} queries", req.queries.len());
        self.until_closed(async {
            let result = self.data.clone().query_data(req).await;
            self.observe(result)
        })
        .await
    }

    async fn call_resource(
        &self,
        req: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        self.until_closed(async {
            let result = self.resource.clone().call_resource(req).await;
            let mut stream = self.observe(result)?;

            while let Some(response) = stream.message().await? {
                sender.send(response).await?;
            }

            Ok(())
        })
        .await
    }

    async fn subscribe_stream(
        &self,
        req: SubscribeStreamRequest,
    ) -> Result<SubscribeStreamResponse> {
        self.until_closed(async {
            let result = self.stream.clone().subscribe_stream(req).await;
            self.observe(result)
        })
        .await
    }

    async fn publish_stream(&self, req: PublishStreamRequest) -> Result<PublishStreamResponse> {
        self.until_closed(async {
            let result = self.stream.clone().publish_stream(req).await;
            self.observe(result)
        })
        .await
    }

    async fn run_stream(&self, req: RunStreamRequest, sender: &dyn StreamSender) -> Result<()> {
        self.until_closed(async {
            let result = self.stream.clone().run_stream(req).await;
            let mut stream = self.observe(result)?;

            while let Some(packet) = stream.message().await? {
                sender.send(packet).await?;
            }

            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DialCredentials, PluginChannel, TonicTransport, Transport};

    #[test]
    fn test_grpc_plugin_client_is_send_sync() {
        // Compile-time check that GrpcPluginClient satisfies trait bounds
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GrpcPluginClient>();
    }

    #[tokio::test]
    async fn test_unreachable_plugin_surfaces_forwarded_error() {
        let transport = TonicTransport::new();
        let channel = transport
            .dial("127.0.0.1:1", &DialCredentials::Insecure)
            .unwrap();
        let client = transport.new_client(&channel).unwrap();

        let result = client.check_health(CheckHealthRequest::default()).await;

        // Lazy channels report the failed handshake on the call itself.
        assert!(matches!(result, Err(PluginError::Rpc(_))));
        assert_ne!(channel.connectivity_state(), ConnectivityState::Shutdown);
    }
}
