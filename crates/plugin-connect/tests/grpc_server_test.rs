//! End-to-end tests against a plugin served by an in-process tonic server
//!
//! Each test binds an ephemeral port on 127.0.0.1 and serves the four
//! `pluginv2` services, then drives `RemotePlugin` or the raw tonic transport
//! against it over a real HTTP/2 connection.

use plugin_connect::{
    ConnectivityState, DialCredentials, PluginChannel, PluginDescriptor, RemotePlugin,
    TlsSettings, TonicTransport, Transport,
};
use plugin_interface::{
    BackendPlugin, CallResourceRequest, CallResourceResponse, CheckHealthRequest,
    CheckHealthResponse, CollectMetricsRequest, CollectMetricsResponse, DataResponse,
    HealthStatus, PluginCapabilities, PluginError, PublishStreamRequest, PublishStreamResponse,
    PublishStreamStatus, QueryDataRequest, QueryDataResponse, RunStreamRequest, StreamPacket,
    SubscribeStreamRequest, SubscribeStreamResponse, SubscribeStreamStatus,
};
use plugin_proto::pluginv2::data_server::{Data, DataServer};
use plugin_proto::pluginv2::diagnostics_server::{Diagnostics, DiagnosticsServer};
use plugin_proto::pluginv2::resource_server::{Resource, ResourceServer};
use plugin_proto::pluginv2::stream_server::{Stream, StreamServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tonic::{Code, Request, Response, Status};

const SERVER_PEM: &[u8] = include_bytes!("fixtures/server.pem");
const SERVER_KEY: &[u8] = include_bytes!("fixtures/server.key");

/// Packets served before a `RunStream` call ends, unless the path is `/live`.
const FINITE_PACKETS: usize = 3;

#[derive(Debug, Default, Clone)]
struct EchoPlugin;

#[tonic::async_trait]
impl Diagnostics for EchoPlugin {
    async fn check_health(
        &self,
        request: Request<CheckHealthRequest>,
    ) -> Result<Response<CheckHealthResponse>, Status> {
        let req = request.into_inner();
        if req.headers.contains_key("deny") {
            return Err(Status::permission_denied("health check denied"));
        }

        Ok(Response::new(CheckHealthResponse {
            status: HealthStatus::Ok as i32,
            message: "echo plugin is healthy".to_string(),
            json_details: Vec::new(),
        }))
    }

    async fn collect_metrics(
        &self,
        _request: Request<CollectMetricsRequest>,
    ) -> Result<Response<CollectMetricsResponse>, Status> {
        Ok(Response::new(CollectMetricsResponse {
            prometheus: b"echo_requests_total 7\n".to_vec(),
        }))
    }
}

#[tonic::async_trait]
impl Data for EchoPlugin {
    async fn query_data(
        &self,
        request: Request<QueryDataRequest>,
    ) -> Result<Response<QueryDataResponse>, Status> {
        let responses = request
            .into_inner()
            .queries
            .into_iter()
            .map(|query| {
                let response = DataResponse {
                    frames: vec![query.json],
                    ..Default::default()
                };
                (query.ref_id, response)
            })
            .collect();

        Ok(Response::new(QueryDataResponse { responses }))
    }
}

#[tonic::async_trait]
impl Resource for EchoPlugin {
    type CallResourceStream = ReceiverStream<Result<CallResourceResponse, Status>>;

    async fn call_resource(
        &self,
        request: Request<CallResourceRequest>,
    ) -> Result<Response<Self::CallResourceStream>, Status> {
        let req = request.into_inner();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            for chunk in req.body.chunks(4) {
                let response = CallResourceResponse {
                    code: 200,
                    body: chunk.to_vec(),
                    ..Default::default()
                };
                if tx.send(Ok(response)).await.is_err() {
                    return;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[tonic::async_trait]
impl Stream for EchoPlugin {
    type RunStreamStream = ReceiverStream<Result<StreamPacket, Status>>;

    async fn subscribe_stream(
        &self,
        request: Request<SubscribeStreamRequest>,
    ) -> Result<Response<SubscribeStreamResponse>, Status> {
        let req = request.into_inner();
        let status = if req.path == "/live" {
            SubscribeStreamStatus::Ok
        } else {
            SubscribeStreamStatus::NotFound
        };

        Ok(Response::new(SubscribeStreamResponse {
            status: status as i32,
            data: req.data,
        }))
    }

    async fn publish_stream(
        &self,
        _request: Request<PublishStreamRequest>,
    ) -> Result<Response<PublishStreamResponse>, Status> {
        Ok(Response::new(PublishStreamResponse {
            status: PublishStreamStatus::PermissionDenied as i32,
            data: Vec::new(),
        }))
    }

    async fn run_stream(
        &self,
        request: Request<RunStreamRequest>,
    ) -> Result<Response<Self::RunStreamStream>, Status> {
        let live = request.into_inner().path == "/live";
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let mut seq = 0usize;
            while live || seq < FINITE_PACKETS {
                let packet = StreamPacket {
                    data: seq.to_string().into_bytes(),
                };
                if tx.send(Ok(packet)).await.is_err() {
                    return;
                }
                seq += 1;
                if live {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

async fn serve(tls: bool) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let mut builder = Server::builder();
    if tls {
        builder = builder
            .tls_config(ServerTlsConfig::new().identity(Identity::from_pem(SERVER_PEM, SERVER_KEY)))?;
    }

    let router = builder
        .add_service(DiagnosticsServer::new(EchoPlugin))
        .add_service(DataServer::new(EchoPlugin))
        .add_service(ResourceServer::new(EchoPlugin))
        .add_service(StreamServer::new(EchoPlugin));

    let handle = tokio::spawn(async move {
        let _ = router
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    });

    Ok((addr, handle))
}

async fn started_plugin(addr: SocketAddr) -> Arc<RemotePlugin> {
    let plugin = Arc::new(RemotePlugin::new(PluginDescriptor::new(
        "echo-datasource",
        addr.to_string(),
    )));
    plugin.start().await.unwrap();
    plugin
}

#[tokio::test]
async fn test_every_operation_reaches_the_plugin() {
    let (addr, server) = serve(false).await.unwrap();
    let plugin = started_plugin(addr).await;

    let health = plugin.check_health(Default::default()).await.unwrap();
    assert_eq!(health.status, HealthStatus::Ok as i32);
    assert_eq!(health.message, "echo plugin is healthy");

    let metrics = plugin.collect_metrics(Default::default()).await.unwrap();
    assert_eq!(metrics.prometheus, b"echo_requests_total 7\n".to_vec());

    let query = QueryDataRequest {
        queries: vec![plugin_interface::DataQuery {
            ref_id: "A".to_string(),
            json: b"{\"expr\":\"up\"}".to_vec(),
            ..Default::default()
        }],
        ..Default::default()
    };
    let data = plugin.query_data(query).await.unwrap();
    assert_eq!(data.responses["A"].frames, vec![b"{\"expr\":\"up\"}".to_vec()]);

    let (tx, mut rx) = mpsc::channel::<CallResourceResponse>(16);
    let request = CallResourceRequest {
        path: "/api/echo".to_string(),
        body: b"0123456789".to_vec(),
        ..Default::default()
    };
    plugin.call_resource(request, &tx).await.unwrap();
    drop(tx);
    let mut body = Vec::new();
    let mut chunks = 0;
    while let Some(response) = rx.recv().await {
        assert_eq!(response.code, 200);
        body.extend(response.body);
        chunks += 1;
    }
    assert_eq!(chunks, 3);
    assert_eq!(body, b"0123456789".to_vec());

    let subscribed = plugin
        .subscribe_stream(SubscribeStreamRequest {
            path: "/live".to_string(),
            data: b"hello".to_vec(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(subscribed.status, SubscribeStreamStatus::Ok as i32);
    assert_eq!(subscribed.data, b"hello".to_vec());

    let published = plugin.publish_stream(Default::default()).await.unwrap();
    assert_eq!(published.status, PublishStreamStatus::PermissionDenied as i32);

    let (tx, mut rx) = mpsc::channel::<StreamPacket>(16);
    plugin
        .run_stream(
            RunStreamRequest {
                path: "/finite".to_string(),
                ..Default::default()
            },
            &tx,
        )
        .await
        .unwrap();
    drop(tx);
    let mut packets = Vec::new();
    while let Some(packet) = rx.recv().await {
        packets.push(packet.data);
    }
    assert_eq!(packets, vec![b"0".to_vec(), b"1".to_vec(), b"2".to_vec()]);

    plugin.stop().await.unwrap();
    assert!(plugin.exited().await);
    server.abort();
}

#[tokio::test]
async fn test_successful_call_marks_channel_ready() {
    let (addr, server) = serve(false).await.unwrap();
    let transport = TonicTransport::new();
    let channel = transport
        .dial(&addr.to_string(), &DialCredentials::Insecure)
        .unwrap();
    let client = transport.new_client(&channel).unwrap();

    assert_eq!(channel.connectivity_state(), ConnectivityState::Idle);
    client.check_health(Default::default()).await.unwrap();
    assert_eq!(channel.connectivity_state(), ConnectivityState::Ready);

    channel.close().unwrap();
    server.abort();
}

#[tokio::test]
async fn test_plugin_status_is_forwarded_unchanged() {
    let (addr, server) = serve(false).await.unwrap();
    let plugin = started_plugin(addr).await;

    let mut request = CheckHealthRequest::default();
    request.headers.insert("deny".to_string(), "1".to_string());

    match plugin.check_health(request).await {
        Err(PluginError::Rpc(status)) => {
            assert_eq!(status.code(), Code::PermissionDenied);
            assert_eq!(status.message(), "health check denied");
        }
        other => panic!("expected forwarded status, got {:?}", other),
    }

    // A failed call leaves the plugin usable.
    assert!(!plugin.exited().await);
    assert!(plugin.check_health(Default::default()).await.is_ok());

    plugin.stop().await.unwrap();
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_ends_a_running_stream() {
    let (addr, server) = serve(false).await.unwrap();
    let plugin = started_plugin(addr).await;

    let (tx, mut rx) = mpsc::channel::<StreamPacket>(64);
    let streaming = {
        let plugin = plugin.clone();
        tokio::spawn(async move {
            let request = RunStreamRequest {
                path: "/live".to_string(),
                ..Default::default()
            };
            plugin.run_stream(request, &tx).await
        })
    };

    // Wait until packets are flowing before stopping.
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap();
    assert_eq!(first.map(|p| p.data), Some(b"0".to_vec()));

    plugin.stop().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), streaming)
        .await
        .expect("stream kept running after stop")
        .unwrap();
    match result {
        Err(PluginError::Rpc(status)) => assert_eq!(status.code(), Code::Cancelled),
        other => panic!("expected cancelled stream, got {:?}", other),
    }

    assert!(plugin.exited().await);
    server.abort();
}

#[tokio::test]
async fn test_skip_verify_completes_call_against_self_signed_server() {
    let (addr, server) = serve(true).await.unwrap();
    let descriptor = PluginDescriptor::new("self-signed-datasource", addr.to_string())
        .with_tls(TlsSettings::new().with_insecure_skip_verify(true));
    let plugin = RemotePlugin::new(descriptor);

    plugin.start().await.unwrap();
    let health = plugin.check_health(Default::default()).await.unwrap();
    assert_eq!(health.status, HealthStatus::Ok as i32);

    let (tx, mut rx) = mpsc::channel::<StreamPacket>(16);
    plugin
        .run_stream(Default::default(), &tx)
        .await
        .unwrap();
    drop(tx);
    let mut count = 0;
    while rx.recv().await.is_some() {
        count += 1;
    }
    assert_eq!(count, FINITE_PACKETS);

    plugin.stop().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_verifying_dial_rejects_self_signed_server() {
    let (addr, server) = serve(true).await.unwrap();
    let descriptor = PluginDescriptor::new("self-signed-datasource", addr.to_string())
        .with_tls(TlsSettings::new().with_server_name("localhost"));
    let plugin = RemotePlugin::new(descriptor);

    plugin.start().await.unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        plugin.check_health(Default::default()),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(PluginError::Rpc(_))));

    plugin.stop().await.unwrap();
    server.abort();
}
