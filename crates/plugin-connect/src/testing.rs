//! Test doubles for the transport seam
//!
//! `FakeTransport` stands in for the network: it records every dial, hands out
//! `FakeChannel`s whose connectivity tests can flip, and builds clients that
//! all share one `FakeClient`.
//!
//! ## Example
//!
//! ```
//! use plugin_connect::testing::FakeTransport;
//! use plugin_connect::{DialCredentials, PluginDescriptor, RemotePlugin};
//! use plugin_interface::BackendPlugin;
//!
//! # tokio_test::block_on(async {
//! let transport = FakeTransport::new();
//! let plugin = RemotePlugin::with_transport(
//!     PluginDescriptor::new("fake", "127.0.0.1:10000"),
//!     transport.clone(),
//! );
//!
//! plugin.start().await.unwrap();
//! assert_eq!(transport.dialed_credentials(), vec![DialCredentials::Insecure]);
//! # });
//! ```

use crate::error::ConnectError;
use crate::transport::{
    ConnectivityCell, ConnectivityState, DialCredentials, PluginChannel, Transport,
};
use async_trait::async_trait;
use plugin_interface::{
    CallResourceRequest, CallResourceResponse, CallResourceResponseSender, CheckHealthRequest,
    CheckHealthResponse, CollectMetricsRequest, CollectMetricsResponse, DataResponse,
    HealthStatus, PluginCapabilities, PublishStreamRequest, PublishStreamResponse,
    QueryDataRequest, QueryDataResponse, Result, RunStreamRequest, StreamPacket, StreamSender,
    SubscribeStreamRequest, SubscribeStreamResponse,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct TransportState {
    dials: AtomicUsize,
    fail_dial: AtomicBool,
    fail_client: AtomicBool,
    fail_close: AtomicBool,
    addresses: Mutex<Vec<String>>,
    credentials: Mutex<Vec<DialCredentials>>,
    channels: Mutex<Vec<FakeChannel>>,
}

/// In-memory `Transport` that records what it was asked to do.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<TransportState>,
    client: Arc<FakeClient>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_dial(&self, fail: bool) {
        self.state.fail_dial.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_client(&self, fail: bool) {
        self.state.fail_client.store(fail, Ordering::SeqCst);
    }

    /// Channels dialed from now on fail to close.
    pub fn set_fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn dial_count(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub fn dialed_addresses(&self) -> Vec<String> {
        lock(&self.state.addresses).clone()
    }

    pub fn dialed_credentials(&self) -> Vec<DialCredentials> {
        lock(&self.state.credentials).clone()
    }

    /// Handle to the most recently dialed channel.
    pub fn last_channel(&self) -> Option<FakeChannel> {
        lock(&self.state.channels).last().cloned()
    }

    /// The client every successful `new_client` call hands out.
    pub fn client(&self) -> Arc<FakeClient> {
        self.client.clone()
    }
}

impl Transport for FakeTransport {
    type Channel = FakeChannel;

    fn dial(
        &self,
        address: &str,
        credentials: &DialCredentials,
    ) -> std::result::Result<FakeChannel, ConnectError> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.addresses).push(address.to_string());
        lock(&self.state.credentials).push(credentials.clone());

        if self.state.fail_dial.load(Ordering::SeqCst) {
            return Err(ConnectError::InvalidAddress {
                address: address.to_string(),
                reason: "dial refused by fake transport".to_string(),
            });
        }

        let channel = FakeChannel::new(self.state.fail_close.load(Ordering::SeqCst));
        lock(&self.state.channels).push(channel.clone());
        Ok(channel)
    }

    fn new_client(
        &self,
        _channel: &FakeChannel,
    ) -> std::result::Result<Arc<dyn PluginCapabilities>, ConnectError> {
        if self.state.fail_client.load(Ordering::SeqCst) {
            return Err(ConnectError::Client(
                "client construction refused by fake transport".to_string(),
            ));
        }

        Ok(self.client.clone())
    }
}

/// Channel whose connectivity is driven by the test. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeChannel {
    state: ConnectivityCell,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
}

impl FakeChannel {
    fn new(fail_close: bool) -> Self {
        Self {
            state: ConnectivityCell::new(ConnectivityState::Ready),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_close,
        }
    }

    pub fn set_state(&self, state: ConnectivityState) {
        self.state.set(state);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl PluginChannel for FakeChannel {
    fn connectivity_state(&self) -> ConnectivityState {
        self.state.get()
    }

    fn close(self) -> std::result::Result<(), ConnectError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.state.set(ConnectivityState::Shutdown);

        if self.fail_close {
            return Err(ConnectError::Io(std::io::Error::other(
                "close refused by fake channel",
            )));
        }
        Ok(())
    }
}

/// Capability implementation that answers locally.
///
/// `check_health` reports OK, `query_data` echoes one response per `ref_id`,
/// `call_resource` echoes the request body with code 200, and `run_stream`
/// sends three packets. `fail_with` makes every later call return that status.
#[derive(Default)]
pub struct FakeClient {
    calls: AtomicUsize,
    failure: Mutex<Option<tonic::Status>>,
}

impl FakeClient {
    pub fn total_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, status: tonic::Status) {
        *lock(&self.failure) = Some(status);
    }

    async fn record(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Give concurrent lifecycle operations a chance to interleave.
        tokio::task::yield_now().await;

        match lock(&self.failure).clone() {
            Some(status) => Err(status.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PluginCapabilities for FakeClient {
    async fn collect_metrics(&self, _req: CollectMetricsRequest) -> Result<CollectMetricsResponse> {
        self.record().await?;
        Ok(CollectMetricsResponse {
            prometheus: b"# TYPE plugin_up gauge\nplugin_up 1\n".to_vec(),
        })
    }

    async fn check_health(&self, _req: CheckHealthRequest) -> Result<CheckHealthResponse> {
        self.record().await?;
        Ok(CheckHealthResponse {
            status: HealthStatus::Ok as i32,
            message: "fake plugin is healthy".to_string(),
            json_details: Vec::new(),
        })
    }

    async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse> {
        self.record().await?;
        let responses = req
            .queries
            .into_iter()
            .map(|query| (query.ref_id, DataResponse::default()))
            .collect();
        Ok(QueryDataResponse { responses })
    }

    async fn call_resource(
        &self,
        req: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        self.record().await?;
        sender
            .send(CallResourceResponse {
                code: 200,
                headers: Default::default(),
                body: req.body,
            })
            .await
    }

    async fn subscribe_stream(
        &self,
        _req: SubscribeStreamRequest,
    ) -> Result<SubscribeStreamResponse> {
        self.record().await?;
        Ok(SubscribeStreamResponse::default())
    }

    async fn publish_stream(&self, _req: PublishStreamRequest) -> Result<PublishStreamResponse> {
        self.record().await?;
        Ok(PublishStreamResponse::default())
    }

    async fn run_stream(&self, _req: RunStreamRequest, sender: &dyn StreamSender) -> Result<()> {
        self.record().await?;
        for i in 0..3 {
            sender
                .send(StreamPacket {
                    data: format!("packet-{}", i).into_bytes(),
                })
                .await?;
        }
        Ok(())
    }
}

/// Sender that keeps everything it receives.
#[derive(Default)]
pub struct RecordingSender {
    responses: Mutex<Vec<CallResourceResponse>>,
    packets: Mutex<Vec<StreamPacket>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responses(&self) -> Vec<CallResourceResponse> {
        lock(&self.responses).clone()
    }

    pub fn packets(&self) -> Vec<StreamPacket> {
        lock(&self.packets).clone()
    }
}

#[async_trait]
impl CallResourceResponseSender for RecordingSender {
    async fn send(&self, response: CallResourceResponse) -> Result<()> {
        lock(&self.responses).push(response);
        Ok(())
    }
}

#[async_trait]
impl StreamSender for RecordingSender {
    async fn send(&self, packet: StreamPacket) -> Result<()> {
        lock(&self.packets).push(packet);
        Ok(())
    }
}
