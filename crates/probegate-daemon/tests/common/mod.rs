#![allow(dead_code)]

//! Shared harness: a full gateway on an ephemeral port with both
//! transports registered, plus probe clients for each transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use probegate_core::address::{bridge as bridge_address, platform};
use probegate_core::{ActiveInstance, Envelope, EnvelopeCodec};
use probegate_daemon::bridge::auth::ProbeAuthenticator;
use probegate_daemon::bridge::{ProbeBridge, TcpBridge, WsBridge};
use probegate_daemon::bus::EventBus;
use probegate_daemon::listener::MultiUseNetServer;
use probegate_daemon::metrics::MetricsRegistry;
use probegate_daemon::storage::{SharedCounter, SharedMap, SharedStorage};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::Framed;

pub const WS_PATH: &str = "/probe/eventbus";

pub struct TestGateway {
    pub bridge: Arc<ProbeBridge>,
    pub storage: SharedStorage,
    pub addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl TestGateway {
    pub fn fleet_counter(&self) -> SharedCounter {
        self.storage.counter(platform::PROBE_CONNECTED)
    }

    pub fn remote_counter(&self, remote: &str) -> SharedCounter {
        self.storage.counter(remote)
    }

    pub fn active_probes(&self) -> SharedMap<String, ActiveInstance> {
        self.storage.map(bridge_address::ACTIVE_PROBES)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub async fn spawn_gateway() -> TestGateway {
    let storage = SharedStorage::memory();
    let bridge = Arc::new(ProbeBridge::new(
        Arc::new(EventBus::new()),
        storage.clone(),
        ProbeAuthenticator::disabled(),
        MetricsRegistry::new().unwrap().gateway(),
    ));
    let mut tasks = bridge.start();

    let server = Arc::new(MultiUseNetServer::bind("127.0.0.1:0").await.unwrap());
    server.add_use(
        Arc::new(TcpBridge::new(Arc::clone(&bridge))),
        TcpBridge::sniffer(),
    );
    server.add_use(
        Arc::new(WsBridge::new(Arc::clone(&bridge), WS_PATH)),
        WsBridge::sniffer(WS_PATH),
    );
    let addr = server.local_addr().unwrap();
    tasks.push(tokio::spawn(Arc::clone(&server).run()));

    TestGateway {
        bridge,
        storage,
        addr,
        tasks,
    }
}

pub fn handshake(probe_id: &str) -> Envelope {
    Envelope::publish(
        platform::PROBE_CONNECTED,
        json!({
            "instanceId": probe_id,
            "connectionTime": 1_700_000_000_000_i64,
            "meta": {}
        }),
    )
}

/// A probe speaking the framed TCP protocol.
pub struct TcpProbe {
    framed: Framed<TcpStream, EnvelopeCodec>,
}

impl TcpProbe {
    /// Connect and complete the probe-connected handshake.
    pub async fn connect(addr: SocketAddr, probe_id: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut probe = Self {
            framed: Framed::new(stream, EnvelopeCodec),
        };
        probe.send(handshake(probe_id)).await;
        probe
    }

    pub async fn send(&mut self, envelope: Envelope) {
        self.framed.send(envelope).await.unwrap();
    }

    pub async fn recv(&mut self) -> Envelope {
        tokio::time::timeout(Duration::from_secs(2), self.framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("frame decode failed")
    }
}

/// A probe speaking JSON envelopes over WebSocket.
pub struct WsProbe {
    ws: WebSocketStream<TcpStream>,
}

impl WsProbe {
    /// Upgrade on the bridge path. Does NOT send a handshake.
    pub async fn connect(addr: SocketAddr) -> Self {
        let tcp = TcpStream::connect(addr).await.unwrap();
        let (ws, _) = tokio_tungstenite::client_async(format!("ws://{addr}{WS_PATH}"), tcp)
            .await
            .unwrap();
        Self { ws }
    }

    pub async fn send(&mut self, envelope: Envelope) {
        self.ws
            .send(Message::Text(serde_json::to_string(&envelope).unwrap()))
            .await
            .unwrap();
    }

    pub async fn recv(&mut self) -> Envelope {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), self.ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection closed")
                .expect("websocket error");
            match message {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Binary(bytes) => return serde_json::from_slice(&bytes).unwrap(),
                _ => {},
            }
        }
    }
}

pub async fn wait_for_counter(counter: &SharedCounter, expected: i64) {
    for _ in 0..100 {
        if counter.get().await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "counter {} never reached {expected}, last value {}",
        counter.name(),
        counter.get().await.unwrap()
    );
}

pub async fn wait_for_map_size(map: &SharedMap<String, ActiveInstance>, expected: usize) {
    for _ in 0..100 {
        if map.size().await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "map {} never reached size {expected}, last size {}",
        map.name(),
        map.size().await.unwrap()
    );
}
