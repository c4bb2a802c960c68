//! WebSocket transport adapter.
//!
//! Probes behind HTTP-only middleboxes connect with a WebSocket upgrade
//! against the configured bridge path. The sniffer claims HTTP GET
//! requests targeting that path; after the upgrade, envelopes travel as
//! JSON text messages in both directions. Binary messages are accepted
//! and parsed the same way; protocol-level ping/pong is left to the
//! WebSocket stack.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::ready;
use futures::{SinkExt, StreamExt};
use probegate_core::Envelope;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::connection::run_bridge_connection;
use super::event::TransportError;
use super::probe::ProbeBridge;
use crate::listener::{ProtocolHandler, SniffPredicate, SniffedStream};

/// WebSocket bridge transport on a fixed path prefix.
pub struct WsBridge {
    bridge: Arc<ProbeBridge>,
    path_prefix: String,
}

impl WsBridge {
    /// Adapter over the shared gateway, serving `path_prefix`.
    #[must_use]
    pub fn new(bridge: Arc<ProbeBridge>, path_prefix: impl Into<String>) -> Self {
        Self {
            bridge,
            path_prefix: path_prefix.into(),
        }
    }

    /// Sniffer claiming HTTP GET requests whose path starts with
    /// `path_prefix`.
    #[must_use]
    pub fn sniffer(path_prefix: &str) -> SniffPredicate {
        let request_line_prefix = format!("GET {path_prefix}").into_bytes();
        Arc::new(move |bytes| bytes.starts_with(&request_line_prefix))
    }
}

#[async_trait]
impl ProtocolHandler for WsBridge {
    async fn handle(&self, stream: SniffedStream, peer: SocketAddr) {
        let path_prefix = self.path_prefix.clone();
        let accepted = tokio_tungstenite::accept_hdr_async(
            stream,
            move |request: &Request, response: Response| {
                if request.uri().path().starts_with(&path_prefix) {
                    Ok(response)
                } else {
                    let mut reject = ErrorResponse::new(Some("unknown path".to_string()));
                    *reject.status_mut() = StatusCode::NOT_FOUND;
                    Err(reject)
                }
            },
        )
        .await;

        let ws = match accepted {
            Ok(ws) => ws,
            Err(error) => {
                debug!(%peer, %error, "websocket handshake failed");
                return;
            },
        };

        let (ws_sink, ws_stream) = ws.split();
        let sink = ws_sink.sink_map_err(TransportError::from).with(
            |envelope: Envelope| {
                ready(
                    serde_json::to_string(&envelope)
                        .map(Message::Text)
                        .map_err(TransportError::from),
                )
            },
        );
        let stream = ws_stream.filter_map(|item| {
            ready(match item {
                Ok(Message::Text(text)) => {
                    Some(serde_json::from_str(&text).map_err(TransportError::from))
                },
                Ok(Message::Binary(bytes)) => {
                    Some(serde_json::from_slice(&bytes).map_err(TransportError::from))
                },
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Ok(Message::Close(_)) => None,
                Err(error) => Some(Err(TransportError::from(error))),
            })
        });

        run_bridge_connection(Arc::clone(&self.bridge), "ws", peer, sink, stream).await;
    }
}

#[cfg(test)]
mod tests {
    use probegate_core::address::platform;
    use probegate_core::envelope::header;
    use serde_json::json;
    use tokio::net::TcpStream;

    use super::*;
    use crate::bridge::auth::ProbeAuthenticator;
    use crate::bus::EventBus;
    use crate::listener::MultiUseNetServer;
    use crate::metrics::MetricsRegistry;
    use crate::storage::SharedStorage;

    const PATH: &str = "/probe/eventbus";

    #[test]
    fn sniffer_matches_upgrade_requests_on_the_path() {
        let sniffer = WsBridge::sniffer(PATH);
        assert!(sniffer(b"GET /probe/eventbus HTTP/1.1\r\nUpgrade: websocket\r\n"));
        assert!(sniffer(b"GET /probe/eventbus"));
        // Partial request lines do not match yet.
        assert!(!sniffer(b"GET /pro"));
        assert!(!sniffer(b"GET /other/path HTTP/1.1\r\n"));
        assert!(!sniffer(b"POST /probe/eventbus HTTP/1.1\r\n"));
    }

    async fn ws_server() -> (Arc<ProbeBridge>, SocketAddr) {
        let bridge = Arc::new(ProbeBridge::new(
            Arc::new(EventBus::new()),
            SharedStorage::memory(),
            ProbeAuthenticator::disabled(),
            MetricsRegistry::new().unwrap().gateway(),
        ));
        let server = Arc::new(MultiUseNetServer::bind("127.0.0.1:0").await.unwrap());
        server.add_use(
            Arc::new(WsBridge::new(Arc::clone(&bridge), PATH)),
            WsBridge::sniffer(PATH),
        );
        let addr = server.local_addr().unwrap();
        tokio::spawn(Arc::clone(&server).run());
        (bridge, addr)
    }

    #[tokio::test]
    async fn handshake_over_websocket_reaches_the_bus() {
        let (bridge, addr) = ws_server().await;
        let mut connected = bridge.bus().consumer(platform::PROBE_CONNECTED);

        let tcp = TcpStream::connect(addr).await.unwrap();
        let (mut ws, _) = tokio_tungstenite::client_async(format!("ws://{addr}{PATH}"), tcp)
            .await
            .unwrap();

        let handshake = Envelope::publish(
            platform::PROBE_CONNECTED,
            json!({"instanceId": "ws-probe", "connectionTime": 0, "meta": {}}),
        );
        ws.send(Message::Text(serde_json::to_string(&handshake).unwrap()))
            .await
            .unwrap();

        let message = connected.recv().await.unwrap();
        assert_eq!(message.body["instanceId"], "ws-probe");
        assert_eq!(message.headers.get(header::PROBE_ID).unwrap(), "ws-probe");
    }

    #[tokio::test]
    async fn upgrade_outside_the_path_is_refused() {
        let bridge = Arc::new(ProbeBridge::new(
            Arc::new(EventBus::new()),
            SharedStorage::memory(),
            ProbeAuthenticator::disabled(),
            MetricsRegistry::new().unwrap().gateway(),
        ));
        let handler = WsBridge::new(bridge, PATH);

        // Hand the handler a connection directly; the upgrade callback
        // must refuse the path with a 404.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handler
                .handle(SniffedStream::new(Vec::new(), stream), peer)
                .await;
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let result =
            tokio_tungstenite::client_async(format!("ws://{addr}/other/path"), tcp).await;
        assert!(result.is_err());
    }
}
