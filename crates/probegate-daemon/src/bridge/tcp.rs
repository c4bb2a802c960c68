//! Raw TCP transport adapter.
//!
//! Probes speaking the framed protocol open a plain TCP connection and
//! immediately send their probe-connected handshake. The sniffer therefore
//! claims any connection whose initial bytes contain the probe-connected
//! address marker; everything after that is length-prefixed
//! [`EnvelopeCodec`] frames in both directions.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use probegate_core::address::platform;
use probegate_core::EnvelopeCodec;
use tokio_util::codec::Framed;

use super::connection::run_bridge_connection;
use super::event::TransportError;
use super::probe::ProbeBridge;
use crate::listener::{ProtocolHandler, SniffPredicate, SniffedStream};

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Framed TCP bridge transport.
pub struct TcpBridge {
    bridge: Arc<ProbeBridge>,
}

impl TcpBridge {
    /// Adapter over the shared gateway.
    #[must_use]
    pub fn new(bridge: Arc<ProbeBridge>) -> Self {
        Self { bridge }
    }

    /// Sniffer claiming connections whose initial bytes carry the
    /// probe-connected handshake marker.
    #[must_use]
    pub fn sniffer() -> SniffPredicate {
        Arc::new(|bytes| contains(bytes, platform::PROBE_CONNECTED.as_bytes()))
    }
}

#[async_trait]
impl ProtocolHandler for TcpBridge {
    async fn handle(&self, stream: SniffedStream, peer: SocketAddr) {
        let framed = Framed::new(stream, EnvelopeCodec);
        let (sink, stream) = framed.split();
        let sink = sink.sink_map_err(TransportError::from);
        let stream = stream.map(|item| item.map_err(TransportError::from));
        run_bridge_connection(Arc::clone(&self.bridge), "tcp", peer, sink, stream).await;
    }
}
