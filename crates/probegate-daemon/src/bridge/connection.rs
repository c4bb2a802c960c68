//! Transport-agnostic per-connection event loop.
//!
//! Both transport adapters reduce their connection to an envelope sink and
//! an envelope stream, then hand it to [`run_bridge_connection`]. The loop
//! owns all per-connection state: the socket's gateway identity, the
//! outbound writer task, and one forwarder task per registered address.
//!
//! Inbound events are permission-checked against the direction they
//! travel BEFORE the gateway sees them: `send`/`publish` against the
//! inbound list, `register` against the outbound list (a registration is
//! a request to receive outbound traffic). Denied events are dropped
//! without closing the connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use probegate_core::{Envelope, EventKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::event::{BridgeSocketState, TransportError, Verdict};
use super::probe::ProbeBridge;
use crate::bus::Consumer;

/// Drive one bridge connection until the transport closes.
///
/// Consumes the stream until it ends or errors, then tears down all
/// registrations and runs disconnect cleanup exactly once.
pub async fn run_bridge_connection<Si, St>(
    bridge: Arc<ProbeBridge>,
    transport: &'static str,
    peer: SocketAddr,
    sink: Si,
    mut stream: St,
) where
    Si: Sink<Envelope, Error = TransportError> + Send + Unpin + 'static,
    St: Stream<Item = Result<Envelope, TransportError>> + Send + Unpin,
{
    let socket = BridgeSocketState::new();
    bridge.metrics().connection_opened(transport);
    debug!(%peer, transport, "bridge connection opened");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
    let writer = tokio::spawn(async move {
        let mut sink = sink;
        while let Some(envelope) = out_rx.recv().await {
            if let Err(error) = sink.send(envelope).await {
                debug!(%error, "write failed, stopping writer");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut registrations: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(error) => {
                debug!(%peer, %error, "transport error, closing connection");
                break;
            },
        };

        match event.kind {
            EventKind::Ping => {
                let _ = out_tx.send(Envelope::new(EventKind::Pong, event.address));
            },
            EventKind::Pong | EventKind::Registered | EventKind::Message => {
                trace!(%peer, kind = event.kind.as_str(), "ignoring server-side kind from probe");
            },
            EventKind::Send | EventKind::Publish => {
                if !bridge.inbound().is_permitted(&event.address) {
                    bridge.metrics().bridge_event(event.kind.as_str(), "denied");
                    debug!(%peer, address = %event.address, "inbound address not permitted");
                    continue;
                }
                if let Verdict::Allow(allowed) = bridge.handle_bridge_event(&socket, event) {
                    relay(&bridge, allowed);
                }
            },
            EventKind::Register => {
                if !bridge.outbound().is_permitted(&event.address) {
                    bridge.metrics().bridge_event(event.kind.as_str(), "denied");
                    debug!(%peer, address = %event.address, "registration address not permitted");
                    continue;
                }
                let Verdict::Allow(allowed) = bridge.handle_bridge_event(&socket, event) else {
                    continue;
                };
                let address = allowed.address.clone();

                let consumer = bridge.bus().consumer(&address);
                let forwarder = spawn_forwarder(Arc::clone(&bridge), consumer, out_tx.clone());
                if let Some(previous) = registrations.insert(address.clone(), forwarder) {
                    previous.abort();
                }

                // Raise the registration acknowledgement; a rejection
                // (no bound probe) voids the registration.
                let ack = Envelope {
                    kind: EventKind::Registered,
                    ..allowed
                };
                match bridge.handle_bridge_event(&socket, ack) {
                    Verdict::Allow(forward) => relay(&bridge, forward),
                    Verdict::Reject { .. } => {
                        if let Some(handle) = registrations.remove(&address) {
                            handle.abort();
                        }
                    },
                }
            },
            EventKind::Unregister => {
                if let Verdict::Allow(allowed) = bridge.handle_bridge_event(&socket, event) {
                    if let Some(handle) = registrations.remove(&allowed.address) {
                        handle.abort();
                    }
                }
            },
        }
    }

    for handle in registrations.values() {
        handle.abort();
    }
    drop(out_tx);
    let _ = writer.await;

    bridge.connection_closed(&socket);
    bridge.metrics().connection_closed(transport);
    debug!(%peer, transport, "bridge connection closed");
}

/// Relay an allowed event onto the bus.
fn relay(bridge: &ProbeBridge, allowed: Envelope) {
    match allowed.kind {
        EventKind::Send => bridge.bus().send(&allowed.address, allowed.headers, allowed.body),
        EventKind::Publish => bridge
            .bus()
            .publish(&allowed.address, allowed.headers, allowed.body),
        _ => {},
    }
}

/// Forward bus deliveries for one registration back to the socket.
///
/// The outbound permission list is re-applied per delivery, so a list
/// change or a mis-published message never leaks to the probe.
fn spawn_forwarder(
    bridge: Arc<ProbeBridge>,
    mut consumer: Consumer,
    out_tx: mpsc::UnboundedSender<Envelope>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = consumer.recv().await {
            if !bridge.outbound().is_permitted(&message.address) {
                debug!(address = %message.address, "suppressing non-permitted delivery");
                continue;
            }
            let delivery = Envelope {
                kind: EventKind::Message,
                address: message.address,
                headers: message.headers,
                body: message.body,
            };
            if out_tx.send(delivery).is_err() {
                break;
            }
        }
    })
}
