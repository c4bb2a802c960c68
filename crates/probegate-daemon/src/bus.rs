//! In-process publish/subscribe message bus.
//!
//! The bus routes [`BusMessage`]s by string address. `publish` fans a
//! message out to every consumer of the address; `send` delivers to one
//! consumer in rotation. Delivery is fire-and-forget: there is no replay
//! log, no acknowledgement, and a message published to an address with no
//! consumers is dropped.
//!
//! Consumers are unbounded mpsc receivers, so messages for one consumer
//! arrive in publish order. Dropping a [`Consumer`] unregisters it; the
//! next delivery attempt prunes the dead sender.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

/// A message in flight on the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Address the message was published to.
    pub address: String,
    /// String headers (probe id, client auth context, ...).
    pub headers: BTreeMap<String, String>,
    /// Opaque JSON body.
    pub body: Value,
}

struct ConsumerEntry {
    id: u64,
    tx: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct AddressConsumers {
    entries: Vec<ConsumerEntry>,
    /// Rotation cursor for `send`.
    next: usize,
}

/// In-process message bus handle.
///
/// Cheap to share via [`Arc`]; one instance per cluster context.
#[derive(Default)]
pub struct EventBus {
    consumers: DashMap<String, AddressConsumers>,
    next_consumer_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer for `address`.
    #[must_use]
    pub fn consumer(self: &Arc<Self>, address: &str) -> Consumer {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        self.consumers
            .entry(address.to_string())
            .or_default()
            .entries
            .push(ConsumerEntry { id, tx });

        Consumer {
            bus: Arc::clone(self),
            address: address.to_string(),
            id,
            rx,
        }
    }

    /// Fan a message out to every consumer of `address`.
    pub fn publish(&self, address: &str, headers: BTreeMap<String, String>, body: Value) {
        let Some(mut consumers) = self.consumers.get_mut(address) else {
            trace!(address, "publish with no consumers");
            return;
        };

        let message = BusMessage {
            address: address.to_string(),
            headers,
            body,
        };
        consumers
            .entries
            .retain(|entry| entry.tx.send(message.clone()).is_ok());
    }

    /// Deliver a message to one consumer of `address`, rotating between
    /// consumers on successive calls.
    pub fn send(&self, address: &str, headers: BTreeMap<String, String>, body: Value) {
        let Some(mut consumers) = self.consumers.get_mut(address) else {
            trace!(address, "send with no consumers");
            return;
        };

        let message = BusMessage {
            address: address.to_string(),
            headers,
            body,
        };

        // Walk from the rotation cursor until one live consumer accepts.
        while !consumers.entries.is_empty() {
            let index = consumers.next % consumers.entries.len();
            if consumers.entries[index].tx.send(message.clone()).is_ok() {
                consumers.next = index + 1;
                return;
            }
            consumers.entries.remove(index);
        }
        trace!(address, "send with no live consumers");
    }

    fn unregister(&self, address: &str, id: u64) {
        if let Some(mut consumers) = self.consumers.get_mut(address) {
            consumers.entries.retain(|entry| entry.id != id);
        }
    }
}

/// A registered bus consumer.
///
/// Receives messages for one address in publish order. Unregisters itself
/// on drop.
pub struct Consumer {
    bus: Arc<EventBus>,
    address: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl Consumer {
    /// Address this consumer is registered on.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Receive the next message. Returns `None` once the consumer is
    /// unregistered and drained.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.bus.unregister(&self.address, self.id);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new())
    }

    #[tokio::test]
    async fn publish_reaches_every_consumer() {
        let bus = bus();
        let mut first = bus.consumer("addr");
        let mut second = bus.consumer("addr");

        bus.publish("addr", BTreeMap::new(), json!(1));

        assert_eq!(first.recv().await.unwrap().body, json!(1));
        assert_eq!(second.recv().await.unwrap().body, json!(1));
    }

    #[tokio::test]
    async fn send_rotates_between_consumers() {
        let bus = bus();
        let mut first = bus.consumer("addr");
        let mut second = bus.consumer("addr");

        bus.send("addr", BTreeMap::new(), json!(1));
        bus.send("addr", BTreeMap::new(), json!(2));

        assert_eq!(first.recv().await.unwrap().body, json!(1));
        assert_eq!(second.recv().await.unwrap().body, json!(2));
    }

    #[tokio::test]
    async fn per_consumer_order_is_publish_order() {
        let bus = bus();
        let mut consumer = bus.consumer("addr");
        for i in 0..10 {
            bus.publish("addr", BTreeMap::new(), json!(i));
        }
        for i in 0..10 {
            assert_eq!(consumer.recv().await.unwrap().body, json!(i));
        }
    }

    #[tokio::test]
    async fn dropped_consumer_is_unregistered() {
        let bus = bus();
        let consumer = bus.consumer("addr");
        drop(consumer);

        // No consumer left; publish must not panic or leak.
        bus.publish("addr", BTreeMap::new(), json!(1));

        let mut fresh = bus.consumer("addr");
        bus.publish("addr", BTreeMap::new(), json!(2));
        assert_eq!(fresh.recv().await.unwrap().body, json!(2));
    }

    #[tokio::test]
    async fn addresses_are_isolated() {
        let bus = bus();
        let mut a = bus.consumer("a");
        bus.publish("b", BTreeMap::new(), json!("wrong"));
        bus.publish("a", BTreeMap::new(), json!("right"));
        assert_eq!(a.recv().await.unwrap().body, json!("right"));
    }
}
