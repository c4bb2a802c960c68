//! The probe gateway state machine and its bus-side-effect consumers.
//!
//! [`ProbeBridge`] sits between transport adapters and the message bus.
//! Every decoded envelope passes through [`ProbeBridge::handle_bridge_event`],
//! which authenticates it, binds probe identity on the probe-connected
//! handshake, and stamps identity headers before the event is relayed.
//!
//! The bridge also owns three bus consumers that maintain cluster-visible
//! state:
//!
//! - probe-connected: writes an [`ActiveInstance`] into the shared
//!   active-probes map and increments the fleet counter
//! - remote-registered: appends the registered remote to the instance's
//!   metadata and increments the per-remote counter
//! - probe-disconnected: removes the instance and decrements the fleet
//!   counter plus one per-remote counter for each registered remote
//!
//! Consumer steps are independent: a failed storage operation is logged
//! and the remaining steps still run, so one bad record never wedges the
//! bookkeeping loops.
//!
//! # Security Considerations
//!
//! Identity is bound server-side: the `probe_id` header is derived from
//! the connection's handshake, never trusted from the wire. Credential
//! headers are stripped before an event leaves the gateway; downstream
//! consumers only ever see the validated `client_auth` context.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use probegate_core::address::{bridge, platform, processor};
use probegate_core::envelope::header;
use probegate_core::{ActiveInstance, Envelope, EventKind, InstanceConnection};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::auth::ProbeAuthenticator;
use super::event::{BridgeSocket, DisconnectNotice, Verdict};
use super::permitted::{self, PermissionList};
use crate::bus::EventBus;
use crate::metrics::GatewayMetrics;
use crate::storage::SharedStorage;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

/// Probe-facing bridge gateway.
pub struct ProbeBridge {
    bus: Arc<EventBus>,
    storage: SharedStorage,
    authenticator: ProbeAuthenticator,
    /// Write-handle id → probe instance id, bound at handshake.
    subscriber_cache: DashMap<String, String>,
    inbound: PermissionList,
    outbound: PermissionList,
    metrics: GatewayMetrics,
}

impl ProbeBridge {
    /// Create the gateway over a bus, a shared store and an authenticator.
    #[must_use]
    pub fn new(
        bus: Arc<EventBus>,
        storage: SharedStorage,
        authenticator: ProbeAuthenticator,
        metrics: GatewayMetrics,
    ) -> Self {
        Self {
            bus,
            storage,
            authenticator,
            subscriber_cache: DashMap::new(),
            inbound: permitted::inbound_permitted(),
            outbound: permitted::outbound_permitted(),
            metrics,
        }
    }

    /// Bus this gateway relays onto.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Addresses probes may send toward the platform.
    #[must_use]
    pub fn inbound(&self) -> &PermissionList {
        &self.inbound
    }

    /// Addresses the platform may deliver toward probes.
    #[must_use]
    pub fn outbound(&self) -> &PermissionList {
        &self.outbound
    }

    /// Gateway metrics handle.
    #[must_use]
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Probe id bound to a connection, if the handshake has completed.
    #[must_use]
    pub fn bound_probe_id(&self, socket: &dyn BridgeSocket) -> Option<String> {
        self.subscriber_cache
            .get(socket.write_handle_id())
            .map(|entry| entry.clone())
    }

    /// Pass one bridge event through the gateway.
    ///
    /// Returns [`Verdict::Allow`] with the (possibly rewritten) envelope to
    /// relay, or [`Verdict::Reject`]. A rejection drops the event only; the
    /// connection stays open.
    pub fn handle_bridge_event(&self, socket: &dyn BridgeSocket, event: Envelope) -> Verdict {
        let kind = event.kind;
        let verdict = self.evaluate(socket, event);
        match &verdict {
            Verdict::Allow(_) => self.metrics.bridge_event(kind.as_str(), "allowed"),
            Verdict::Reject { reason } => {
                self.metrics.bridge_event(kind.as_str(), "rejected");
                debug!(kind = kind.as_str(), reason, "bridge event rejected");
            },
        }
        verdict
    }

    fn evaluate(&self, socket: &dyn BridgeSocket, mut event: Envelope) -> Verdict {
        if event.kind == EventKind::Registered {
            return self.forward_registered(socket, &event);
        }

        if !event.requires_auth() {
            return Verdict::Allow(event);
        }

        let auth = match self.authenticator.validate(&event) {
            Ok(auth) => auth,
            Err(error) => {
                self.metrics.auth_failure();
                return Verdict::reject(error.to_string());
            },
        };

        // Downstream only ever sees the validated context.
        event.headers.remove(header::CLIENT_ID);
        event.headers.remove(header::CLIENT_SECRET);
        event.headers.remove(header::TENANT_ID);
        if let Some(auth) = &auth {
            event
                .headers
                .insert(header::CLIENT_AUTH.to_string(), auth.to_header());
        }

        if event.address == platform::PROBE_CONNECTED {
            return self.bind_connection(socket, event);
        }

        if let Some(probe_id) = self.bound_probe_id(socket) {
            event
                .headers
                .insert(header::PROBE_ID.to_string(), probe_id);
        }
        Verdict::Allow(event)
    }

    /// Bind probe identity from the handshake and arm disconnect cleanup.
    fn bind_connection(&self, socket: &dyn BridgeSocket, mut event: Envelope) -> Verdict {
        let connection: InstanceConnection = match serde_json::from_value(event.body.clone()) {
            Ok(connection) => connection,
            Err(error) => {
                return Verdict::reject(format!("malformed probe-connected body: {error}"));
            },
        };

        self.subscriber_cache.insert(
            socket.write_handle_id().to_string(),
            connection.instance_id.clone(),
        );

        event.headers.insert(
            header::PROBE_ID.to_string(),
            connection.instance_id.clone(),
        );
        socket.install_disconnect_notice(DisconnectNotice {
            body: event.body.clone(),
            headers: event.headers.clone(),
        });

        info!(probe_id = %connection.instance_id, "probe connected");
        Verdict::Allow(event)
    }

    /// Forward a registration acknowledgement to the remote-registered
    /// address, carrying the raw event as the body.
    fn forward_registered(&self, socket: &dyn BridgeSocket, event: &Envelope) -> Verdict {
        let Some(probe_id) = self.bound_probe_id(socket) else {
            return Verdict::reject("missing probe id");
        };

        let raw = match serde_json::to_value(event) {
            Ok(raw) => raw,
            Err(error) => return Verdict::reject(format!("unserializable event: {error}")),
        };

        let mut forward = Envelope::publish(processor::REMOTE_REGISTERED, raw);
        forward.headers = event.headers.clone();
        forward.headers.remove(header::CLIENT_ID);
        forward.headers.remove(header::CLIENT_SECRET);
        forward
            .headers
            .insert(header::PROBE_ID.to_string(), probe_id);
        Verdict::Allow(forward)
    }

    /// A transport connection closed: unbind it and publish the armed
    /// disconnect notice, if any.
    pub fn connection_closed(&self, socket: &dyn BridgeSocket) {
        self.subscriber_cache.remove(socket.write_handle_id());

        if let Some(notice) = socket.take_disconnect_notice() {
            info!(
                probe_id = notice.headers.get(header::PROBE_ID).map_or("?", String::as_str),
                "probe disconnected"
            );
            self.bus
                .publish(platform::PROBE_DISCONNECTED, notice.headers, notice.body);
        }
    }

    /// Spawn the bookkeeping consumers. The returned handles run until
    /// aborted.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_probe_connected_consumer(),
            self.spawn_remote_registered_consumer(),
            self.spawn_probe_disconnected_consumer(),
        ]
    }

    fn active_probes(&self) -> crate::storage::SharedMap<String, ActiveInstance> {
        self.storage.map(bridge::ACTIVE_PROBES)
    }

    fn spawn_probe_connected_consumer(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let mut consumer = self.bus.consumer(platform::PROBE_CONNECTED);
        tokio::spawn(async move {
            while let Some(message) = consumer.recv().await {
                let connection: InstanceConnection =
                    match serde_json::from_value(message.body.clone()) {
                        Ok(connection) => connection,
                        Err(error) => {
                            warn!(%error, "dropping malformed probe-connected record");
                            continue;
                        },
                    };

                let connected_at = now_millis();
                let latency = connected_at - connection.connection_time;
                let active = ActiveInstance::from_connection(&connection, connected_at);
                debug!(
                    probe_id = %active.instance_id,
                    latency_ms = latency,
                    meta_keys = active.meta.len(),
                    "recording active probe"
                );

                let map = gateway.active_probes();
                if let Err(error) = map.put(&active.instance_id, &active).await {
                    warn!(%error, probe_id = %active.instance_id, "failed to record active probe");
                }
                if let Err(error) = gateway
                    .storage
                    .counter(platform::PROBE_CONNECTED)
                    .increment_and_get()
                    .await
                {
                    warn!(%error, "failed to increment fleet counter");
                }
            }
        })
    }

    fn spawn_remote_registered_consumer(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let mut consumer = self.bus.consumer(processor::REMOTE_REGISTERED);
        tokio::spawn(async move {
            while let Some(message) = consumer.recv().await {
                let Some(probe_id) = message.headers.get(header::PROBE_ID).cloned() else {
                    warn!("dropping remote registration without probe id");
                    continue;
                };
                let Some(address) = message
                    .body
                    .get("address")
                    .and_then(Value::as_str)
                else {
                    warn!(probe_id, "dropping remote registration without address");
                    continue;
                };
                // Instance-scoped registrations track no remote of their
                // own; only the generic address is bookkept.
                if address.contains(':') {
                    debug!(probe_id, address, "ignoring instance-scoped remote registration");
                    continue;
                }
                let remote = address.to_string();

                let map = gateway.active_probes();
                match map.get(&probe_id).await {
                    Ok(Some(mut active)) => {
                        active.push_remote(&remote);
                        if let Err(error) = map.put(&probe_id, &active).await {
                            warn!(%error, probe_id, "failed to record registered remote");
                        }
                    },
                    Ok(None) => warn!(probe_id, "remote registered for unknown probe"),
                    Err(error) => warn!(%error, probe_id, "failed to load active probe"),
                }

                if let Err(error) = gateway.storage.counter(&remote).increment_and_get().await {
                    warn!(%error, remote, "failed to increment remote counter");
                }
                debug!(probe_id, remote, "probe remote registered");
            }
        })
    }

    fn spawn_probe_disconnected_consumer(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let mut consumer = self.bus.consumer(platform::PROBE_DISCONNECTED);
        tokio::spawn(async move {
            while let Some(message) = consumer.recv().await {
                let connection: InstanceConnection =
                    match serde_json::from_value(message.body.clone()) {
                        Ok(connection) => connection,
                        Err(error) => {
                            warn!(%error, "dropping malformed probe-disconnected record");
                            continue;
                        },
                    };

                let map = gateway.active_probes();
                let removed = match map.remove(&connection.instance_id).await {
                    Ok(removed) => removed,
                    Err(error) => {
                        warn!(%error, probe_id = %connection.instance_id, "failed to remove active probe");
                        continue;
                    },
                };
                let Some(removed) = removed else {
                    warn!(probe_id = %connection.instance_id, "disconnect for unknown probe");
                    continue;
                };

                if let Err(error) = gateway
                    .storage
                    .counter(platform::PROBE_CONNECTED)
                    .decrement_and_get()
                    .await
                {
                    warn!(%error, "failed to decrement fleet counter");
                }
                for remote in removed.remotes() {
                    if let Err(error) =
                        gateway.storage.counter(&remote).decrement_and_get().await
                    {
                        warn!(%error, remote, "failed to decrement remote counter");
                    }
                }
                debug!(probe_id = %connection.instance_id, "active probe removed");
            }
        })
    }
}
