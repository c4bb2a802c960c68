//! Bridge socket capabilities and gateway event verdicts.
//!
//! The gateway state machine is transport-agnostic: it sees each
//! connection through the [`BridgeSocket`] trait, which exposes a stable
//! write-handle id and a slot for the disconnect notice armed during the
//! probe-connected handshake. The notice is taken exactly once when the
//! connection closes, so disconnect cleanup runs at most once per
//! connection.

use std::collections::BTreeMap;
use std::sync::Mutex;

use probegate_core::{CodecError, Envelope};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Payload republished when a bound connection closes.
#[derive(Debug, Clone)]
pub struct DisconnectNotice {
    /// Body to publish on the probe-disconnected address.
    pub body: Value,
    /// Headers to carry along (probe id, auth context).
    pub headers: BTreeMap<String, String>,
}

/// Per-connection state the gateway needs from a transport.
pub trait BridgeSocket: Send + Sync {
    /// Stable id identifying this connection's write handle.
    fn write_handle_id(&self) -> &str;

    /// Arm the disconnect notice for this connection, replacing any
    /// previously armed notice.
    fn install_disconnect_notice(&self, notice: DisconnectNotice);

    /// Take the armed disconnect notice, leaving the slot empty.
    fn take_disconnect_notice(&self) -> Option<DisconnectNotice>;
}

/// Default [`BridgeSocket`] backing both transports.
pub struct BridgeSocketState {
    write_handle_id: String,
    disconnect_notice: Mutex<Option<DisconnectNotice>>,
}

impl BridgeSocketState {
    /// Create state with a fresh write-handle id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            write_handle_id: Uuid::new_v4().to_string(),
            disconnect_notice: Mutex::new(None),
        }
    }
}

impl Default for BridgeSocketState {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeSocket for BridgeSocketState {
    fn write_handle_id(&self) -> &str {
        &self.write_handle_id
    }

    fn install_disconnect_notice(&self, notice: DisconnectNotice) {
        *self
            .disconnect_notice
            .lock()
            .expect("disconnect notice lock poisoned") = Some(notice);
    }

    fn take_disconnect_notice(&self) -> Option<DisconnectNotice> {
        self.disconnect_notice
            .lock()
            .expect("disconnect notice lock poisoned")
            .take()
    }
}

/// Outcome of passing one event through the gateway.
#[derive(Debug)]
pub enum Verdict {
    /// Event may proceed, possibly rewritten (headers stamped, address
    /// redirected).
    Allow(Envelope),
    /// Event is dropped; the connection stays open.
    Reject {
        /// Human-readable rejection reason, logged at the call site.
        reason: String,
    },
}

impl Verdict {
    /// Rejection with a reason.
    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }
}

/// Transport-level failure on a bridge connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame codec failure on the raw TCP transport.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// WebSocket protocol failure.
    #[error(transparent)]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    /// Envelope JSON failure on the WebSocket transport.
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn notice_is_taken_once() {
        let socket = BridgeSocketState::new();
        socket.install_disconnect_notice(DisconnectNotice {
            body: json!({"instanceId": "p-1"}),
            headers: BTreeMap::new(),
        });

        assert!(socket.take_disconnect_notice().is_some());
        assert!(socket.take_disconnect_notice().is_none());
    }

    #[test]
    fn installing_replaces_previous_notice() {
        let socket = BridgeSocketState::new();
        socket.install_disconnect_notice(DisconnectNotice {
            body: json!(1),
            headers: BTreeMap::new(),
        });
        socket.install_disconnect_notice(DisconnectNotice {
            body: json!(2),
            headers: BTreeMap::new(),
        });

        assert_eq!(socket.take_disconnect_notice().unwrap().body, json!(2));
    }

    #[test]
    fn write_handle_ids_are_unique() {
        let a = BridgeSocketState::new();
        let b = BridgeSocketState::new();
        assert_ne!(a.write_handle_id(), b.write_handle_id());
    }
}
