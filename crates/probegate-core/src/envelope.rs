//! The bridge message envelope.
//!
//! Every message crossing a bridge transport is a JSON envelope carrying an
//! event kind, a bus address, string headers, and an opaque JSON body. The
//! envelope structure is typed; the body schema is owned by out-of-scope
//! collaborators and stays opaque here.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "type": "publish",
//!   "address": "spp.platform.status.probe-connected",
//!   "headers": { "probe_id": "..." },
//!   "body": { ... }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known header keys.
pub mod header {
    /// Probe instance id, stamped by the gateway once a connection is bound.
    pub const PROBE_ID: &str = "probe_id";

    /// Serialized [`ClientAuth`](crate::auth::ClientAuth) context.
    pub const CLIENT_AUTH: &str = "client_auth";

    /// Client access id presented by the probe.
    pub const CLIENT_ID: &str = "client_id";

    /// Client access secret presented by the probe.
    pub const CLIENT_SECRET: &str = "client_secret";

    /// Optional tenant the probe reports under.
    pub const TENANT_ID: &str = "tenant_id";
}

/// Kind of a bridge event.
///
/// Closed set: unknown kinds fail deserialization at the codec layer and
/// never reach the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Point-to-point message to one consumer of the address.
    Send,
    /// Fan-out message to every consumer of the address.
    Publish,
    /// Request to subscribe this connection to an address.
    Register,
    /// Request to remove a subscription.
    Unregister,
    /// Acknowledgement that an address was registered for this connection.
    Registered,
    /// Server-to-probe delivery of a bus message to a registered address.
    Message,
    /// Liveness probe from the client.
    Ping,
    /// Liveness response from the server.
    Pong,
}

impl EventKind {
    /// Lowercase wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Publish => "publish",
            Self::Register => "register",
            Self::Unregister => "unregister",
            Self::Registered => "registered",
            Self::Message => "message",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// A message envelope exchanged over a bridge transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Bus address the message targets.
    pub address: String,

    /// String headers. Ordered map so serialized envelopes are stable.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Opaque JSON body. Schema owned by the addressed collaborator.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl Envelope {
    /// Create an envelope of the given kind with an empty body.
    #[must_use]
    pub fn new(kind: EventKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            headers: BTreeMap::new(),
            body: Value::Null,
        }
    }

    /// Create a `publish` envelope with a body.
    #[must_use]
    pub fn publish(address: impl Into<String>, body: Value) -> Self {
        Self {
            body,
            ..Self::new(EventKind::Publish, address)
        }
    }

    /// Create a `send` envelope with a body.
    #[must_use]
    pub fn send(address: impl Into<String>, body: Value) -> Self {
        Self {
            body,
            ..Self::new(EventKind::Send, address)
        }
    }

    /// Create a `register` envelope (subscription request).
    #[must_use]
    pub fn register(address: impl Into<String>) -> Self {
        Self::new(EventKind::Register, address)
    }

    /// Set a header, replacing any existing value.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Returns `true` for the kinds the gateway authenticates
    /// (`send`/`publish`/`register`).
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Send | EventKind::Publish | EventKind::Register
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_names_are_lowercase() {
        let env = Envelope::publish("addr", json!({"k": "v"}));
        let encoded = serde_json::to_value(&env).unwrap();
        assert_eq!(encoded["type"], "publish");
        assert_eq!(encoded["address"], "addr");
    }

    #[test]
    fn missing_headers_and_body_default() {
        let env: Envelope = serde_json::from_str(r#"{"type":"ping","address":"a"}"#).unwrap();
        assert_eq!(env.kind, EventKind::Ping);
        assert!(env.headers.is_empty());
        assert!(env.body.is_null());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result = serde_json::from_str::<Envelope>(r#"{"type":"replay","address":"a"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn auth_required_kinds() {
        assert!(Envelope::new(EventKind::Send, "a").requires_auth());
        assert!(Envelope::new(EventKind::Publish, "a").requires_auth());
        assert!(Envelope::new(EventKind::Register, "a").requires_auth());
        assert!(!Envelope::new(EventKind::Registered, "a").requires_auth());
        assert!(!Envelope::new(EventKind::Ping, "a").requires_auth());
    }

    #[test]
    fn header_roundtrip() {
        let env = Envelope::register("a").with_header(header::PROBE_ID, "p-1");
        assert_eq!(env.header(header::PROBE_ID), Some("p-1"));
        assert_eq!(env.header(header::TENANT_ID), None);
    }
}
