//! Probe connection and active-instance records.
//!
//! [`InstanceConnection`] is the handshake body a probe sends on the
//! probe-connected address. [`ActiveInstance`] is the cluster-visible
//! projection the bridge writes into the shared active-probes map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the `remotes` array inside instance metadata.
pub const META_REMOTES: &str = "remotes";

/// Handshake body sent by a probe on connect.
///
/// The `instance_id` is assigned by the probe itself and is globally unique
/// per live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConnection {
    /// Probe-assigned instance id.
    pub instance_id: String,
    /// Probe-side connection time, unix milliseconds.
    pub connection_time: i64,
    /// Free-form metadata (`remotes` array plus probe-owned keys).
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Cluster-visible record of one currently connected probe.
///
/// Sole writer is the bridge gateway; monitoring collaborators read it from
/// the shared active-probes map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveInstance {
    /// Probe-assigned instance id.
    pub instance_id: String,
    /// Platform-side connect time, unix milliseconds.
    pub connected_at: i64,
    /// Metadata carried over from the handshake, mutated as remotes register.
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl ActiveInstance {
    /// Build the active-instance projection of a handshake at `connected_at`.
    #[must_use]
    pub fn from_connection(conn: &InstanceConnection, connected_at: i64) -> Self {
        Self {
            instance_id: conn.instance_id.clone(),
            connected_at,
            meta: conn.meta.clone(),
        }
    }

    /// Registered remote addresses, in registration order.
    #[must_use]
    pub fn remotes(&self) -> Vec<String> {
        self.meta
            .get(META_REMOTES)
            .and_then(Value::as_array)
            .map(|remotes| {
                remotes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a remote address to the metadata, creating the array on first
    /// registration.
    pub fn push_remote(&mut self, remote: impl Into<String>) {
        let remote = Value::String(remote.into());
        match self.meta.get_mut(META_REMOTES).and_then(Value::as_array_mut) {
            Some(remotes) => remotes.push(remote),
            None => {
                self.meta
                    .insert(META_REMOTES.to_string(), Value::Array(vec![remote]));
            },
        }
    }
}
