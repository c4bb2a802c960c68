//! Well-known bus addresses and shared-state names.
//!
//! Addresses are partitioned by who listens on them:
//!
//! - [`platform`]: platform-internal lifecycle addresses (probe connect and
//!   disconnect notifications)
//! - [`processor`]: addresses processors consume (remote registration,
//!   instrument lifecycle)
//! - [`probe`]: addresses the platform uses to reach probes
//!
//! The connected-probe fleet counter is keyed by
//! [`platform::PROBE_CONNECTED`] itself; per-remote load counters are keyed
//! by the remote address string.

/// Platform-internal lifecycle addresses.
pub mod platform {
    /// Published when a probe completes its connection handshake.
    pub const PROBE_CONNECTED: &str = "spp.platform.status.probe-connected";

    /// Published when a probe's transport closes.
    pub const PROBE_DISCONNECTED: &str = "spp.platform.status.probe-disconnected";
}

/// Addresses consumed by platform processors.
pub mod processor {
    /// A probe registered a remote-service address.
    pub const REMOTE_REGISTERED: &str = "spp.processor.status.remote-registered";

    /// A live instrument was applied inside a monitored application.
    pub const LIVE_INSTRUMENT_APPLIED: &str = "spp.processor.status.live-instrument-applied";

    /// A live instrument was removed from a monitored application.
    pub const LIVE_INSTRUMENT_REMOVED: &str = "spp.processor.status.live-instrument-removed";
}

/// Addresses the platform uses to reach probes.
pub mod probe {
    /// Base address of the live-instrument remote service. Instance-scoped
    /// variants append `:<instance-id>`.
    pub const LIVE_INSTRUMENT_REMOTE: &str = "spp.probe.command.live-instrument-remote";
}

/// Shared-state names owned by the bridge.
pub mod bridge {
    /// Shared map of currently connected probes, keyed by instance id.
    pub const ACTIVE_PROBES: &str = "bridge.active-probes";
}
