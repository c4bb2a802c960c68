//! Probe-facing bridge gateway.
//!
//! The bridge translates transport-level connections (raw TCP frames or
//! WebSocket messages) into message-bus traffic, enforcing the probe
//! protocol on the way:
//!
//! 1. The transport adapter decodes envelopes and applies the direction's
//!    permission list. Messages on disallowed addresses are silently
//!    rejected and never reach gateway logic.
//! 2. [`ProbeBridge::handle_bridge_event`] validates and authenticates
//!    the event, binds probe identity on the probe-connected handshake,
//!    and stamps identity headers.
//! 3. Allowed traffic is relayed on the bus; `register` events attach a
//!    bus consumer whose messages flow back to the socket after outbound
//!    permission filtering.
//!
//! # Module Overview
//!
//! - [`auth`]: Probe authentication against configured client accesses
//! - [`connection`]: Transport-agnostic per-connection event loop
//! - [`event`]: Bridge socket capability trait and event verdicts
//! - [`permitted`]: Direction-partitioned address permission lists
//! - [`probe`]: The gateway state machine and its bus-side-effect
//!   consumers
//! - [`tcp`]: Raw TCP transport adapter
//! - [`ws`]: WebSocket transport adapter

pub mod auth;
pub mod connection;
pub mod event;
pub mod permitted;
pub mod probe;
pub mod tcp;
pub mod ws;

pub use event::{BridgeSocket, DisconnectNotice, TransportError, Verdict};
pub use permitted::{PermissionList, PermittedAddress};
pub use probe::ProbeBridge;
pub use tcp::TcpBridge;
pub use ws::WsBridge;
