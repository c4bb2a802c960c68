//! probegate-core - Wire protocol types for the probegate gateway.
//!
//! This crate holds everything a probe and the platform must agree on:
//! the JSON message envelope exchanged over the bridge transports, the
//! length-prefixed frame codec used by the raw TCP transport, the
//! well-known platform addresses, and the client-authentication and
//! instance-connection records carried in message headers and bodies.
//!
//! The daemon (`probegate-daemon`) consumes these types on the server
//! side; probe clients embed this crate to speak the same wire format.
//!
//! # Modules
//!
//! - [`address`]: Well-known bus addresses and shared-state names
//! - [`auth`]: Client access credentials and the `client_auth` header
//! - [`codec`]: Length-prefixed JSON frame codec for the TCP transport
//! - [`envelope`]: The bridge message envelope and event kinds
//! - [`instance`]: Probe connection and active-instance records

pub mod address;
pub mod auth;
pub mod codec;
pub mod envelope;
pub mod instance;

pub use auth::{ClientAccess, ClientAuth};
pub use codec::{encode_frame, CodecError, EnvelopeCodec, MAX_FRAME_SIZE};
pub use envelope::{Envelope, EventKind, header};
pub use instance::{ActiveInstance, InstanceConnection};
