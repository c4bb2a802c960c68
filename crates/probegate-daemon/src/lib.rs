//! probegate-daemon - Probe Connection Gateway Library
//!
//! This library provides the probe-facing connection gateway of the
//! probegate live-debugging platform. Remote probes embedded in monitored
//! applications establish long-lived raw-TCP or WebSocket connections to
//! the gateway, which validates and authenticates bridge events, enforces
//! address permission lists, tracks per-connection probe identity, and
//! relays allowed traffic onto the platform message bus.
//!
//! # Runtime Requirements
//!
//! This crate requires a tokio runtime. The `probegate-daemon` binary
//! configures tokio with `flavor = "multi_thread"` by default.
//!
//! # Modules
//!
//! - [`bridge`]: Probe-facing bridge gateway (event handling, permission
//!   lists, authentication, TCP and WebSocket transport adapters)
//! - [`bus`]: In-process publish/subscribe message bus
//! - [`cluster`]: Process-wide cluster context (standalone vs clustered
//!   mode, bus/storage/listener ownership)
//! - [`config`]: Gateway configuration parsing and validation
//! - [`listener`]: Multi-protocol listener sharing one port by sniffing
//!   initial connection bytes
//! - [`metrics`]: Prometheus metrics for gateway health observability
//! - [`storage`]: Shared state store (async maps and counters) and the
//!   TTL-expiring cache built atop it
//! - [`worker`]: Bounded worker pool for offloaded long-running work

pub mod bridge;
pub mod bus;
pub mod cluster;
pub mod config;
pub mod listener;
pub mod metrics;
pub mod storage;
pub mod worker;
