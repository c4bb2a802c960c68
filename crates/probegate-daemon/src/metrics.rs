//! Prometheus metrics for gateway health observability.
//!
//! # Metrics Families
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `probegate_connections_active` | Gauge | `transport` |
//! | `probegate_bridge_events_total` | Counter | `kind`, `outcome` |
//! | `probegate_auth_failures_total` | Counter | — |
//!
//! Exported in Prometheus text format at `/metrics` on the side server;
//! `/healthz` reports liveness.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use prometheus::{CounterVec, Encoder, GaugeVec, IntCounter, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Gateway health metrics.
///
/// All metrics use interior mutability; the struct is `Clone`, `Send` and
/// `Sync`.
#[derive(Clone)]
pub struct GatewayMetrics {
    connections_active: GaugeVec,
    bridge_events_total: CounterVec,
    auth_failures_total: IntCounter,
}

impl GatewayMetrics {
    fn register(registry: &Registry) -> Result<Self, MetricsError> {
        let connections_active = GaugeVec::new(
            Opts::new(
                "probegate_connections_active",
                "Currently open bridge connections",
            ),
            &["transport"],
        )?;
        let bridge_events_total = CounterVec::new(
            Opts::new(
                "probegate_bridge_events_total",
                "Bridge events processed, by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let auth_failures_total = IntCounter::new(
            "probegate_auth_failures_total",
            "Probe authentication failures",
        )?;

        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(bridge_events_total.clone()))?;
        registry.register(Box::new(auth_failures_total.clone()))?;

        Ok(Self {
            connections_active,
            bridge_events_total,
            auth_failures_total,
        })
    }

    /// A transport connection opened.
    pub fn connection_opened(&self, transport: &str) {
        self.connections_active.with_label_values(&[transport]).inc();
    }

    /// A transport connection closed.
    pub fn connection_closed(&self, transport: &str) {
        self.connections_active.with_label_values(&[transport]).dec();
    }

    /// A bridge event completed with the given outcome.
    pub fn bridge_event(&self, kind: &str, outcome: &str) {
        self.bridge_events_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// A probe failed authentication.
    pub fn auth_failure(&self) {
        self.auth_failures_total.inc();
    }
}

/// Shared metrics registry for the gateway.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    gateway: GatewayMetrics,
}

impl MetricsRegistry {
    /// Create a registry with all gateway metrics registered.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if metric registration fails.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let gateway = GatewayMetrics::register(&registry)?;
        Ok(Self {
            registry: Arc::new(registry),
            gateway,
        })
    }

    /// Handle to the gateway metrics.
    #[must_use]
    pub fn gateway(&self) -> GatewayMetrics {
        self.gateway.clone()
    }

    /// Encode all metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::EncodingFailed`] on encoder failure.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

/// Build the `/metrics` + `/healthz` router for the side server.
#[must_use]
pub fn metrics_router(registry: MetricsRegistry) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    registry
                        .encode_text()
                        .unwrap_or_else(|e| format!("# encoding failed: {e}\n"))
                }
            }),
        )
        .route("/healthz", get(|| async { "ok" }))
}
