//! Structured logging and metrics collection for the model-routing orchestrator.
//!
//! `TelemetryCollector` is the ambient-observability seam: every routing
//! decision, circuit transition, rotator state change, and learned-pattern
//! mutation is reported through it, mirroring the teacher's
//! `create_telemetry_collector`/`create_security_manager` factory-returns-
//! `Arc<dyn Trait>` style.

use async_trait::async_trait;
use router_common::{CircuitState, ComponentHealth, Error, Result, Selection};

mod standard_telemetry;

pub use standard_telemetry::{AggregatedMetrics, StandardTelemetryCollector};

/// Observability seam implemented by the default collector below; real
/// deployments may swap in a different sink (a different exporter, a no-op
/// collector in tests) behind the same trait.
#[async_trait]
pub trait TelemetryCollector: Send + Sync {
    /// A `ModelRouter::route` call picked a model and key.
    async fn record_routing_decision(&self, selection: &Selection);

    /// A `ModelRouter::route` call failed outright (no candidate available).
    async fn record_routing_failure(&self, task_type: &str, error: &Error);

    /// A provider's circuit breaker changed state.
    async fn record_circuit_transition(&self, provider_id: &str, from: CircuitState, to: CircuitState);

    /// A provider's key rotator health changed (key exhaustion, recovery, ...).
    async fn record_rotator_change(&self, provider_id: &str, healthy_keys: usize, total_keys: usize, is_exhausted: bool);

    /// A pattern catalog mutated (new pattern, or an existing one merged).
    async fn record_pattern_mutation(&self, pattern_kind: &str, occurrences: u32);

    async fn get_aggregated_metrics(&self) -> Result<AggregatedMetrics>;

    async fn health_check(&self) -> ComponentHealth;
}

/// Initialize the global `tracing` subscriber from `RUST_LOG`, defaulting to
/// `info` when unset. Call once at process startup.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Build the default telemetry collector and install a Prometheus metrics
/// recorder on `exporter_addr`, mirroring the teacher's
/// `create_telemetry_collector` factory function.
pub fn create_telemetry_collector(
    exporter_addr: std::net::SocketAddr,
) -> Result<std::sync::Arc<dyn TelemetryCollector>> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(exporter_addr);
    builder
        .install()
        .map_err(|e| Error::Configuration(format!("installing prometheus exporter: {e}")))?;

    Ok(std::sync::Arc::new(StandardTelemetryCollector::new()))
}
