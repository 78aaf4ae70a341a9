//! Default `TelemetryCollector`: emits `tracing` events at the level the
//! teacher's `circuit_breaker.rs`/`intelligent_router.rs` use for equivalent
//! transitions, records `metrics` counters/gauges for a Prometheus scrape,
//! and keeps a small in-memory rollup for `get_aggregated_metrics`.

use crate::TelemetryCollector;
use async_trait::async_trait;
use router_common::{CircuitState, ComponentHealth, Error, ReasonTag, Result, Selection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// A point-in-time rollup of what this process has observed, for a caller
/// that wants numbers without standing up a Prometheus scraper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub routing_decisions: u64,
    pub routing_failures: u64,
    pub circuit_transitions: u64,
    pub rotator_degradations: u64,
    pub pattern_mutations: u64,
    pub decisions_by_reason: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct Rollup {
    routing_decisions: u64,
    routing_failures: u64,
    circuit_transitions: u64,
    rotator_degradations: u64,
    pattern_mutations: u64,
    decisions_by_reason: HashMap<String, u64>,
}

/// Default `TelemetryCollector`: `tracing` events plus `metrics` macros plus
/// an in-memory rollup.
pub struct StandardTelemetryCollector {
    rollup: Arc<RwLock<Rollup>>,
}

impl StandardTelemetryCollector {
    pub fn new() -> Self {
        Self { rollup: Arc::new(RwLock::new(Rollup::default())) }
    }

    fn reason_label(reason: &ReasonTag) -> &'static str {
        match reason {
            ReasonTag::Override => "override",
            ReasonTag::Orchestrator(_) => "orchestrator",
            ReasonTag::Scored => "scored",
        }
    }
}

impl Default for StandardTelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryCollector for StandardTelemetryCollector {
    async fn record_routing_decision(&self, selection: &Selection) {
        let reason = Self::reason_label(&selection.reason);
        debug!(
            model_id = %selection.model_id,
            provider_id = %selection.provider_id,
            reason,
            score = ?selection.score,
            "routing decision"
        );
        metrics::counter!("router_routing_decisions_total", "provider" => selection.provider_id.clone(), "reason" => reason).increment(1);

        let mut rollup = self.rollup.write().await;
        rollup.routing_decisions += 1;
        *rollup.decisions_by_reason.entry(reason.to_string()).or_insert(0) += 1;
    }

    async fn record_routing_failure(&self, task_type: &str, error: &Error) {
        warn!(task_type, %error, "routing failed: no candidate available");
        metrics::counter!("router_routing_failures_total", "task_type" => task_type.to_string()).increment(1);
        self.rollup.write().await.routing_failures += 1;
    }

    async fn record_circuit_transition(&self, provider_id: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(provider_id, ?from, ?to, "circuit opened"),
            CircuitState::HalfOpen => info!(provider_id, ?from, ?to, "circuit half-open, probing"),
            CircuitState::Closed => info!(provider_id, ?from, ?to, "circuit closed"),
        }
        metrics::gauge!("router_circuit_state", "provider" => provider_id.to_string()).set(circuit_state_score(to));
        self.rollup.write().await.circuit_transitions += 1;
    }

    async fn record_rotator_change(&self, provider_id: &str, healthy_keys: usize, total_keys: usize, is_exhausted: bool) {
        if is_exhausted {
            error!(provider_id, healthy_keys, total_keys, "key rotator exhausted");
        } else if healthy_keys < total_keys {
            warn!(provider_id, healthy_keys, total_keys, "key rotator degraded");
        } else {
            debug!(provider_id, healthy_keys, total_keys, "key rotator healthy");
        }
        metrics::gauge!("router_rotator_healthy_keys", "provider" => provider_id.to_string()).set(healthy_keys as f64);

        if is_exhausted || healthy_keys < total_keys {
            self.rollup.write().await.rotator_degradations += 1;
        }
    }

    async fn record_pattern_mutation(&self, pattern_kind: &str, occurrences: u32) {
        debug!(pattern_kind, occurrences, "pattern catalog mutation");
        metrics::counter!("router_pattern_mutations_total", "kind" => pattern_kind.to_string()).increment(1);
        self.rollup.write().await.pattern_mutations += 1;
    }

    async fn get_aggregated_metrics(&self) -> Result<AggregatedMetrics> {
        let rollup = self.rollup.read().await;
        Ok(AggregatedMetrics {
            routing_decisions: rollup.routing_decisions,
            routing_failures: rollup.routing_failures,
            circuit_transitions: rollup.circuit_transitions,
            rotator_degradations: rollup.rotator_degradations,
            pattern_mutations: rollup.pattern_mutations,
            decisions_by_reason: rollup.decisions_by_reason.clone(),
        })
    }

    async fn health_check(&self) -> ComponentHealth {
        let now = chrono::Utc::now();
        let rollup = self.rollup.read().await;
        if rollup.routing_decisions > 0 && rollup.routing_failures as f64 / rollup.routing_decisions as f64 > 0.5 {
            ComponentHealth::degraded("more than half of routing attempts have failed", now)
        } else {
            ComponentHealth::healthy("telemetry collector operational", now)
        }
    }
}

fn circuit_state_score(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 0.5,
        CircuitState::Open => 1.0,
    }
}
