//! Demonstration binary: wires every routing and learning component together
//! and runs one route/record_result cycle against an in-memory policy set.
//!
//! Grounded on the teacher's `mcp-gateway` binary, which loaded configuration,
//! initialized tracing, assembled the gateway, and started the server. There
//! is no server here -- the facade is a library used directly by a caller --
//! so this binary plays that caller's part for a manual smoke test.

use learning_engine::{LearningEngine, LearningEngineConfig};
use model_router::{ModelRouter, ModelRouterComponents};
use router_common::{
    CircuitBreakerConfig, CircuitBreakerRegistry, Clock, ModelPolicy, QuotaType, SystemClock, TaskContext,
};
use router_core::{AdaptiveScorer, FallbackLayer, PerspectiveSwitch, ReversionManager, StrategyOrchestrator, StuckBugDetector};
use router_keys::KeyRotator;
use router_policy::PolicyCatalog;
use router_quota::{QuotaAccountConfig, QuotaManager};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

fn demo_policy() -> Vec<ModelPolicy> {
    vec![
        ModelPolicy {
            id: "gpt-4o".to_string(),
            provider: "openai".to_string(),
            tools: HashSet::from(["code_search".to_string(), "bash".to_string()]),
            strengths: HashSet::from(["reasoning".to_string()]),
            task_types: HashSet::from(["debug".to_string(), "feature".to_string()]),
            default_success_rate: 0.9,
            default_latency_ms: 2500,
            cost_per_1k_tokens: 5.0,
        },
        ModelPolicy {
            id: "claude-3-5-sonnet".to_string(),
            provider: "anthropic".to_string(),
            tools: HashSet::from(["code_search".to_string(), "bash".to_string()]),
            strengths: HashSet::from(["reasoning".to_string(), "long_context".to_string()]),
            task_types: HashSet::from(["debug".to_string(), "feature".to_string()]),
            default_success_rate: 0.92,
            default_latency_ms: 2200,
            cost_per_1k_tokens: 3.0,
        },
    ]
}

#[tokio::main]
async fn main() -> router_common::Result<()> {
    router_telemetry::init_tracing();

    let policy = Arc::new(PolicyCatalog::new(demo_policy()));

    let mut rotators = HashMap::new();
    rotators.insert(
        "openai".to_string(),
        Arc::new(KeyRotator::new(
            "openai",
            vec![("openai-key-1".to_string(), "sk-demo-openai".to_string())],
            Default::default(),
        )),
    );
    rotators.insert(
        "anthropic".to_string(),
        Arc::new(KeyRotator::new(
            "anthropic",
            vec![("anthropic-key-1".to_string(), "sk-demo-anthropic".to_string())],
            Default::default(),
        )),
    );

    let circuit_breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));

    let mut accounts = HashMap::new();
    accounts.insert(
        "openai".to_string(),
        QuotaAccountConfig { quota_type: QuotaType::RequestBased, quota_limit: 1_000_000, warning_threshold: 0.7, critical_threshold: 0.9 },
    );
    accounts.insert(
        "anthropic".to_string(),
        QuotaAccountConfig { quota_type: QuotaType::RequestBased, quota_limit: 1_000_000, warning_threshold: 0.7, critical_threshold: 0.9 },
    );
    let quota = Arc::new(QuotaManager::new("demo-quota.sqlite3", accounts).await?);

    let scorer = Arc::new(AdaptiveScorer::new(Default::default()));

    let mut fallback_catalog = HashMap::new();
    fallback_catalog.insert(
        "debug".to_string(),
        vec![("anthropic".to_string(), "claude-3-5-sonnet".to_string()), ("openai".to_string(), "gpt-4o".to_string())],
    );
    let perspective_switch =
        Arc::new(PerspectiveSwitch::new("claude-3-5-sonnet".to_string(), Arc::new(ReversionManager::new(8))));
    let strategy_orchestrator = Arc::new(StrategyOrchestrator::new(vec![
        Arc::new(FallbackLayer::new(fallback_catalog)),
        perspective_switch.clone(),
    ]));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stuck_detector = Arc::new(StuckBugDetector::new(Default::default(), clock.clone()));

    let learning_engine = Arc::new(
        LearningEngine::new(
            LearningEngineConfig {
                session_dir: "demo-sessions".into(),
                anti_pattern_store_path: "demo-anti-patterns.json".into(),
                positive_pattern_store_path: "demo-positive-patterns.json".into(),
            },
            clock.clone(),
        )
        .await?,
    );

    let telemetry = Arc::new(router_telemetry::StandardTelemetryCollector::new());

    let router = ModelRouter::new(ModelRouterComponents {
        policy,
        rotators,
        circuit_breakers,
        quota,
        scorer,
        strategy_orchestrator,
        stuck_detector,
        learning_engine,
        telemetry,
        stats_path: "demo-model-stats.json".into(),
        outcome_bus_capacity: model_router::DEFAULT_CAPACITY,
        perspective_switch: Some(perspective_switch),
    })
    .await?;

    let ctx = TaskContext { task_type: "debug".to_string(), ..Default::default() };

    let selection = router.route(&ctx).await?;
    info!(model = %selection.model_id, provider = %selection.provider_id, reason = ?selection.reason, "routed task");

    router.record_result(&selection, &ctx, true, 1800, 512, 256, None).await?;
    info!("recorded a successful outcome");

    Ok(())
}
