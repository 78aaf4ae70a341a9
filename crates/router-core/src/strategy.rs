//! StrategyOrchestrator: a priority-ordered chain of strategies that may
//! short-circuit the adaptive scorer with a forced model selection.
//!
//! Each strategy is independently fallible; a strategy that errors is logged
//! and skipped rather than aborting the whole orchestration, mirroring the
//! teacher's pattern of treating one failed subsystem as non-fatal to the
//! overall routing decision (see `IntelligentRouter::route`'s history-recording
//! being best-effort around the actual decision).

use chrono::{DateTime, Utc};
use router_common::{Clock, ModelId, ProviderId, Result, TaskContext};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A forced model selection from one strategy in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDecision {
    pub model_id: ModelId,
    pub strategy_name: String,
}

#[async_trait::async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> i32;

    /// Evaluate against the current task context. `is_stuck` carries the
    /// latest `StuckBugDetector` verdict for this session, since only
    /// `PerspectiveSwitch` reads it.
    async fn evaluate(&self, ctx: &TaskContext, is_stuck: bool) -> Result<Option<StrategyDecision>>;
}

/// ManualOverride (priority 999). Highest priority: if an override model is
/// set, it wins verbatim until cleared or its deadline passes.
pub struct ManualOverride {
    clock: Arc<dyn Clock>,
    state: Mutex<Option<(ModelId, Option<DateTime<Utc>>)>>,
}

impl ManualOverride {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, state: Mutex::new(None) }
    }

    pub async fn set(&self, model_id: ModelId, deadline: Option<DateTime<Utc>>) {
        *self.state.lock().await = Some((model_id, deadline));
    }

    pub async fn clear(&self) {
        *self.state.lock().await = None;
    }
}

#[async_trait::async_trait]
impl Strategy for ManualOverride {
    fn name(&self) -> &'static str {
        "manual_override"
    }

    fn priority(&self) -> i32 {
        999
    }

    async fn evaluate(&self, _ctx: &TaskContext, _is_stuck: bool) -> Result<Option<StrategyDecision>> {
        let mut state = self.state.lock().await;
        match state.as_ref() {
            Some((_, Some(deadline))) if self.clock.now_utc() >= *deadline => {
                *state = None;
                Ok(None)
            }
            Some((model_id, _)) => Ok(Some(StrategyDecision {
                model_id: model_id.clone(),
                strategy_name: self.name().to_string(),
            })),
            None => Ok(None),
        }
    }
}

/// ProjectStart (priority 100). Forces a high-power model on the first task
/// of each session, then self-deactivates for that session.
pub struct ProjectStart {
    forced_model: ModelId,
    seen_sessions: Mutex<std::collections::HashSet<String>>,
}

impl ProjectStart {
    pub fn new(forced_model: ModelId) -> Self {
        Self { forced_model, seen_sessions: Mutex::new(std::collections::HashSet::new()) }
    }
}

#[async_trait::async_trait]
impl Strategy for ProjectStart {
    fn name(&self) -> &'static str {
        "project_start"
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn evaluate(&self, ctx: &TaskContext, _is_stuck: bool) -> Result<Option<StrategyDecision>> {
        let Some(session_id) = &ctx.session_id else { return Ok(None) };
        let mut seen = self.seen_sessions.lock().await;
        if seen.contains(session_id) {
            return Ok(None);
        }
        seen.insert(session_id.clone());
        Ok(Some(StrategyDecision { model_id: self.forced_model.clone(), strategy_name: self.name().to_string() }))
    }
}

/// Bounded per-session history of models displaced by `PerspectiveSwitch`,
/// so the pre-switch model can be restored once the stuck condition clears.
pub struct ReversionManager {
    capacity: usize,
    history: Mutex<HashMap<String, Vec<ModelId>>>,
}

impl ReversionManager {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, history: Mutex::new(HashMap::new()) }
    }

    pub async fn remember(&self, session_id: &str, model_id: ModelId) {
        let mut history = self.history.lock().await;
        let entry = history.entry(session_id.to_string()).or_default();
        entry.push(model_id);
        if entry.len() > self.capacity {
            let drop = entry.len() - self.capacity;
            entry.drain(0..drop);
        }
    }

    /// Pop (one-shot) the most recently remembered model for `session_id`.
    pub async fn take(&self, session_id: &str) -> Option<ModelId> {
        let mut history = self.history.lock().await;
        history.get_mut(session_id).and_then(|entry| entry.pop())
    }
}

/// PerspectiveSwitch (priority 90). While the task is `stuck`, forces a
/// deliberately different, high-power model; once unstuck, restores whatever
/// model was displaced.
pub struct PerspectiveSwitch {
    alternative_model: ModelId,
    reversion: Arc<ReversionManager>,
    last_model_by_session: Mutex<HashMap<String, ModelId>>,
}

impl PerspectiveSwitch {
    pub fn new(alternative_model: ModelId, reversion: Arc<ReversionManager>) -> Self {
        Self { alternative_model, reversion, last_model_by_session: Mutex::new(HashMap::new()) }
    }

    /// Called by the router after every selection so this strategy knows
    /// which model was in use before a potential switch.
    pub async fn record_selection(&self, session_id: &str, model_id: ModelId) {
        self.last_model_by_session.lock().await.insert(session_id.to_string(), model_id);
    }
}

#[async_trait::async_trait]
impl Strategy for PerspectiveSwitch {
    fn name(&self) -> &'static str {
        "perspective_switch"
    }

    fn priority(&self) -> i32 {
        90
    }

    async fn evaluate(&self, ctx: &TaskContext, is_stuck: bool) -> Result<Option<StrategyDecision>> {
        let session_id = ctx.session_id.clone().unwrap_or_default();

        if is_stuck {
            if let Some(current) = self.last_model_by_session.lock().await.get(&session_id).cloned() {
                if current != self.alternative_model {
                    self.reversion.remember(&session_id, current).await;
                }
            }
            return Ok(Some(StrategyDecision {
                model_id: self.alternative_model.clone(),
                strategy_name: self.name().to_string(),
            }));
        }

        if let Some(prior) = self.reversion.take(&session_id).await {
            return Ok(Some(StrategyDecision { model_id: prior, strategy_name: format!("{}_reversion", self.name()) }));
        }

        Ok(None)
    }
}

/// FallbackLayer (priority 0, the default). A per-intent ordered chain of
/// `(provider_id, model_id)` layers; iterates from a shared cursor so
/// concurrent demotions don't skip more than one layer at once.
pub struct FallbackLayer {
    catalog: HashMap<String, Vec<(ProviderId, ModelId)>>,
    cursor: Mutex<usize>,
}

impl FallbackLayer {
    pub fn new(catalog: HashMap<String, Vec<(ProviderId, ModelId)>>) -> Self {
        Self { catalog, cursor: Mutex::new(0) }
    }

    /// Advance the shared cursor by one layer, serialised so two concurrent
    /// 429/quota signals on the same provider chain don't advance it twice.
    pub async fn advance_layer(&self, reason: &str) {
        let mut cursor = self.cursor.lock().await;
        *cursor += 1;
        debug!(reason, new_cursor = *cursor, "fallback layer advanced");
    }
}

#[async_trait::async_trait]
impl Strategy for FallbackLayer {
    fn name(&self) -> &'static str {
        "fallback_layer"
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn evaluate(&self, ctx: &TaskContext, _is_stuck: bool) -> Result<Option<StrategyDecision>> {
        let Some(layers) = self.catalog.get(&ctx.task_type) else { return Ok(None) };
        if layers.is_empty() {
            return Ok(None);
        }
        let cursor = *self.cursor.lock().await;
        for offset in 0..layers.len() {
            let idx = (cursor + offset) % layers.len();
            let (_, model_id) = &layers[idx];
            return Ok(Some(StrategyDecision { model_id: model_id.clone(), strategy_name: self.name().to_string() }));
        }
        Ok(None)
    }
}

/// Priority-ordered chain of strategies, highest priority first.
pub struct StrategyOrchestrator {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyOrchestrator {
    pub fn new(mut strategies: Vec<Arc<dyn Strategy>>) -> Self {
        strategies.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { strategies }
    }

    /// Consult each strategy in priority order; the first non-null decision
    /// wins. A strategy whose `evaluate` errors is logged and skipped.
    pub async fn evaluate(&self, ctx: &TaskContext, is_stuck: bool) -> Option<StrategyDecision> {
        for strategy in &self.strategies {
            match strategy.evaluate(ctx, is_stuck).await {
                Ok(Some(decision)) => return Some(decision),
                Ok(None) => continue,
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "strategy evaluation failed, skipping");
                    continue;
                }
            }
        }
        None
    }
}
