//! LearningEngine: the façade wiring session ingestion, pattern catalogs, and
//! the advisor together, plus a small fixed-event hook registry.
//!
//! Grounded on the teacher's `PipelineAware`/`AlertManager` dispatch style in
//! its (now-removed) `alerts` module: a per-event list of callbacks, invoked
//! best-effort, with a failing callback logged and otherwise ignored.

use crate::advisor::{AdviceContext, OrchestrationAdvisor};
use crate::catalog::{AntiPatternCatalog, PositivePatternTracker, WarnContext};
use crate::extractor::{BackfillEngine, BackfillSummary, PatternExtractor};
use crate::session::Session;
use router_common::{
    atomic_store, AntiPatternType, Advice, Clock, Outcome, PositivePatternType, Result, Severity,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Bound on the in-memory advice cache `learn_from_outcome` consults to see
/// which warnings a now-completed request ignored.
const ADVICE_CACHE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEventKind {
    SessionIngested,
    PatternAdded,
    AdviceComputed,
    OutcomeLearned,
}

#[derive(Debug, Clone)]
pub enum HookEvent {
    SessionIngested { session_id: String },
    PatternAdded { pattern_id: Uuid },
    AdviceComputed { advice_id: Uuid },
    OutcomeLearned { advice_id: Option<Uuid> },
}

impl HookEvent {
    fn kind(&self) -> HookEventKind {
        match self {
            HookEvent::SessionIngested { .. } => HookEventKind::SessionIngested,
            HookEvent::PatternAdded { .. } => HookEventKind::PatternAdded,
            HookEvent::AdviceComputed { .. } => HookEventKind::AdviceComputed,
            HookEvent::OutcomeLearned { .. } => HookEventKind::OutcomeLearned,
        }
    }
}

pub type HookCallback = Arc<dyn Fn(&HookEvent) -> Result<()> + Send + Sync>;

fn infer_anti_pattern_type(failure_reason: &str) -> AntiPatternType {
    let lower = failure_reason.to_lowercase();
    if lower.contains("quota") || lower.contains("rate limit") {
        AntiPatternType::QuotaExhaustionRisk
    } else if lower.contains("suppress") || lower.contains("ignore") || lower.contains("ts-ignore") {
        AntiPatternType::TypeSuppression
    } else if lower.contains("same error") || lower.contains("again") || lower.contains("retry") {
        AntiPatternType::RepeatedMistake
    } else if lower.contains("unsupported tool") || lower.contains("wrong tool") {
        AntiPatternType::WrongTool
    } else if lower.contains("build failed") || lower.contains("test failed") {
        AntiPatternType::BrokenState
    } else {
        AntiPatternType::FailedDebug
    }
}

fn infer_severity(ignored_warnings: usize, tokens_used: u64, attempt_number: u32) -> Severity {
    if ignored_warnings >= 3 || attempt_number >= 5 {
        Severity::Critical
    } else if ignored_warnings >= 1 || tokens_used > 5_000 {
        Severity::High
    } else if attempt_number >= 2 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

pub struct LearningEngineConfig {
    pub session_dir: PathBuf,
    pub anti_pattern_store_path: PathBuf,
    pub positive_pattern_store_path: PathBuf,
}

/// Façade over pattern extraction, the catalogs, and the advisor.
pub struct LearningEngine {
    config: LearningEngineConfig,
    anti_patterns: Arc<AntiPatternCatalog>,
    positive_patterns: Arc<PositivePatternTracker>,
    extractor: Arc<PatternExtractor>,
    backfill: BackfillEngine,
    advisor: OrchestrationAdvisor,
    advice_cache: Mutex<HashMap<Uuid, Advice>>,
    hooks: Mutex<HashMap<HookEventKind, Vec<HookCallback>>>,
}

impl LearningEngine {
    pub async fn new(config: LearningEngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let loaded_anti = atomic_store::read_json_opt(&config.anti_pattern_store_path).await?.unwrap_or_default();
        let loaded_positive = atomic_store::read_json_opt(&config.positive_pattern_store_path).await?.unwrap_or_default();

        let anti_patterns = Arc::new(AntiPatternCatalog::from_patterns(clock, loaded_anti));
        let positive_patterns = Arc::new(PositivePatternTracker::from_patterns(loaded_positive));
        let extractor = Arc::new(PatternExtractor::new(anti_patterns.clone(), positive_patterns.clone()));
        let backfill = BackfillEngine::new(extractor.clone());
        let advisor = OrchestrationAdvisor::new(anti_patterns.clone(), positive_patterns.clone());

        Ok(Self {
            config,
            anti_patterns,
            positive_patterns,
            extractor,
            backfill,
            advisor,
            advice_cache: Mutex::new(HashMap::new()),
            hooks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn on(&self, kind: HookEventKind, callback: HookCallback) {
        self.hooks.lock().await.entry(kind).or_default().push(callback);
    }

    async fn emit_hook(&self, event: HookEvent) {
        let callbacks = {
            let hooks = self.hooks.lock().await;
            hooks.get(&event.kind()).cloned().unwrap_or_default()
        };
        for callback in callbacks {
            if let Err(err) = callback(&event) {
                tracing::error!(error = %err, event = ?event, "hook callback failed");
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        atomic_store::write_json_atomic(&self.config.anti_pattern_store_path, &self.anti_patterns.all().await).await?;
        atomic_store::write_json_atomic(&self.config.positive_pattern_store_path, &self.positive_patterns.all().await).await?;
        Ok(())
    }

    /// Load and extract a single historical session by id from the configured
    /// session directory.
    pub async fn ingest_session(&self, id: &str) -> Result<()> {
        let path = self.config.session_dir.join(format!("{id}.json"));
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| router_common::Error::Persistence(format!("reading session {id}: {e}")))?;
        let session: Session = serde_json::from_str(&contents)?;
        self.extractor.extract_from_session(&session).await;
        self.persist().await?;
        self.emit_hook(HookEvent::SessionIngested { session_id: id.to_string() }).await;
        Ok(())
    }

    /// Backfill every session under the configured session directory.
    pub async fn ingest_all(&self) -> Result<BackfillSummary> {
        let summary = self.backfill.backfill_directory(&self.config.session_dir).await?;
        self.persist().await?;
        self.emit_hook(HookEvent::SessionIngested { session_id: "*".to_string() }).await;
        Ok(summary)
    }

    pub async fn advise(&self, ctx: &WarnContext, quota_signal: Option<router_common::QuotaSignal>) -> Advice {
        let advice_ctx = AdviceContext { warn: ctx.clone(), quota_signal };
        let advice = self.advisor.advise(&advice_ctx).await;

        let mut cache = self.advice_cache.lock().await;
        if cache.len() >= ADVICE_CACHE_CAPACITY {
            if let Some(&oldest) = cache.keys().next() {
                cache.remove(&oldest);
            }
        }
        cache.insert(advice.id, advice.clone());
        drop(cache);

        self.emit_hook(HookEvent::AdviceComputed { advice_id: advice.id }).await;
        advice
    }

    /// Record the real-world outcome of a request, writing a new positive or
    /// anti-pattern depending on success and auto-persisting the catalogs.
    pub async fn learn_from_outcome(&self, advice_id: Option<Uuid>, outcome: &Outcome) -> Result<()> {
        let ignored_warnings = match advice_id {
            Some(id) => self.advice_cache.lock().await.get(&id).map(|a| a.warnings.len()).unwrap_or(0),
            None => 0,
        };

        let pattern_id = if outcome.success {
            self.positive_patterns
                .add(
                    PositivePatternType::FastResolution,
                    format!("successful completion on {}", outcome.model_id),
                    1.0,
                    outcome.provider_id.clone(),
                )
                .await
        } else {
            let failure_reason = outcome.error.clone().unwrap_or_default();
            let kind = infer_anti_pattern_type(&failure_reason);
            let tokens_used = outcome.tokens_input + outcome.tokens_output;
            let severity = infer_severity(ignored_warnings, tokens_used, outcome.attempt_number.unwrap_or(1));
            self.anti_patterns.add(kind, failure_reason, severity, outcome.provider_id.clone()).await
        };

        self.persist().await?;
        self.emit_hook(HookEvent::PatternAdded { pattern_id }).await;
        self.emit_hook(HookEvent::OutcomeLearned { advice_id }).await;
        Ok(())
    }
}
