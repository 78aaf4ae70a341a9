//! Shared data model for the routing core and the learning core.
//!
//! These types cross crate boundaries as owned values — per the ownership rule,
//! cross-component state moves via typed messages (outcome, advice, signal),
//! never shared mutable handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;

/// Identifier for a model as it appears in the policy catalog.
pub type ModelId = String;

/// Identifier for an LLM provider (`openai`, `anthropic`, `nvidia`, ...).
pub type ProviderId = String;

/// Identifier for a single API key within a provider's pool.
pub type KeyId = String;

/// Identifier correlating an `Advice` to the `Outcome` that eventually learns from it.
pub type AdviceId = Uuid;

/// Static, per-process-lifetime metadata about one routable model.
///
/// Loaded once from the policy file (§6) and never mutated afterwards;
/// `ModelRouter` and `AdaptiveScorer` hold only shared read references to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPolicy {
    pub id: ModelId,
    pub provider: ProviderId,
    pub tools: HashSet<String>,
    pub strengths: HashSet<String>,
    pub task_types: HashSet<String>,
    pub default_success_rate: f64,
    pub default_latency_ms: u64,
    pub cost_per_1k_tokens: f64,
}

/// Health state of a single API key, as tracked by its `KeyRotator`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Healthy,
    Throttled,
    Cooldown,
    Dead,
}

/// One API key in a provider's pool, owned exclusively by that provider's `KeyRotator`.
///
/// Invariants: `status == Healthy` implies `now >= reset_at`; `failure_count >=
/// max_failures` forces `status = Dead` until manually reset; a key in `Cooldown`
/// is promoted to `Healthy` automatically on the first `acquire` past `reset_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderKey {
    pub id: KeyId,
    #[serde(skip_serializing)]
    pub secret: String,
    pub status: KeyStatus,
    /// `None` means unobserved (treated as unlimited until a header says otherwise).
    pub remaining_requests: Option<u64>,
    pub remaining_tokens: Option<u64>,
    #[serde(skip, default = "Instant::now")]
    pub reset_at: Instant,
    #[serde(skip, default = "Instant::now")]
    pub last_used: Instant,
    pub failure_count: u32,
}

impl ProviderKey {
    /// `now` should come from the same `Clock` the owning `KeyRotator` reads
    /// everywhere else, so a freshly constructed key is never born already
    /// past (or before) the rotator's notion of the current instant.
    pub fn new(id: KeyId, secret: String, now: Instant) -> Self {
        Self {
            id,
            secret,
            status: KeyStatus::Healthy,
            remaining_requests: None,
            remaining_tokens: None,
            reset_at: now,
            last_used: now,
            failure_count: 0,
        }
    }

    /// `min(remaining_requests, remaining_tokens)`, treating unobserved limits as unlimited.
    pub fn remaining_capacity(&self) -> u64 {
        match (self.remaining_requests, self.remaining_tokens) {
            (Some(r), Some(t)) => r.min(t),
            (Some(r), None) => r,
            (None, Some(t)) => t,
            (None, None) => u64::MAX,
        }
    }
}

/// Quota accounting mode for a provider's `QuotaAccount`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuotaType {
    RequestBased,
    Monthly,
}

/// Bucketised quota health, used both for routing decisions and health reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuotaBucket {
    Healthy,
    Warning,
    Critical,
    Exhausted,
}

/// Persistent per-provider quota accounting.
///
/// Invariant: `0 <= warning_threshold < critical_threshold <= 1`. For
/// `RequestBased`, `percent_used = request_count / quota_limit`; for `Monthly`,
/// `percent_used = tokens_used / quota_limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaAccount {
    pub provider_id: ProviderId,
    pub quota_type: QuotaType,
    pub quota_limit: u64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub request_count: u64,
    pub tokens_used: u64,
    pub period_start: DateTime<Utc>,
}

impl QuotaAccount {
    pub fn percent_used(&self) -> f64 {
        if self.quota_limit == 0 {
            return 1.0;
        }
        let used = match self.quota_type {
            QuotaType::RequestBased => self.request_count,
            QuotaType::Monthly => self.tokens_used,
        };
        (used as f64 / self.quota_limit as f64).min(1.0)
    }

    pub fn bucket(&self) -> QuotaBucket {
        let percent = self.percent_used();
        if percent >= 1.0 {
            QuotaBucket::Exhausted
        } else if percent >= self.critical_threshold {
            QuotaBucket::Critical
        } else if percent >= self.warning_threshold {
            QuotaBucket::Warning
        } else {
            QuotaBucket::Healthy
        }
    }
}

/// Running per-model call statistics, persisted atomically after every update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
}

impl ModelStats {
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.successes as f64 / self.calls as f64
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.calls as f64
    }

    pub fn record(&mut self, success: bool, latency_ms: u64) {
        self.calls += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_latency_ms += latency_ms;
    }
}

/// Severity of a learned pattern; also its initial catalog weight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Initial weight contributed by a pattern at this severity, before any repeat bonus.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Critical => 10.0,
            Severity::High => 7.0,
            Severity::Medium => 4.0,
            Severity::Low => 2.0,
            Severity::Info => 1.0,
        }
    }
}

/// The kind of failure mode an `AntiPattern` records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AntiPatternType {
    FailedDebug,
    InefficientSolution,
    RepeatedMistake,
    WrongTool,
    TypeSuppression,
    ShotgunDebug,
    BrokenState,
    QuotaExhaustionRisk,
}

/// A weighted record of a recurring failure mode. Weight grows with recurrence
/// (capped at 50) and biases routing downward via the learning penalty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiPattern {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: AntiPatternType,
    pub description: String,
    pub severity: Severity,
    pub weight: f64,
    pub occurrences: u32,
    pub context: String,
    pub contexts: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl AntiPattern {
    pub const MAX_WEIGHT: f64 = 50.0;
    pub const MAX_CONTEXTS: usize = 10;

    pub fn new(kind: AntiPatternType, description: String, severity: Severity, context: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description,
            severity,
            weight: severity.weight(),
            occurrences: 1,
            context: context.clone(),
            contexts: vec![context],
            first_seen: now,
            last_seen: now,
        }
    }

    /// Apply the merge rule for a duplicate `(type, description, severity)` insert.
    pub fn merge_repeat(&mut self, context: String, now: DateTime<Utc>) {
        self.occurrences += 1;
        self.weight = (self.weight + 0.5 * self.severity.weight()).min(Self::MAX_WEIGHT);
        self.contexts.push(context);
        if self.contexts.len() > Self::MAX_CONTEXTS {
            let drop = self.contexts.len() - Self::MAX_CONTEXTS;
            self.contexts.drain(0..drop);
        }
        self.last_seen = now;
    }

    /// Whether `other` is the same logical pattern per the merge key.
    pub fn matches_key(&self, kind: AntiPatternType, description: &str, severity: Severity) -> bool {
        self.kind == kind && self.description == description && self.severity == severity
    }
}

/// The kind of success mode a `PositivePattern` records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PositivePatternType {
    EfficientDebug,
    CreativeSolution,
    GoodDelegation,
    CleanRefactor,
    FastResolution,
}

/// A soft suggestion drawn from past successes. Never contributes to risk scoring,
/// only to `Advice.suggestions`. Merged by description similarity (Jaccard, >= 0.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositivePattern {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: PositivePatternType,
    pub description: String,
    pub success_rate: f64,
    pub context: String,
    pub occurrences: u32,
}

impl PositivePattern {
    pub fn new(kind: PositivePatternType, description: String, success_rate: f64, context: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description,
            success_rate,
            context,
            occurrences: 1,
        }
    }
}

/// Input to a single routing decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_type: String,
    pub description: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub required_strengths: Vec<String>,
    pub max_budget: Option<f64>,
    pub max_latency_ms: Option<u64>,
    pub error_type: Option<String>,
    pub attempt_number: Option<u32>,
    pub task_id: Option<String>,
    pub session_id: Option<String>,
    pub complexity: Option<f64>,
    pub override_model_id: Option<ModelId>,
}

/// Why a fallback demotion happened, per the normative late `_extractQuotaSignal`
/// behaviour described in the design notes: quota pressure is distinguished from
/// other causes so the advisor can weight it correctly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    QuotaFallback,
    NonQuotaFallback,
}

/// Per-provider quota bundle, embedded in both `Advice` and outcome records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSignal {
    pub provider_id: ProviderId,
    pub percent_used: f64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub fallback_applied: bool,
    pub fallback_reason: Option<FallbackReason>,
    pub rotator_risk: f64,
}

impl QuotaSignal {
    /// Normalize an already-normalised signal: a no-op (round-trip property in §8).
    /// `rotator_risk` is clamped to `[0, 1]`; `percent_used` is clamped to `[0, 1]`
    /// and then forced to `1.0` once it has crossed `warning_threshold` (usage past
    /// the warning line is reported as fully used, not partially). If a fallback
    /// was applied and the caller left the reason unset, it's backfilled:
    /// `QuotaFallback` when usage crossed the warning threshold, `NonQuotaFallback`
    /// otherwise (the demotion happened for some other reason — an exhausted key
    /// rotator, an open circuit — while quota usage was still healthy).
    pub fn normalize(mut self) -> Self {
        let clamped = self.percent_used.clamp(0.0, 1.0);
        let past_warning = clamped >= self.warning_threshold;
        self.percent_used = if past_warning { 1.0 } else { clamped };

        if self.fallback_applied && self.fallback_reason.is_none() {
            self.fallback_reason = Some(if past_warning {
                FallbackReason::QuotaFallback
            } else {
                FallbackReason::NonQuotaFallback
            });
        }
        self.rotator_risk = self.rotator_risk.clamp(0.0, 1.0);
        self
    }
}

/// Strength of a piece of learned advice, driving how hard it biases routing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdviceStrength {
    Strong,
    Soft,
}

/// What a caller is expected to do with a piece of advice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdviceAction {
    BlockOrReview,
    Consider,
}

/// A single anti-pattern match surfaced to the scorer, tagged `Strong`/`BlockOrReview`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub pattern_id: Uuid,
    pub pattern_type: AntiPatternType,
    pub description: String,
    pub severity: Severity,
    pub strength: AdviceStrength,
    pub action: AdviceAction,
    pub match_score: f64,
}

/// A single positive-pattern match surfaced to the scorer, tagged `Soft`/`Consider`.
/// Never contributes to `risk_score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub pattern_id: Uuid,
    pub pattern_type: PositivePatternType,
    pub description: String,
    pub success_rate: f64,
    pub strength: AdviceStrength,
    pub action: AdviceAction,
}

/// A static-affinity-table-derived hint at which downstream agent/skillset fits best.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingHint {
    pub agent: String,
    pub skills: Vec<String>,
    pub confidence: f64,
}

/// Output of `OrchestrationAdvisor::advise`: everything the scorer needs to bias
/// a routing decision with learned and quota-pressure signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advice {
    pub id: AdviceId,
    pub warnings: Vec<Warning>,
    pub suggestions: Vec<Suggestion>,
    pub hint: Option<RoutingHint>,
    pub risk_score: f64,
    pub should_pause: bool,
    pub quota_signal: Option<QuotaSignal>,
}

impl Advice {
    /// An advice value carrying no signal at all, for contexts where the advisor
    /// has nothing on file (first-ever task, empty catalogs).
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
            hint: None,
            risk_score: 0.0,
            should_pause: false,
            quota_signal: None,
        }
    }
}

/// An enumerated reason tag for a routing `Selection`, replacing ad-hoc
/// concatenated "magic strings" (§9). `Display` renders the human-formatted
/// view used only in logs; machine consumers should match on the variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReasonTag {
    /// `ctx.override_model_id` matched a known model.
    Override,
    /// A strategy in the orchestrator chain short-circuited the scorer.
    Orchestrator(String),
    /// The adaptive scorer picked the highest-scoring candidate.
    Scored,
}

impl std::fmt::Display for ReasonTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasonTag::Override => write!(f, "override:modelId"),
            ReasonTag::Orchestrator(strategy) => write!(f, "orchestrator:{strategy}"),
            ReasonTag::Scored => write!(f, "scored"),
        }
    }
}

/// The result of a single `ModelRouter::route` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub model_id: ModelId,
    pub provider_id: ProviderId,
    pub key_id: KeyId,
    #[serde(skip_serializing)]
    pub secret: String,
    pub reason: ReasonTag,
    pub detail: String,
    pub score: Option<f64>,
}

impl Selection {
    /// Human-formatted reason string for logs, combining the tag and any task-level
    /// detail (e.g. `task=debug`) the caller attached.
    pub fn formatted_reason(&self) -> String {
        if self.detail.is_empty() {
            self.reason.to_string()
        } else {
            format!("{} ({})", self.reason, self.detail)
        }
    }
}

/// Post-hoc truth about one executed request, fed back through the `OutcomeBus`
/// to the rotator, circuit breaker, scorer stats, and learning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub model_id: ModelId,
    pub provider_id: ProviderId,
    pub key_id: Option<KeyId>,
    pub success: bool,
    pub latency_ms: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub error: Option<String>,
    pub advice_id: Option<AdviceId>,
    pub session_id: Option<String>,
    pub attempt_number: Option<u32>,
    pub fallback_applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anti_pattern_merge_caps_weight_at_fifty() {
        let now = Utc::now();
        let mut p = AntiPattern::new(
            AntiPatternType::TypeSuppression,
            "// @ts-ignore added".to_string(),
            Severity::High,
            "ctx0".to_string(),
            now,
        );
        for i in 1..20 {
            p.merge_repeat(format!("ctx{i}"), now);
        }
        assert_eq!(p.occurrences, 20);
        assert!(p.weight <= AntiPattern::MAX_WEIGHT);
    }

    #[test]
    fn anti_pattern_merge_three_times_matches_scenario_five() {
        let now = Utc::now();
        let mut p = AntiPattern::new(
            AntiPatternType::TypeSuppression,
            "// @ts-ignore added".to_string(),
            Severity::High,
            "ctx".to_string(),
            now,
        );
        p.merge_repeat("ctx".to_string(), now);
        p.merge_repeat("ctx".to_string(), now);
        assert_eq!(p.occurrences, 3);
        assert!((p.weight - (7.0 + 2.0 * (7.0 * 0.5))).abs() < 1e-9);
    }

    #[test]
    fn quota_account_buckets_by_threshold() {
        let account = QuotaAccount {
            provider_id: "p".to_string(),
            quota_type: QuotaType::Monthly,
            quota_limit: 1000,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            request_count: 0,
            tokens_used: 1000,
            period_start: Utc::now(),
        };
        assert_eq!(account.bucket(), QuotaBucket::Exhausted);
    }

    #[test]
    fn normalize_is_idempotent_on_already_normalised_signal() {
        let signal = QuotaSignal {
            provider_id: "p".to_string(),
            percent_used: 0.5,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            fallback_applied: false,
            fallback_reason: None,
            rotator_risk: 0.2,
        };
        let once = signal.clone().normalize();
        let twice = once.clone().normalize();
        assert_eq!(once.percent_used, twice.percent_used);
        assert_eq!(once.fallback_reason, twice.fallback_reason);
        assert_eq!(once.rotator_risk, twice.rotator_risk);
    }

    #[test]
    fn normalize_clamps_percent_used_to_one_past_the_warning_threshold() {
        let signal = QuotaSignal {
            provider_id: "p".to_string(),
            percent_used: 0.75,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            fallback_applied: false,
            fallback_reason: None,
            rotator_risk: 0.0,
        }
        .normalize();
        assert_eq!(signal.percent_used, 1.0);
    }

    #[test]
    fn normalize_backfills_quota_fallback_past_the_warning_threshold() {
        let signal = QuotaSignal {
            provider_id: "p".to_string(),
            percent_used: 0.95,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            fallback_applied: true,
            fallback_reason: None,
            rotator_risk: 0.0,
        }
        .normalize();
        assert_eq!(signal.fallback_reason, Some(FallbackReason::QuotaFallback));
    }

    #[test]
    fn normalize_backfills_non_quota_fallback_below_the_warning_threshold() {
        let signal = QuotaSignal {
            provider_id: "p".to_string(),
            percent_used: 0.1,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            fallback_applied: true,
            fallback_reason: None,
            rotator_risk: 0.0,
        }
        .normalize();
        assert_eq!(signal.fallback_reason, Some(FallbackReason::NonQuotaFallback));
        assert_eq!(signal.percent_used, 0.1);
    }
}
