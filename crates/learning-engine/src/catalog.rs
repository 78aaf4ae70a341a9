//! AntiPatternCatalog / PositivePatternTracker: weighted, merge-on-similar
//! pattern stores that feed `OrchestrationAdvisor`.
//!
//! Grounded on the teacher's `AlertManager` for the shape of a shared,
//! mutex-guarded store that many call sites append to and a background
//! consumer (here, the advisor) reads from — generalized from an mpsc queue
//! of outbound alerts to an in-memory catalog of inbound observations.

use router_common::{
    utils::jaccard_similarity, AdviceAction, AdviceStrength, AntiPattern, AntiPatternType, Clock, PositivePattern,
    PositivePatternType, Severity, Suggestion, Warning,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Context a stored anti-pattern is matched against when computing risk.
#[derive(Debug, Clone, Default)]
pub struct WarnContext {
    pub task_type: String,
    pub error_type: Option<String>,
    pub attempt_number: Option<u32>,
    pub tool: Option<String>,
    pub action: Option<String>,
    pub files: Vec<String>,
}

const SUPPRESSION_MARKERS: &[&str] = &["any", "ignore", "suppress", "ts-ignore"];

fn same_directory(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let dir_of = |p: &str| p.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    !dir_of(a).is_empty() && dir_of(a) == dir_of(b)
}

/// Per-type trigger condition and weight multiplier from the documented table.
/// Patterns whose type has no documented trigger (`FailedDebug`,
/// `QuotaExhaustionRisk`) never contribute here — `QuotaExhaustionRisk` is
/// injected synthetically by the advisor instead.
fn multiplier_if_triggered(pattern: &AntiPattern, ctx: &WarnContext) -> Option<f64> {
    match pattern.kind {
        AntiPatternType::ShotgunDebug => (ctx.attempt_number.unwrap_or(0) >= 3).then_some(3.0),
        AntiPatternType::RepeatedMistake => {
            let error_type = ctx.error_type.as_deref()?;
            (error_type == pattern.description).then_some(4.0)
        }
        AntiPatternType::WrongTool => {
            let tool = ctx.tool.as_deref()?;
            (pattern.context == format!("{tool}:{}", ctx.task_type)).then_some(2.0)
        }
        AntiPatternType::TypeSuppression => {
            let action = ctx.action.as_deref()?;
            let lower = action.to_lowercase();
            SUPPRESSION_MARKERS.iter().any(|m| lower.contains(m)).then_some(5.0)
        }
        AntiPatternType::BrokenState => {
            ctx.files.iter().any(|f| same_directory(f, &pattern.context)).then_some(2.0)
        }
        AntiPatternType::InefficientSolution => (pattern.context == ctx.task_type).then_some(1.5),
        AntiPatternType::FailedDebug | AntiPatternType::QuotaExhaustionRisk => None,
    }
}

/// Severity-weighted anti-pattern store, merged by `(type, description, severity)`.
pub struct AntiPatternCatalog {
    clock: Arc<dyn Clock>,
    patterns: Mutex<Vec<AntiPattern>>,
}

impl AntiPatternCatalog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, patterns: Mutex::new(Vec::new()) }
    }

    pub fn from_patterns(clock: Arc<dyn Clock>, patterns: Vec<AntiPattern>) -> Self {
        Self { clock, patterns: Mutex::new(patterns) }
    }

    /// Insert or merge-by-key. Returns the id of the (possibly pre-existing) entry.
    pub async fn add(&self, kind: AntiPatternType, description: String, severity: Severity, context: String) -> Uuid {
        let now = self.clock.now_utc();
        let mut patterns = self.patterns.lock().await;
        if let Some(existing) = patterns.iter_mut().find(|p| p.matches_key(kind, &description, severity)) {
            existing.merge_repeat(context, now);
            return existing.id;
        }
        let pattern = AntiPattern::new(kind, description, severity, context, now);
        let id = pattern.id;
        patterns.push(pattern);
        id
    }

    pub async fn all(&self) -> Vec<AntiPattern> {
        self.patterns.lock().await.clone()
    }

    pub async fn replace_all(&self, patterns: Vec<AntiPattern>) {
        *self.patterns.lock().await = patterns;
    }

    /// `warn(ctx) → (should_warn, warnings[<=10], risk_score)`, per §4.8.
    pub async fn warn(&self, ctx: &WarnContext) -> (bool, Vec<Warning>, f64) {
        let patterns = self.patterns.lock().await;
        let mut scored: Vec<(f64, &AntiPattern)> = patterns
            .iter()
            .filter_map(|p| {
                let multiplier = multiplier_if_triggered(p, ctx)?;
                let occurrence_scale = 1.0 + (p.occurrences as f64).log2();
                Some((p.weight * multiplier * occurrence_scale, p))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let risk_score: f64 = scored.iter().map(|(score, _)| score).sum();
        let warnings: Vec<Warning> = scored
            .into_iter()
            .take(10)
            .map(|(match_score, p)| Warning {
                pattern_id: p.id,
                pattern_type: p.kind,
                description: p.description.clone(),
                severity: p.severity,
                strength: AdviceStrength::Strong,
                action: AdviceAction::BlockOrReview,
                match_score,
            })
            .collect();

        (risk_score > 5.0, warnings, risk_score)
    }
}

/// Companion store for `PositivePattern`; merged by description similarity, never
/// contributing to risk — only to `Advice.suggestions`.
pub struct PositivePatternTracker {
    patterns: Mutex<Vec<PositivePattern>>,
}

impl PositivePatternTracker {
    const MERGE_SIMILARITY_THRESHOLD: f64 = 0.8;

    pub fn new() -> Self {
        Self { patterns: Mutex::new(Vec::new()) }
    }

    pub fn from_patterns(patterns: Vec<PositivePattern>) -> Self {
        Self { patterns: Mutex::new(patterns) }
    }

    pub async fn add(&self, kind: PositivePatternType, description: String, success_rate: f64, context: String) -> Uuid {
        let mut patterns = self.patterns.lock().await;
        if let Some(existing) = patterns
            .iter_mut()
            .find(|p| p.kind == kind && jaccard_similarity(&p.description, &description) >= Self::MERGE_SIMILARITY_THRESHOLD)
        {
            existing.occurrences += 1;
            existing.success_rate = (existing.success_rate + success_rate) / 2.0;
            return existing.id;
        }
        let pattern = PositivePattern::new(kind, description, success_rate, context);
        let id = pattern.id;
        patterns.push(pattern);
        id
    }

    pub async fn all(&self) -> Vec<PositivePattern> {
        self.patterns.lock().await.clone()
    }

    pub async fn replace_all(&self, patterns: Vec<PositivePattern>) {
        *self.patterns.lock().await = patterns;
    }

    /// Suggestions relevant to `task_type`, highest success rate first.
    pub async fn suggestions_for(&self, task_type: &str, limit: usize) -> Vec<Suggestion> {
        let patterns = self.patterns.lock().await;
        let mut matching: Vec<&PositivePattern> = patterns.iter().filter(|p| p.context == task_type).collect();
        matching.sort_by(|a, b| b.success_rate.partial_cmp(&a.success_rate).unwrap_or(std::cmp::Ordering::Equal));

        matching
            .into_iter()
            .take(limit)
            .map(|p| Suggestion {
                pattern_id: p.id,
                pattern_type: p.kind,
                description: p.description.clone(),
                success_rate: p.success_rate,
                strength: AdviceStrength::Soft,
                action: AdviceAction::Consider,
            })
            .collect()
    }
}

impl Default for PositivePatternTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_common::SystemClock;

    #[tokio::test]
    async fn add_merges_duplicate_key_and_caps_weight() {
        let catalog = AntiPatternCatalog::new(Arc::new(SystemClock));
        for i in 0..5 {
            catalog
                .add(
                    AntiPatternType::TypeSuppression,
                    "// @ts-ignore added".to_string(),
                    Severity::High,
                    format!("ctx{i}"),
                )
                .await;
        }
        let all = catalog.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].occurrences, 5);
    }

    #[tokio::test]
    async fn scenario_five_weight_matches_formula() {
        let catalog = AntiPatternCatalog::new(Arc::new(SystemClock));
        for _ in 0..3 {
            catalog
                .add(
                    AntiPatternType::TypeSuppression,
                    "// @ts-ignore added".to_string(),
                    Severity::High,
                    "ctx".to_string(),
                )
                .await;
        }
        let all = catalog.all().await;
        assert_eq!(all[0].occurrences, 3);
        assert!((all[0].weight - 14.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn type_suppression_trigger_fires_on_suppression_keyword() {
        let catalog = AntiPatternCatalog::new(Arc::new(SystemClock));
        catalog
            .add(AntiPatternType::TypeSuppression, "suppressed check".to_string(), Severity::High, "ctx".to_string())
            .await;

        let ctx = WarnContext { action: Some("// ts-ignore applied".to_string()), ..Default::default() };
        let (should_warn, warnings, risk_score) = catalog.warn(&ctx).await;
        assert!(risk_score > 5.0);
        assert_eq!(warnings.len(), 1);
        assert!(should_warn); // type_suppression's 5x multiplier alone crosses the risk threshold
    }

    #[tokio::test]
    async fn untriggered_pattern_contributes_nothing() {
        let catalog = AntiPatternCatalog::new(Arc::new(SystemClock));
        catalog
            .add(AntiPatternType::ShotgunDebug, "shotgun editing src/a.rs".to_string(), Severity::High, "ctx".to_string())
            .await;

        let ctx = WarnContext { attempt_number: Some(1), ..Default::default() };
        let (should_warn, warnings, risk_score) = catalog.warn(&ctx).await;
        assert!(!should_warn);
        assert!(warnings.is_empty());
        assert_eq!(risk_score, 0.0);
    }

    #[tokio::test]
    async fn positive_patterns_merge_by_description_similarity() {
        let tracker = PositivePatternTracker::new();
        tracker
            .add(PositivePatternType::EfficientDebug, "read then edit then test passed".to_string(), 0.9, "debug".to_string())
            .await;
        tracker
            .add(PositivePatternType::EfficientDebug, "read then edit then test passed cleanly".to_string(), 0.8, "debug".to_string())
            .await;

        let all = tracker.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].occurrences, 2);
    }

    #[tokio::test]
    async fn suggestions_are_sorted_by_success_rate() {
        let tracker = PositivePatternTracker::new();
        tracker.add(PositivePatternType::FastResolution, "quick fix A".to_string(), 0.6, "debug".to_string()).await;
        tracker.add(PositivePatternType::FastResolution, "quick fix B, unrelated wording".to_string(), 0.95, "debug".to_string()).await;

        let suggestions = tracker.suggestions_for("debug", 5).await;
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions[0].success_rate >= suggestions[1].success_rate);
    }
}
