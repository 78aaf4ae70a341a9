//! OrchestrationAdvisor: combines anti-pattern risk, quota pressure, positive
//! suggestions, and a static affinity hint into a single `Advice`.

use crate::catalog::{AntiPatternCatalog, PositivePatternTracker, WarnContext};
use router_common::{AdviceStrength, AntiPatternType, Advice, QuotaSignal, RoutingHint, Severity, Warning};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Everything `OrchestrationAdvisor::advise` needs: the warn-matching context
/// plus whatever quota pressure is known for the providers in play.
#[derive(Debug, Clone, Default)]
pub struct AdviceContext {
    pub warn: WarnContext,
    pub quota_signal: Option<QuotaSignal>,
}

struct Affinity {
    agent: &'static str,
    skills: &'static [&'static str],
    base_confidence: f64,
}

fn affinity_for(task_type: &str) -> Option<Affinity> {
    static TABLE: &[(&str, Affinity)] = &[
        ("debug", Affinity { agent: "debugger", skills: &["root-cause-analysis", "log-reading", "testing"], base_confidence: 0.9 }),
        ("refactor", Affinity { agent: "refactorer", skills: &["code-structure", "testing"], base_confidence: 0.85 }),
        ("feature", Affinity { agent: "implementer", skills: &["design", "testing", "integration"], base_confidence: 0.8 }),
        ("docs", Affinity { agent: "writer", skills: &["documentation"], base_confidence: 0.75 }),
    ];
    TABLE.iter().find(|(key, _)| *key == task_type).map(|(_, a)| Affinity { agent: a.agent, skills: a.skills, base_confidence: a.base_confidence })
}

/// Quota risk per §4.10: demotion-aware floor, else the raw percentage used.
fn quota_risk(signal: &QuotaSignal) -> f64 {
    if signal.fallback_applied {
        signal.percent_used.max(0.85)
    } else {
        signal.percent_used
    }
}

pub struct OrchestrationAdvisor {
    anti_patterns: Arc<AntiPatternCatalog>,
    positive_patterns: Arc<PositivePatternTracker>,
}

impl OrchestrationAdvisor {
    pub fn new(anti_patterns: Arc<AntiPatternCatalog>, positive_patterns: Arc<PositivePatternTracker>) -> Self {
        Self { anti_patterns, positive_patterns }
    }

    pub async fn advise(&self, ctx: &AdviceContext) -> Advice {
        let (_, mut warnings, anti_risk_score) = self.anti_patterns.warn(&ctx.warn).await;

        let quota_risk = ctx.quota_signal.as_ref().map(quota_risk).unwrap_or(0.0);
        if quota_risk > 0.5 {
            let severity = if quota_risk > 0.9 { Severity::Critical } else { Severity::High };
            warnings.push(Warning {
                pattern_id: Uuid::new_v4(),
                pattern_type: AntiPatternType::QuotaExhaustionRisk,
                description: "provider quota pressure observed for this routing decision".to_string(),
                severity,
                strength: AdviceStrength::Strong,
                action: router_common::AdviceAction::BlockOrReview,
                match_score: quota_risk * 100.0,
            });
        }

        let suggestions = self.positive_patterns.suggestions_for(&ctx.warn.task_type, 5).await;

        let hint = affinity_for(&ctx.warn.task_type).map(|a| {
            let confidence = (a.base_confidence - 0.05 * warnings.len() as f64 - 0.3 * quota_risk).clamp(0.1, 0.95);
            RoutingHint { agent: a.agent.to_string(), skills: a.skills.iter().take(5).map(|s| s.to_string()).collect(), confidence }
        });

        let risk_score = anti_risk_score.max(quota_risk * 100.0);
        let should_pause = risk_score > 15.0 || quota_risk > 0.85;

        Advice {
            id: Uuid::new_v4(),
            warnings,
            suggestions,
            hint,
            risk_score,
            should_pause,
            quota_signal: ctx.quota_signal.clone(),
        }
    }
}
