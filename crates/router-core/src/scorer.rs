//! AdaptiveScorer: blends policy, live stats, rotator/quota pressure, and
//! learning advice into a single `[0, 1]` score for one candidate model.
//!
//! A pure function of its inputs — no I/O, no shared mutable state — so it
//! is trivially safe to call concurrently from many `route` callers, mirroring
//! the teacher's `analyze_request_complexity` being a side-effect-free method
//! on `&self` even though the surrounding router is shared.

use router_common::{Advice, ModelPolicy, ModelStats, QuotaSignal, ScorerConfig, Severity, TaskContext};
use router_keys::RotatorStatus;

/// Output of scoring one candidate: the final score plus a trail of the
/// contributions that produced it, for logging and debugging.
#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Pure scoring function over policy + live state, per the documented
/// per-factor formula and caps.
pub struct AdaptiveScorer {
    config: ScorerConfig,
}

impl AdaptiveScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Blend live success rate with the policy default, clipped to the
    /// configured floor/ceiling. Below `min_samples_for_tuning` calls, the
    /// policy default is used unmixed — too little signal to trust live data.
    fn blended_success_rate(&self, stats: &ModelStats, default_success_rate: f64) -> f64 {
        let blended = if stats.calls < self.config.min_samples_for_tuning as u64 {
            default_success_rate
        } else {
            0.7 * stats.success_rate() + 0.3 * default_success_rate
        };
        blended.clamp(self.config.success_rate_floor, self.config.success_rate_ceiling)
    }

    fn learning_penalty(&self, advice: Option<&Advice>) -> (f64, Vec<String>) {
        let Some(advice) = advice else {
            return (0.0, Vec::new());
        };

        let mut total = 0.0;
        let mut reasons = Vec::new();
        for warning in &advice.warnings {
            let per_warning = match warning.severity {
                Severity::Critical => 0.5,
                Severity::High => 0.35,
                Severity::Medium => 0.2,
                Severity::Low => 0.1,
                Severity::Info => 0.05,
            };
            total += per_warning;
            reasons.push(format!("learning_penalty:{:?}:-{:.2}", warning.pattern_type, per_warning));
        }
        (total.min(0.8), reasons)
    }

    /// Score `policy` against `ctx`, given the model's running stats, the
    /// rotator's current pool health, any quota pressure on its provider, and
    /// learning advice for the task (if the advisor has already run).
    pub fn score(
        &self,
        policy: &ModelPolicy,
        stats: &ModelStats,
        rotator_status: Option<&RotatorStatus>,
        quota_signal: Option<&QuotaSignal>,
        advice: Option<&Advice>,
        ctx: &TaskContext,
    ) -> ScoreResult {
        let mut score = 0.50;
        let mut reasons = vec!["base:0.50".to_string()];

        let blended = self.blended_success_rate(stats, policy.default_success_rate);
        let success_contribution = 0.30 * blended;
        score += success_contribution;
        reasons.push(format!("success_rate:+{:.3}", success_contribution));

        let baseline = policy.default_latency_ms as f64;
        let observed = stats.average_latency_ms();
        if observed > 0.0 {
            let latency_penalty = ((observed - baseline).max(0.0) / 5000.0).min(0.20);
            if latency_penalty > 0.0 {
                score -= latency_penalty;
                reasons.push(format!("latency:-{:.3}", latency_penalty));
            }
        }

        if policy.task_types.contains(&ctx.task_type) {
            score += 0.10;
            reasons.push("task_type_match:+0.10".to_string());
        } else {
            score -= 0.05;
            reasons.push("task_type_mismatch:-0.05".to_string());
        }

        if !ctx.required_strengths.is_empty() {
            let matched = ctx
                .required_strengths
                .iter()
                .filter(|s| policy.strengths.contains(*s))
                .count();
            let strength_contribution = 0.10 * (matched as f64 / ctx.required_strengths.len() as f64);
            score += strength_contribution;
            reasons.push(format!("strength_match:+{:.3}", strength_contribution));
        }

        if let Some(rotator) = rotator_status {
            if rotator.is_exhausted {
                score -= 0.50;
                reasons.push("rotator_exhausted:-0.50".to_string());
            } else if rotator.healthy_keys < rotator.total_keys {
                score -= 0.10;
                reasons.push("rotator_degraded:-0.10".to_string());
            }
        }

        if let Some(max_budget) = ctx.max_budget {
            if 2.0 * policy.cost_per_1k_tokens > max_budget {
                score -= 0.15;
                reasons.push("over_budget:-0.15".to_string());
            }
        }
        let _ = quota_signal; // quota pressure already folded into rotator/advice signals upstream

        let (penalty, penalty_reasons) = self.learning_penalty(advice);
        if penalty > 0.0 {
            score -= penalty;
            reasons.extend(penalty_reasons);
        }

        ScoreResult { score: score.clamp(0.0, 1.0), reasons }
    }

    /// Pick the highest-scoring candidate, tie-breaking on lower default
    /// latency then lexicographic model id, per the documented tie-break rule.
    pub fn pick_best<'a>(
        &self,
        scored: impl IntoIterator<Item = (&'a ModelPolicy, ScoreResult)>,
    ) -> Option<(&'a ModelPolicy, ScoreResult)> {
        scored.into_iter().fold(None, |best, (policy, result)| match &best {
            None => Some((policy, result)),
            Some((best_policy, best_result)) => {
                let better = result.score > best_result.score
                    || (result.score == best_result.score
                        && (policy.default_latency_ms, &policy.id)
                            < (best_policy.default_latency_ms, &best_policy.id));
                if better {
                    Some((policy, result))
                } else {
                    best
                }
            }
        })
    }
}
