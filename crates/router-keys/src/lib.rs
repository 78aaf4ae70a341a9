//! Per-provider API key rotator (§4.1's KeyRotator, C1).
//!
//! One rotator owns exactly one provider's pool of keys. All mutation goes
//! through a single `Mutex<RotatorState>` per rotator so candidate selection,
//! rate-limit bookkeeping, and failure/success feedback are serialised the way
//! §4.1 and §5 require; `status()` readers observe a consistent snapshot.

pub mod headers;
pub mod provisioning;

use headers::RateLimitSnapshot;
use router_common::config::RotatorStrategy;
use router_common::{Clock, ComponentHealth, KeyId, KeyStatus, ProviderKey, RotatorConfig, SystemClock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A key handed back to a caller by `acquire`. Carries only what's needed to
/// make the call and to report back later — never the full `ProviderKey`,
/// which stays owned exclusively by the rotator.
#[derive(Debug, Clone)]
pub struct AcquiredKey {
    pub id: KeyId,
    pub secret: String,
}

/// Snapshot of a rotator's pool health.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatorStatus {
    pub healthy_keys: usize,
    pub total_keys: usize,
    pub is_exhausted: bool,
    pub total_remaining_tokens: u64,
}

struct RotatorState {
    keys: Vec<ProviderKey>,
    cursor: usize,
}

/// A provider-specific floor below which the rotator marks a key `throttled`
/// even though the provider still reports it as usable. Cerebras reports a
/// generous token budget but exhausts its TPM quota well before the raw
/// counter hits zero, so it gets a higher floor than the rest.
fn throttle_floor(provider_id: &str) -> u64 {
    match provider_id {
        "cerebras" => 2_000,
        _ => 50,
    }
}

fn indicates_degradation(err: &str) -> bool {
    let lower = err.to_ascii_lowercase();
    lower.contains("degraded") || lower.contains("cannot be invoked")
}

/// Per-provider pool of API keys with health, cooldown, and rate-limit-header
/// awareness (§4.1).
pub struct KeyRotator {
    provider_id: String,
    config: RotatorConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<RotatorState>,
}

impl KeyRotator {
    pub fn new(provider_id: impl Into<String>, secrets: Vec<(KeyId, String)>, config: RotatorConfig) -> Self {
        Self::with_clock(provider_id, secrets, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider_id: impl Into<String>,
        secrets: Vec<(KeyId, String)>,
        config: RotatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_monotonic();
        let keys = secrets
            .into_iter()
            .map(|(id, secret)| ProviderKey::new(id, secret, now))
            .collect();
        Self {
            provider_id: provider_id.into(),
            config,
            clock,
            state: Mutex::new(RotatorState { keys, cursor: 0 }),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Serve the next usable key, per the selection rules in §4.1.
    pub async fn acquire(&self) -> Option<AcquiredKey> {
        let now = self.clock.now_monotonic();
        let mut state = self.state.lock().await;

        let healthy_indices: Vec<usize> = state
            .keys
            .iter()
            .enumerate()
            .filter(|(_, k)| k.status == KeyStatus::Healthy && now >= k.reset_at)
            .map(|(i, _)| i)
            .collect();

        if healthy_indices.is_empty() {
            return Self::promote_earliest(&mut state, now, &self.provider_id);
        }

        let chosen_index = match self.config.strategy {
            RotatorStrategy::RoundRobin => {
                let cursor = state.cursor % healthy_indices.len();
                state.cursor = state.cursor.wrapping_add(1);
                healthy_indices[cursor]
            }
            RotatorStrategy::HealthFirst => *healthy_indices
                .iter()
                .max_by_key(|&&i| state.keys[i].remaining_capacity())
                .expect("healthy_indices is non-empty"),
        };

        let key = &mut state.keys[chosen_index];
        key.last_used = now;
        Some(AcquiredKey {
            id: key.id.clone(),
            secret: key.secret.clone(),
        })
    }

    /// Step 2 of `acquire`'s selection rules: when no key is currently
    /// healthy-and-ready, find whichever non-dead key resets soonest and, if
    /// its deadline has already passed, promote and return it.
    fn promote_earliest(state: &mut RotatorState, now: Instant, provider_id: &str) -> Option<AcquiredKey> {
        let earliest = state
            .keys
            .iter_mut()
            .filter(|k| k.status != KeyStatus::Dead)
            .min_by_key(|k| k.reset_at)?;

        if now < earliest.reset_at {
            return None;
        }

        earliest.status = KeyStatus::Healthy;
        earliest.last_used = now;
        debug!(provider = provider_id, key = %earliest.id, "promoted key past its reset deadline");
        Some(AcquiredKey {
            id: earliest.id.clone(),
            secret: earliest.secret.clone(),
        })
    }

    /// Parse and apply rate-limit headers from a provider response.
    pub async fn on_response(&self, key_id: &str, snapshot: RateLimitSnapshot) {
        let now = self.clock.now_monotonic();
        let mut state = self.state.lock().await;
        let Some(key) = state.keys.iter_mut().find(|k| k.id == key_id) else {
            warn!(provider = %self.provider_id, key = key_id, "on_response for unknown key");
            return;
        };

        key.remaining_requests = snapshot.remaining_requests.or(key.remaining_requests);
        key.remaining_tokens = snapshot.remaining_tokens.or(key.remaining_tokens);
        if let Some(reset_after) = snapshot.reset_after {
            key.reset_at = now + reset_after;
        }

        let floor = throttle_floor(&self.provider_id);
        let below_floor = key.remaining_requests.is_some_and(|r| r < floor)
            || key.remaining_tokens.is_some_and(|t| t < floor);

        if below_floor {
            key.status = KeyStatus::Throttled;
        } else if key.status == KeyStatus::Throttled {
            key.status = KeyStatus::Healthy;
        }
    }

    /// A provider failure: bump `failure_count`, push `reset_at` out, and
    /// escalate to `Cooldown`/`Dead` if the error looks like platform
    /// degradation or the failure budget is exhausted.
    pub async fn on_failure(&self, key_id: &str, retry_after_ms: Option<u64>, err: Option<&str>) {
        let now = self.clock.now_monotonic();
        let mut state = self.state.lock().await;
        let Some(key) = state.keys.iter_mut().find(|k| k.id == key_id) else {
            warn!(provider = %self.provider_id, key = key_id, "on_failure for unknown key");
            return;
        };

        key.failure_count += 1;
        let degraded = err.is_some_and(indicates_degradation);

        let mut cooldown_ms = retry_after_ms.unwrap_or(0).max(self.config.cooldown_ms);
        if degraded {
            cooldown_ms = cooldown_ms.max(self.config.degradation_cooldown_ms);
        }
        key.reset_at = now + Duration::from_millis(cooldown_ms);

        if key.failure_count >= self.config.max_failures {
            key.status = KeyStatus::Dead;
            warn!(provider = %self.provider_id, key = key_id, failures = key.failure_count, "key marked dead");
        } else if degraded {
            key.status = KeyStatus::Cooldown;
            warn!(provider = %self.provider_id, key = key_id, "key marked cooldown after platform degradation");
        }
    }

    /// A successful call: clear the failure count and mark the key healthy.
    pub async fn on_success(&self, key_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(key) = state.keys.iter_mut().find(|k| k.id == key_id) {
            key.failure_count = 0;
            key.status = KeyStatus::Healthy;
        }
    }

    /// Manually clear a dead key's failure state, the only path back from `Dead`.
    pub async fn reset_key(&self, key_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(key) = state.keys.iter_mut().find(|k| k.id == key_id) {
            key.failure_count = 0;
            key.status = KeyStatus::Healthy;
            key.reset_at = self.clock.now_monotonic();
            info!(provider = %self.provider_id, key = key_id, "key manually reset");
        }
    }

    pub async fn status(&self) -> RotatorStatus {
        let now = self.clock.now_monotonic();
        let state = self.state.lock().await;
        let healthy_keys = state
            .keys
            .iter()
            .filter(|k| k.status == KeyStatus::Healthy && now >= k.reset_at)
            .count();
        let total_remaining_tokens = state
            .keys
            .iter()
            .filter(|k| k.status == KeyStatus::Healthy)
            .filter_map(|k| k.remaining_tokens)
            .sum();

        RotatorStatus {
            healthy_keys,
            total_keys: state.keys.len(),
            is_exhausted: healthy_keys == 0,
            total_remaining_tokens,
        }
    }

    pub async fn health_check(&self) -> ComponentHealth {
        let status = self.status().await;
        let now = chrono::Utc::now();
        if status.is_exhausted {
            ComponentHealth::critical(format!("{}: no healthy keys of {}", self.provider_id, status.total_keys), now)
        } else if status.healthy_keys < status.total_keys {
            ComponentHealth::degraded(
                format!("{}: {}/{} keys healthy", self.provider_id, status.healthy_keys, status.total_keys),
                now,
            )
        } else {
            ComponentHealth::healthy(format!("{}: all {} keys healthy", self.provider_id, status.total_keys), now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_common::FakeClock;
    use std::collections::HashMap;

    fn rotator(clock: Arc<FakeClock>) -> KeyRotator {
        KeyRotator::with_clock(
            "p",
            vec![("k1".to_string(), "s1".to_string()), ("k2".to_string(), "s2".to_string())],
            RotatorConfig {
                cooldown_ms: 1000,
                ..RotatorConfig::default()
            },
            clock,
        )
    }

    #[tokio::test]
    async fn round_robins_across_healthy_keys() {
        let clock = Arc::new(FakeClock::new());
        let r = rotator(clock);
        let first = r.acquire().await.unwrap();
        let second = r.acquire().await.unwrap();
        assert_ne!(first.id, second.id);
        let third = r.acquire().await.unwrap();
        assert_eq!(third.id, first.id);
    }

    /// Scenario 4 from spec §8: a failure with `retry_after=1000ms` makes the
    /// failed key unavailable immediately, but it becomes healthy again once
    /// the clock passes its new `reset_at`.
    #[tokio::test]
    async fn rate_limited_key_recovers_after_retry_after_elapses() {
        let clock = Arc::new(FakeClock::new());
        let r = rotator(clock.clone());

        r.on_failure("k1", Some(1000), None).await;

        let acquired = r.acquire().await.unwrap();
        assert_eq!(acquired.id, "k2");

        clock.advance(Duration::from_millis(1100));
        let acquired = r.acquire().await.unwrap();
        assert_eq!(acquired.id, "k1");
    }

    #[tokio::test]
    async fn exhausting_failure_budget_marks_key_dead() {
        let clock = Arc::new(FakeClock::new());
        let r = rotator(clock.clone());
        for _ in 0..3 {
            r.on_failure("k1", Some(0), None).await;
        }
        clock.advance(Duration::from_secs(10));
        // k1 is dead and never promoted; only k2 should ever come back.
        for _ in 0..5 {
            let acquired = r.acquire().await.unwrap();
            assert_eq!(acquired.id, "k2");
        }
    }

    #[tokio::test]
    async fn degradation_forces_long_cooldown() {
        let clock = Arc::new(FakeClock::new());
        let r = rotator(clock.clone());
        r.on_failure("k1", None, Some("model DEGRADED")).await;

        clock.advance(Duration::from_millis(1100));
        // Ordinary cooldown (1000ms) has elapsed, but degradation forces >=5min.
        let acquired = r.acquire().await.unwrap();
        assert_eq!(acquired.id, "k2");
    }

    #[tokio::test]
    async fn on_response_applies_header_snapshot_and_throttle_floor() {
        let clock = Arc::new(FakeClock::new());
        let r = rotator(clock);
        r.on_response(
            "k1",
            RateLimitSnapshot {
                remaining_requests: Some(0),
                remaining_tokens: Some(0),
                reset_after: None,
            },
        )
        .await;
        // k1 throttled, so only k2 should be returned on repeated acquires.
        for _ in 0..3 {
            let acquired = r.acquire().await.unwrap();
            assert_eq!(acquired.id, "k2");
        }
    }

    #[tokio::test]
    async fn on_success_clears_failure_state() {
        let clock = Arc::new(FakeClock::new());
        let r = rotator(clock.clone());
        r.on_failure("k1", Some(0), None).await;
        r.on_success("k1").await;
        clock.advance(Duration::from_millis(1));
        // k1 healthy again immediately; round robin should reach it.
        let a = r.acquire().await.unwrap();
        let b = r.acquire().await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn status_reports_exhaustion_when_every_key_is_unavailable() {
        let clock = Arc::new(FakeClock::new());
        let r = rotator(clock.clone());
        for _ in 0..3 {
            r.on_failure("k1", Some(0), None).await;
        }
        for _ in 0..3 {
            r.on_failure("k2", Some(0), None).await;
        }
        let status = r.status().await;
        assert!(status.is_exhausted);
        assert_eq!(status.total_keys, 2);
    }

    #[tokio::test]
    async fn no_key_served_twice_within_a_round_robin_tick() {
        let clock = Arc::new(FakeClock::new());
        let r = rotator(clock);
        let mut seen = HashMap::new();
        for _ in 0..2 {
            let a = r.acquire().await.unwrap();
            *seen.entry(a.id).or_insert(0) += 1;
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.values().all(|&c| c == 1));
    }
}
