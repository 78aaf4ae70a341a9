//! Per-provider circuit breaker: closed/open/half-open with a rolling failure-rate window.
//!
//! Carried over from the teacher's generic circuit breaker largely unchanged; the
//! only generalisation is `CircuitBreakerRegistry`, which keys one breaker per
//! provider id, and an optional transition observer so a caller (the routing
//! core's outcome bus) hears about state changes instead of only reading log lines.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker states. `Open` can only reach `Closed` via `HalfOpen` (invariant 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds and timing for one provider's circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub window_size: u32,
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_millis(30_000),
            window_size: 10,
            minimum_requests: 3,
        }
    }
}

/// Callback invoked whenever a breaker transitions state, for the outcome bus to publish on.
pub type TransitionObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// A single provider's circuit breaker.
pub struct CircuitBreaker {
    provider_id: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitBreakerState>,
    observer: Option<TransitionObserver>,
}

struct CircuitBreakerState {
    current: CircuitState,
    consecutive_successes: u32,
    next_attempt: Option<Instant>,
    recent_calls: Vec<bool>,
}

impl CircuitBreaker {
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider_id: provider_id.into(),
            config,
            state: RwLock::new(CircuitBreakerState {
                current: CircuitState::Closed,
                consecutive_successes: 0,
                next_attempt: None,
                recent_calls: Vec::new(),
            }),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn transition(&self, state: &mut CircuitBreakerState, to: CircuitState) {
        let from = state.current;
        if from == to {
            return;
        }
        state.current = to;
        if let Some(observer) = &self.observer {
            observer(&self.provider_id, from, to);
        }
        match to {
            CircuitState::Open => warn!(provider = %self.provider_id, "circuit breaker opened"),
            CircuitState::HalfOpen => info!(provider = %self.provider_id, "circuit breaker half-open"),
            CircuitState::Closed => info!(provider = %self.provider_id, "circuit breaker closed"),
        }
    }

    /// Whether a candidate for this provider may currently be selected.
    pub async fn should_allow_call(&self) -> bool {
        let mut state = self.state.write().await;
        match state.current {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let ready = state.next_attempt.map(|at| Instant::now() >= at).unwrap_or(false);
                if ready {
                    state.consecutive_successes = 0;
                    self.transition(&mut state, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    /// Record the outcome of a call made while `should_allow_call` returned true.
    pub async fn record_call_result(&self, success: bool) {
        let mut state = self.state.write().await;

        state.recent_calls.push(success);
        if state.recent_calls.len() > self.config.window_size as usize {
            state.recent_calls.remove(0);
        }

        match state.current {
            CircuitState::Closed => {
                if success {
                    state.consecutive_successes += 1;
                } else {
                    state.consecutive_successes = 0;
                    if self.should_open(&state) {
                        state.next_attempt = Some(Instant::now() + self.config.open_timeout);
                        self.transition(&mut state, CircuitState::Open);
                    }
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    state.consecutive_successes += 1;
                    if state.consecutive_successes >= self.config.success_threshold {
                        state.recent_calls.clear();
                        self.transition(&mut state, CircuitState::Closed);
                    }
                } else {
                    state.consecutive_successes = 0;
                    state.next_attempt = Some(Instant::now() + self.config.open_timeout);
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::Open => {
                debug!(provider = %self.provider_id, "recording call result while circuit is open");
            }
        }
    }

    fn should_open(&self, state: &CircuitBreakerState) -> bool {
        if state.recent_calls.len() < self.config.minimum_requests as usize {
            return false;
        }
        let failures = state.recent_calls.iter().filter(|s| !**s).count();
        let failure_rate = failures as f64 / state.recent_calls.len() as f64;
        let threshold_rate = self.config.failure_threshold as f64 / self.config.window_size as f64;
        failure_rate >= threshold_rate
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.current
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.recent_calls.clear();
        state.consecutive_successes = 0;
        state.next_attempt = None;
        self.transition(&mut state, CircuitState::Closed);
    }
}

/// One breaker per provider, created lazily on first reference.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    observer: Option<TransitionObserver>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            observer: None,
            breakers: DashMap::new(),
        }
    }

    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn get_or_create(&self, provider_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(provider_id) {
            return existing.clone();
        }
        let mut breaker = CircuitBreaker::new(provider_id.to_string(), self.config.clone());
        if let Some(observer) = &self.observer {
            breaker = breaker.with_observer(observer.clone());
        }
        let breaker = Arc::new(breaker);
        self.breakers.insert(provider_id.to_string(), breaker.clone());
        breaker
    }

    pub async fn is_open(&self, provider_id: &str) -> bool {
        self.get_or_create(provider_id).state().await == CircuitState::Open
    }
}

/// Execute `operation` with circuit breaker protection, recording its outcome.
pub async fn with_circuit_breaker<F, T, E>(
    circuit_breaker: &CircuitBreaker,
    operation: F,
) -> Result<T, CircuitBreakerError<E>>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    if !circuit_breaker.should_allow_call().await {
        return Err(CircuitBreakerError::CircuitOpen);
    }

    let result = operation.await;
    circuit_breaker.record_call_result(result.is_ok()).await;
    result.map_err(CircuitBreakerError::OperationFailed)
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "operation failed: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitBreakerError::CircuitOpen => None,
            CircuitBreakerError::OperationFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            open_timeout: Duration::from_millis(50),
            window_size: 5,
            minimum_requests: 2,
        }
    }

    #[tokio::test]
    async fn starts_closed_and_allows_calls() {
        let cb = CircuitBreaker::new("p", test_config());
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.should_allow_call().await);
    }

    #[tokio::test]
    async fn opens_after_failure_rate_exceeds_threshold() {
        let cb = CircuitBreaker::new("p", test_config());
        cb.record_call_result(false).await;
        cb.record_call_result(false).await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.should_allow_call().await);
    }

    #[tokio::test]
    async fn cannot_skip_half_open_on_the_way_back_to_closed() {
        let cb = CircuitBreaker::new("p", test_config());
        cb.record_call_result(false).await;
        cb.record_call_result(false).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        sleep(Duration::from_millis(60)).await;
        assert!(cb.should_allow_call().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_call_result(true).await;
        cb.record_call_result(true).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let cb = CircuitBreaker::new("p", test_config());
        cb.record_call_result(false).await;
        cb.record_call_result(false).await;
        sleep(Duration::from_millis(60)).await;
        assert!(cb.should_allow_call().await);

        cb.record_call_result(false).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn registry_keys_breakers_by_provider() {
        let registry = CircuitBreakerRegistry::new(test_config());
        registry.get_or_create("p").record_call_result(false).await;
        registry.get_or_create("p").record_call_result(false).await;

        assert!(registry.is_open("p").await);
        assert!(!registry.is_open("q").await);
    }

    #[tokio::test]
    async fn transitions_invoke_observer() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let observer: TransitionObserver = Arc::new(move |provider, from, to| {
            seen2.lock().unwrap().push((provider.to_string(), from, to));
        });

        let cb = CircuitBreaker::new("p", test_config()).with_observer(observer);
        cb.record_call_result(false).await;
        cb.record_call_result(false).await;

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "p");
        assert_eq!(events[0].1, CircuitState::Closed);
        assert_eq!(events[0].2, CircuitState::Open);
    }
}
