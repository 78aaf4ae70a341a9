//! Shared types and ambient stack for the model-routing and learning orchestrator.
//!
//! This crate provides the error taxonomy, configuration, health/metrics types,
//! the per-provider circuit breaker, retry helpers, the injectable clock, and
//! the atomic-persistence primitive used by every other crate in the workspace.

pub mod atomic_store;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod rng;
pub mod types;
pub mod utils;

pub use circuit_breaker::{
    with_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    TransitionObserver,
};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::{ComponentHealth, HealthLevel, HealthStatus};
pub use retry::{retry_for_error, retry_operation, RetryExecutor, RetryStrategy};
pub use rng::DeterministicRng;
pub use types::*;
