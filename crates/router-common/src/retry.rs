//! Exponential backoff with jitter, for the quota manager's persistence I/O and the
//! learning engine's session-file reads. Not used on the hot routing path (§5
//! forbids I/O there) — the routing core's strategies and scorer never retry.

use crate::rng::DeterministicRng;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Tunables for one exponential-backoff run.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    pub max_jitter: f64,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
            max_jitter: 0.1,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// How a retryable operation should be retried.
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    NoRetry,
    FixedDelay(Duration),
    ExponentialBackoff { config: RetryConfig },
}

impl RetryStrategy {
    pub fn exponential_backoff() -> Self {
        Self::ExponentialBackoff {
            config: RetryConfig::default(),
        }
    }

    pub fn exponential_backoff_with_config(config: RetryConfig) -> Self {
        Self::ExponentialBackoff { config }
    }

    pub fn fixed_delay(delay: Duration) -> Self {
        Self::FixedDelay(delay)
    }

    /// Pick a strategy appropriate to a sample error's category.
    pub fn for_error(error: &Error) -> Self {
        match error {
            Error::Network(_) => Self::ExponentialBackoff {
                config: RetryConfig {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(1000),
                    max_delay: Duration::from_secs(10),
                    backoff_multiplier: 2.0,
                    use_jitter: true,
                    max_jitter: 0.2,
                    attempt_timeout: Some(Duration::from_secs(30)),
                },
            },
            Error::Timeout(_) | Error::KeyAcquisitionTimeout(_) => Self::ExponentialBackoff {
                config: RetryConfig {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(2000),
                    max_delay: Duration::from_secs(15),
                    backoff_multiplier: 1.5,
                    use_jitter: true,
                    max_jitter: 0.1,
                    attempt_timeout: Some(Duration::from_secs(45)),
                },
            },
            Error::Persistence(_) => Self::ExponentialBackoff {
                config: RetryConfig {
                    max_attempts: 5,
                    base_delay: Duration::from_millis(500),
                    max_delay: Duration::from_secs(5),
                    backoff_multiplier: 1.5,
                    use_jitter: true,
                    max_jitter: 0.1,
                    attempt_timeout: Some(Duration::from_secs(10)),
                },
            },
            Error::Configuration(_) | Error::PolicyLoad(_) => Self::NoRetry,
            _ => Self::ExponentialBackoff {
                config: RetryConfig::default(),
            },
        }
    }
}

/// Drives a single operation through its retry strategy.
pub struct RetryExecutor {
    strategy: RetryStrategy,
    operation_name: String,
    rng: Arc<DeterministicRng>,
}

impl RetryExecutor {
    pub fn new(strategy: RetryStrategy, operation_name: String) -> Self {
        Self::with_rng(strategy, operation_name, Arc::new(DeterministicRng::from_env()))
    }

    pub fn with_rng(strategy: RetryStrategy, operation_name: String, rng: Arc<DeterministicRng>) -> Self {
        Self {
            strategy,
            operation_name,
            rng,
        }
    }

    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: Into<Error> + std::fmt::Debug,
    {
        match &self.strategy {
            RetryStrategy::NoRetry => {
                debug!(operation = %self.operation_name, "executing without retry");
                operation().await.map_err(Into::into)
            }
            RetryStrategy::FixedDelay(delay) => self.execute_fixed(*delay, operation).await,
            RetryStrategy::ExponentialBackoff { config } => self.execute_backoff(config, operation).await,
        }
    }

    async fn execute_fixed<F, Fut, T, E>(&self, delay: Duration, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: Into<Error> + std::fmt::Debug,
    {
        const ATTEMPTS: u32 = 3;
        let mut last_error = None;

        for attempt in 1..=ATTEMPTS {
            debug!(operation = %self.operation_name, attempt, "retrying");
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(operation = %self.operation_name, attempt, "succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let error = e.into();
                    warn!(operation = %self.operation_name, attempt, ?error, "attempt failed");
                    last_error = Some(error);
                    if attempt < ATTEMPTS {
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Generic(anyhow::anyhow!("no error recorded"))))
    }

    async fn execute_backoff<F, Fut, T, E>(&self, config: &RetryConfig, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: Into<Error> + std::fmt::Debug,
    {
        let mut last_error = None;
        let mut current_delay = config.base_delay;

        for attempt in 1..=config.max_attempts {
            debug!(operation = %self.operation_name, attempt, max = config.max_attempts, "retrying");

            let outcome = if let Some(timeout) = config.attempt_timeout {
                tokio::time::timeout(timeout, operation()).await
            } else {
                Ok(operation().await)
            };

            match outcome {
                Ok(Ok(result)) => {
                    if attempt > 1 {
                        info!(operation = %self.operation_name, attempt, "succeeded after retry");
                    }
                    return Ok(result);
                }
                Ok(Err(e)) => {
                    let error = e.into();
                    warn!(operation = %self.operation_name, attempt, ?error, "attempt failed");
                    last_error = Some(error);
                }
                Err(_) => {
                    let error = Error::Timeout(format!("{} timed out on attempt {attempt}", self.operation_name));
                    warn!(operation = %self.operation_name, attempt, "attempt timed out");
                    last_error = Some(error);
                }
            }

            if attempt < config.max_attempts {
                let delay = if config.use_jitter {
                    self.add_jitter(current_delay, config.max_jitter)
                } else {
                    current_delay
                };
                sleep(delay).await;
                current_delay = Duration::from_millis(
                    ((current_delay.as_millis() as f64) * config.backoff_multiplier) as u64,
                )
                .min(config.max_delay);
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Generic(anyhow::anyhow!("no error recorded"))))
    }

    fn add_jitter(&self, delay: Duration, max_jitter: f64) -> Duration {
        let jitter_factor = self.rng.jitter_fraction(max_jitter);
        let delay_ms = delay.as_millis() as f64;
        Duration::from_millis((delay_ms + delay_ms * jitter_factor) as u64)
    }
}

/// Retry `operation` under `strategy`.
pub async fn retry_operation<F, Fut, T, E>(operation_name: &str, strategy: RetryStrategy, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: Into<Error> + std::fmt::Debug,
{
    RetryExecutor::new(strategy, operation_name.to_string())
        .execute(operation)
        .await
}

/// Retry `operation`, choosing a strategy from a sample error's category.
pub async fn retry_for_error<F, Fut, T, E>(operation_name: &str, sample_error: &Error, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: Into<Error> + std::fmt::Debug,
{
    retry_operation(operation_name, RetryStrategy::for_error(sample_error), operation).await
}
