//! Aggregate configuration for the routing and learning orchestrator.
//!
//! `Config::load` reads a TOML file (`router.toml` by default) via the `config`
//! crate layered over `toml`; a missing file falls back to `Config::default()`,
//! a malformed one surfaces as `Error::Configuration` (fatal at startup).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration, one struct nesting every component's tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rotator: RotatorConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub quota: QuotaConfig,
    pub scorer: ScorerConfig,
    pub stuck_detector: StuckDetectorConfig,
    pub advisor_cache: AdvisorCacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rotator: RotatorConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            quota: QuotaConfig::default(),
            scorer: ScorerConfig::default(),
            stuck_detector: StuckDetectorConfig::default(),
            advisor_cache: AdvisorCacheConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .build()
            .map_err(|e| Error::Configuration(format!("loading {}: {e}", path.display())))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Configuration(format!("parsing {}: {e}", path.display())))
    }

    /// Load from the conventional `router.toml` in the current directory.
    pub fn load_default() -> Result<Self> {
        Self::load(PathBuf::from("router.toml"))
    }
}

/// Key-selection strategy for `KeyRotator::acquire`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotatorStrategy {
    RoundRobin,
    HealthFirst,
}

impl Default for RotatorStrategy {
    fn default() -> Self {
        RotatorStrategy::RoundRobin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotatorConfig {
    pub strategy: RotatorStrategy,
    pub cooldown_ms: u64,
    pub max_failures: u32,
    /// Forced cooldown (ms) applied when a provider reports platform degradation.
    pub degradation_cooldown_ms: u64,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            strategy: RotatorStrategy::RoundRobin,
            cooldown_ms: 60_000,
            max_failures: 3,
            degradation_cooldown_ms: 300_000,
        }
    }
}

/// Mirrors `circuit_breaker::CircuitBreakerConfig`'s fields in the shape the
/// top-level config file exposes them (millisecond durations instead of `Duration`,
/// so TOML round-trips cleanly).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_ms: u64,
    pub half_open_attempts: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_ms: 30_000,
            half_open_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub database_path: PathBuf,
    pub default_warning_threshold: f64,
    pub default_critical_threshold: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("quota.sqlite3"),
            default_warning_threshold: 0.7,
            default_critical_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub success_rate_floor: f64,
    pub success_rate_ceiling: f64,
    pub min_samples_for_tuning: u32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            success_rate_floor: 0.50,
            success_rate_ceiling: 0.99,
            min_samples_for_tuning: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckDetectorConfig {
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    pub failure_window_ms: u64,
    pub similarity_threshold: f64,
}

impl Default for StuckDetectorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            failure_threshold: 3,
            failure_window_ms: 180_000,
            similarity_threshold: 0.90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorCacheConfig {
    pub learning_advice_ttl_ms: u64,
}

impl Default for AdvisorCacheConfig {
    fn default() -> Self {
        Self {
            learning_advice_ttl_ms: 300_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(PathBuf::from("/nonexistent/router.toml")).unwrap();
        assert_eq!(config.scorer.success_rate_floor, 0.50);
        assert_eq!(config.rotator.strategy, RotatorStrategy::RoundRobin);
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.toml");
        std::fs::write(&path, "not = [valid toml").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.toml");
        std::fs::write(&path, "[scorer]\nsuccess_rate_floor = 0.6\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scorer.success_rate_floor, 0.6);
        assert_eq!(config.scorer.success_rate_ceiling, 0.99);
    }
}
