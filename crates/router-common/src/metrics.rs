//! Health reporting types, implemented by every major component's `health_check()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health levels for a component, ordered worst-to-best via `as_score`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

impl HealthLevel {
    /// Numeric value for comparison and dashboarding.
    pub fn as_score(&self) -> u8 {
        match self {
            HealthLevel::Healthy => 100,
            HealthLevel::Degraded => 50,
            HealthLevel::Critical => 10,
            HealthLevel::Unknown => 0,
        }
    }
}

/// Health of a single component (a rotator, a provider's circuit, the quota store, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthLevel,
    pub message: String,
    pub last_check: DateTime<Utc>,
    pub metrics: HashMap<String, f64>,
}

impl ComponentHealth {
    pub fn healthy(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: HealthLevel::Healthy,
            message: message.into(),
            last_check: now,
            metrics: HashMap::new(),
        }
    }

    pub fn degraded(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: HealthLevel::Degraded,
            message: message.into(),
            last_check: now,
            metrics: HashMap::new(),
        }
    }

    pub fn critical(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: HealthLevel::Critical,
            message: message.into(),
            last_check: now,
            metrics: HashMap::new(),
        }
    }
}

/// Whole-system health: the worst status among all polled components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub overall_health: HealthLevel,
    pub components: HashMap<String, ComponentHealth>,
    pub last_check: DateTime<Utc>,
    pub uptime_seconds: u64,
}

impl HealthStatus {
    pub fn calculate_overall_health(&mut self) {
        if self.components.is_empty() {
            self.overall_health = HealthLevel::Unknown;
            return;
        }

        let critical_count = self
            .components
            .values()
            .filter(|c| c.status == HealthLevel::Critical)
            .count();

        let degraded_count = self
            .components
            .values()
            .filter(|c| c.status == HealthLevel::Degraded)
            .count();

        self.overall_health = if critical_count > 0 {
            HealthLevel::Critical
        } else if degraded_count > 0 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_health_is_worst_of_components() {
        let now = Utc::now();
        let mut status = HealthStatus {
            overall_health: HealthLevel::Unknown,
            components: HashMap::from([
                ("rotator:openai".to_string(), ComponentHealth::healthy("ok", now)),
                ("quota:openai".to_string(), ComponentHealth::degraded("warning bucket", now)),
            ]),
            last_check: now,
            uptime_seconds: 10,
        };
        status.calculate_overall_health();
        assert_eq!(status.overall_health, HealthLevel::Degraded);
    }

    #[test]
    fn empty_components_is_unknown() {
        let now = Utc::now();
        let mut status = HealthStatus {
            overall_health: HealthLevel::Healthy,
            components: HashMap::new(),
            last_check: now,
            uptime_seconds: 0,
        };
        status.calculate_overall_health();
        assert_eq!(status.overall_health, HealthLevel::Unknown);
    }
}
