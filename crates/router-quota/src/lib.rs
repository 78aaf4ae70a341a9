//! Persistent per-provider quota accounting (the orchestrator's QuotaManager, C3).
//!
//! Backed by SQLite via `sqlx`, mirroring the migration-on-open style of the
//! teacher's `PersistentQueue::new` (there, opening/creating `sled` trees;
//! here, applying `sqlx::migrate!` against a `provider_quotas` /
//! `api_usage` / `routing_decisions` schema). Not on the hot routing path —
//! `quota_aware_route` is the only read the scorer depends on, and it's a
//! handful of indexed `SELECT`s.

use chrono::{DateTime, Utc};
use router_common::{
    ComponentHealth, Error, FallbackReason, ModelPolicy, ProviderId, QuotaAccount, QuotaBucket, QuotaSignal,
    QuotaType, Result,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Static per-provider quota configuration, supplied at construction. Usage
/// counters live in the database; this is the policy half of a `QuotaAccount`.
#[derive(Debug, Clone)]
pub struct QuotaAccountConfig {
    pub quota_type: QuotaType,
    pub quota_limit: u64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
}

/// One row appended by `record_usage`.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub provider_id: ProviderId,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub session_id: Option<String>,
}

impl UsageRecord {
    pub fn tokens_total(&self) -> u64 {
        self.tokens_input + self.tokens_output
    }
}

fn quota_type_str(t: QuotaType) -> &'static str {
    match t {
        QuotaType::RequestBased => "request_based",
        QuotaType::Monthly => "monthly",
    }
}

fn parse_quota_type(s: &str) -> QuotaType {
    match s {
        "monthly" => QuotaType::Monthly,
        _ => QuotaType::RequestBased,
    }
}

/// Persistent per-provider usage accounting against request-based or monthly
/// quotas, with a routing-time demotion facade.
pub struct QuotaManager {
    pool: SqlitePool,
}

impl QuotaManager {
    /// Open (creating if absent) the SQLite database at `database_path`, apply
    /// migrations, and seed `accounts` for any provider not already registered.
    pub async fn new(
        database_path: impl AsRef<Path>,
        accounts: HashMap<ProviderId, QuotaAccountConfig>,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path.as_ref().display()))
            .map_err(|e| Error::Persistence(format!("opening quota database: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::Persistence(format!("connecting to quota database: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Persistence(format!("running quota migrations: {e}")))?;

        let manager = Self { pool };
        for (provider_id, config) in accounts {
            manager.register_account(&provider_id, config).await?;
        }
        Ok(manager)
    }

    /// In-memory-only manager for tests that don't need a real file.
    pub async fn in_memory(accounts: HashMap<ProviderId, QuotaAccountConfig>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::Persistence(format!("opening in-memory quota database: {e}")))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Persistence(format!("running quota migrations: {e}")))?;
        let manager = Self { pool };
        for (provider_id, config) in accounts {
            manager.register_account(&provider_id, config).await?;
        }
        Ok(manager)
    }

    /// Register (or leave untouched, if already present) a provider's quota policy.
    pub async fn register_account(&self, provider_id: &str, config: QuotaAccountConfig) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO provider_quotas (provider_id, quota_type, quota_limit, warning_threshold, critical_threshold, period_start)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(provider_id) DO NOTHING",
        )
        .bind(provider_id)
        .bind(quota_type_str(config.quota_type))
        .bind(config.quota_limit as i64)
        .bind(config.warning_threshold)
        .bind(config.critical_threshold)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("registering quota account {provider_id}: {e}")))?;
        Ok(())
    }

    /// Append a usage row. `tokens_total = tokens_input + tokens_output`.
    pub async fn record_usage(&self, record: UsageRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO api_usage (provider_id, tokens_input, tokens_output, tokens_total, session_id, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.provider_id)
        .bind(record.tokens_input as i64)
        .bind(record.tokens_output as i64)
        .bind(record.tokens_total() as i64)
        .bind(&record.session_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("recording usage for {}: {e}", record.provider_id)))?;
        Ok(())
    }

    async fn load_account(&self, provider_id: &str) -> Result<Option<(QuotaAccountConfig, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT quota_type, quota_limit, warning_threshold, critical_threshold, period_start
             FROM provider_quotas WHERE provider_id = ?",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("loading quota account {provider_id}: {e}")))?;

        let Some(row) = row else { return Ok(None) };
        let quota_type = parse_quota_type(row.try_get::<String, _>("quota_type").unwrap_or_default().as_str());
        let quota_limit: i64 = row.try_get("quota_limit").unwrap_or(0);
        let warning_threshold: f64 = row.try_get("warning_threshold").unwrap_or(0.7);
        let critical_threshold: f64 = row.try_get("critical_threshold").unwrap_or(0.9);
        let period_start: String = row.try_get("period_start").unwrap_or_default();
        let period_start = DateTime::parse_from_rfc3339(&period_start)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some((
            QuotaAccountConfig {
                quota_type,
                quota_limit: quota_limit.max(0) as u64,
                warning_threshold,
                critical_threshold,
            },
            period_start,
        )))
    }

    async fn usage_since(&self, provider_id: &str, period_start: DateTime<Utc>) -> Result<(u64, u64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) as request_count, COALESCE(SUM(tokens_total), 0) as tokens_used
             FROM api_usage WHERE provider_id = ? AND recorded_at >= ?",
        )
        .bind(provider_id)
        .bind(period_start.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("summing usage for {provider_id}: {e}")))?;

        let request_count: i64 = row.try_get("request_count").unwrap_or(0);
        let tokens_used: i64 = row.try_get("tokens_used").unwrap_or(0);
        Ok((request_count.max(0) as u64, tokens_used.max(0) as u64))
    }

    /// Current quota signal for `provider_id`. `fallback_applied` is always
    /// `false` here — that flag is set only by `quota_aware_route`, which
    /// knows whether a routing decision actually demoted the provider.
    pub async fn status(&self, provider_id: &str) -> Result<QuotaSignal> {
        let Some((config, period_start)) = self.load_account(provider_id).await? else {
            return Ok(QuotaSignal {
                provider_id: provider_id.to_string(),
                percent_used: 0.0,
                warning_threshold: 0.7,
                critical_threshold: 0.9,
                fallback_applied: false,
                fallback_reason: None,
                rotator_risk: 0.0,
            }
            .normalize());
        };

        let (request_count, tokens_used) = self.usage_since(provider_id, period_start).await?;
        let account = QuotaAccount {
            provider_id: provider_id.to_string(),
            quota_type: config.quota_type,
            quota_limit: config.quota_limit,
            warning_threshold: config.warning_threshold,
            critical_threshold: config.critical_threshold,
            request_count,
            tokens_used,
            period_start,
        };

        Ok(QuotaSignal {
            provider_id: provider_id.to_string(),
            percent_used: account.percent_used(),
            warning_threshold: account.warning_threshold,
            critical_threshold: account.critical_threshold,
            fallback_applied: false,
            fallback_reason: None,
            rotator_risk: 0.0,
        }
        .normalize())
    }

    /// Whether `provider_id` has room for `additional` more units this
    /// period (requests for request-based quotas, tokens for monthly ones).
    pub async fn has_capacity(&self, provider_id: &str, additional: u64) -> Result<bool> {
        let Some((config, period_start)) = self.load_account(provider_id).await? else {
            return Ok(true);
        };
        let (request_count, tokens_used) = self.usage_since(provider_id, period_start).await?;
        Ok(match config.quota_type {
            QuotaType::RequestBased => request_count + additional <= config.quota_limit,
            QuotaType::Monthly => tokens_used + additional <= config.quota_limit,
        })
    }

    async fn log_decision(&self, provider_id: &str, model_id: Option<&str>, demoted: bool, reason: &str) {
        let result = sqlx::query(
            "INSERT INTO routing_decisions (provider_id, model_id, demoted, reason, decided_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(provider_id)
        .bind(model_id)
        .bind(demoted as i64)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(provider = provider_id, error = %e, "failed to log routing decision");
        }
    }

    /// Filter/demote candidates whose provider's quota bucket is `critical`
    /// or `exhausted`, logging each decision and surfacing a `QuotaSignal`
    /// per provider touched (with `fallback_applied` set where demotion
    /// actually happened).
    pub async fn quota_aware_route<'a>(
        &self,
        candidates: Vec<&'a ModelPolicy>,
    ) -> Result<(Vec<&'a ModelPolicy>, HashMap<ProviderId, QuotaSignal>)> {
        let mut signals: HashMap<ProviderId, QuotaSignal> = HashMap::new();
        let mut providers: Vec<ProviderId> = candidates.iter().map(|m| m.provider.clone()).collect();
        providers.sort();
        providers.dedup();

        for provider_id in &providers {
            let signal = self.status(provider_id).await?;
            signals.insert(provider_id.clone(), signal);
        }

        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let bucket = self.bucket_for_signal(&signals[&candidate.provider]);
            let demote = matches!(bucket, QuotaBucket::Critical | QuotaBucket::Exhausted);
            self.log_decision(
                &candidate.provider,
                Some(&candidate.id),
                demote,
                if demote { "quota pressure" } else { "within quota" },
            )
            .await;

            if demote {
                let signal = signals.get_mut(&candidate.provider).expect("signal inserted above");
                signal.fallback_applied = true;
                signal.fallback_reason = Some(FallbackReason::QuotaFallback);
                debug!(provider = %candidate.provider, model = %candidate.id, "demoted by quota pressure");
            } else {
                kept.push(candidate);
            }
        }

        Ok((kept, signals))
    }

    fn bucket_for_signal(&self, signal: &QuotaSignal) -> QuotaBucket {
        if signal.percent_used >= 1.0 {
            QuotaBucket::Exhausted
        } else if signal.percent_used >= signal.critical_threshold {
            QuotaBucket::Critical
        } else if signal.percent_used >= signal.warning_threshold {
            QuotaBucket::Warning
        } else {
            QuotaBucket::Healthy
        }
    }

    pub async fn health_check(&self) -> ComponentHealth {
        let now = Utc::now();
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => ComponentHealth::healthy("quota database reachable", now),
            Err(e) => ComponentHealth::critical(format!("quota database unreachable: {e}"), now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_common::ModelPolicy;
    use std::collections::HashSet;

    fn model(id: &str, provider: &str) -> ModelPolicy {
        ModelPolicy {
            id: id.to_string(),
            provider: provider.to_string(),
            tools: HashSet::new(),
            strengths: HashSet::new(),
            task_types: HashSet::from(["debug".to_string()]),
            default_success_rate: 0.8,
            default_latency_ms: 300,
            cost_per_1k_tokens: 0.01,
        }
    }

    async fn manager_with(provider: &str, quota_type: QuotaType, limit: u64) -> QuotaManager {
        let mut accounts = HashMap::new();
        accounts.insert(
            provider.to_string(),
            QuotaAccountConfig {
                quota_type,
                quota_limit: limit,
                warning_threshold: 0.7,
                critical_threshold: 0.9,
            },
        );
        QuotaManager::in_memory(accounts).await.unwrap()
    }

    #[tokio::test]
    async fn status_matches_request_based_formula() {
        let manager = manager_with("p", QuotaType::RequestBased, 10).await;
        for _ in 0..4 {
            manager
                .record_usage(UsageRecord {
                    provider_id: "p".to_string(),
                    tokens_input: 1,
                    tokens_output: 1,
                    session_id: None,
                })
                .await
                .unwrap();
        }
        let signal = manager.status("p").await.unwrap();
        assert!((signal.percent_used - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn quota_demotion_excludes_exhausted_provider() {
        let manager = manager_with("p", QuotaType::Monthly, 1000).await;

        manager
            .record_usage(UsageRecord {
                provider_id: "p".to_string(),
                tokens_input: 600,
                tokens_output: 400,
                session_id: None,
            })
            .await
            .unwrap();

        let candidates = vec![model("A", "p")];
        let (kept, signals) = manager.quota_aware_route(candidates).await.unwrap();
        assert!(kept.is_empty());
        assert!(signals["p"].fallback_applied);
        assert_eq!(signals["p"].fallback_reason, Some(FallbackReason::QuotaFallback));
    }

    #[tokio::test]
    async fn healthy_provider_is_not_demoted() {
        let manager = manager_with("p", QuotaType::Monthly, 1000).await;
        let candidates = vec![model("A", "p")];
        let (kept, signals) = manager.quota_aware_route(candidates).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert!(!signals["p"].fallback_applied);
    }

    #[tokio::test]
    async fn has_capacity_reflects_request_based_quota() {
        let manager = manager_with("p", QuotaType::RequestBased, 2).await;
        assert!(manager.has_capacity("p", 1).await.unwrap());
        for _ in 0..2 {
            manager
                .record_usage(UsageRecord {
                    provider_id: "p".to_string(),
                    tokens_input: 10,
                    tokens_output: 10,
                    session_id: None,
                })
                .await
                .unwrap();
        }
        assert!(!manager.has_capacity("p", 1).await.unwrap());
    }

    #[tokio::test]
    async fn unregistered_provider_reports_zero_usage() {
        let manager = manager_with("p", QuotaType::Monthly, 1000).await;
        let signal = manager.status("unknown").await.unwrap();
        assert_eq!(signal.percent_used, 0.0);
    }
}
