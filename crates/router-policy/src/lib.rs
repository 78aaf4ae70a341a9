//! Static per-model policy catalog (§4's Policy Catalog, C4).
//!
//! Loaded once from a JSON file at process start and never mutated afterwards;
//! every other component holds only a shared read reference (`Arc<PolicyCatalog>`).

use router_common::{ComponentHealth, Error, ModelId, ModelPolicy, ProviderId, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// On-disk shape of the policy file (§6): `{ models: { <model_id>: { ... } } }`.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    models: HashMap<ModelId, ModelPolicy>,
}

/// Immutable catalog of every routable model, keyed by model id.
#[derive(Debug)]
pub struct PolicyCatalog {
    models: HashMap<ModelId, ModelPolicy>,
}

impl PolicyCatalog {
    /// Construct directly from already-loaded policies (used by tests and the demo binary).
    pub fn new(models: Vec<ModelPolicy>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    /// Load and parse the policy file. A malformed file is `Error::PolicyLoad`, fatal
    /// at startup per §7.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::PolicyLoad(format!("reading {}: {e}", path.display())))?;
        Self::from_json_bytes(&bytes)
    }

    /// Parse policy content already in memory, for embedding a fixed catalog in tests.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let file: PolicyFile =
            serde_json::from_slice(bytes).map_err(|e| Error::PolicyLoad(format!("parsing policy file: {e}")))?;
        info!(models = file.models.len(), "loaded policy catalog");
        Ok(Self::new(file.models.into_values().collect()))
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelPolicy> {
        self.models.get(model_id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &ModelId> {
        self.models.keys()
    }

    /// Every policy belonging to `provider`.
    pub fn for_provider<'a>(&'a self, provider: &'a str) -> impl Iterator<Item = &'a ModelPolicy> + 'a {
        self.models.values().filter(move |m| m.provider == provider)
    }

    /// Candidates matching `task_type`, in the order the scorer should consider them
    /// (insertion order is not meaningful; callers sort by score).
    pub fn candidates_for_task_type<'a>(&'a self, task_type: &'a str) -> impl Iterator<Item = &'a ModelPolicy> + 'a {
        self.models.values().filter(move |m| m.task_types.contains(task_type))
    }

    /// All distinct providers referenced by the catalog.
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<ProviderId> = self
            .models
            .values()
            .map(|m| m.provider.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        providers.sort();
        providers
    }

    pub fn health_check(&self) -> ComponentHealth {
        let now = chrono::Utc::now();
        if self.models.is_empty() {
            debug!("policy catalog is empty");
            return ComponentHealth::degraded("no models loaded", now);
        }
        ComponentHealth::healthy(format!("{} models loaded", self.models.len()), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> &'static str {
        r#"{
            "models": {
                "A": {
                    "id": "A", "provider": "p", "tools": [], "strengths": [],
                    "task_types": ["debug"], "default_success_rate": 0.9,
                    "default_latency_ms": 300, "cost_per_1k_tokens": 0.01
                },
                "B": {
                    "id": "B", "provider": "q", "tools": [], "strengths": [],
                    "task_types": ["feature"], "default_success_rate": 0.8,
                    "default_latency_ms": 500, "cost_per_1k_tokens": 0.02
                }
            }
        }"#
    }

    #[test]
    fn loads_and_looks_up_by_model_id() {
        let catalog = PolicyCatalog::from_json_bytes(fixture().as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("A").unwrap().provider, "p");
    }

    #[test]
    fn filters_candidates_by_task_type() {
        let catalog = PolicyCatalog::from_json_bytes(fixture().as_bytes()).unwrap();
        let candidates: Vec<_> = catalog.candidates_for_task_type("debug").map(|m| m.id.clone()).collect();
        assert_eq!(candidates, vec!["A".to_string()]);
    }

    #[test]
    fn malformed_file_is_policy_load_error() {
        let result = PolicyCatalog::from_json_bytes(b"not json");
        assert!(matches!(result, Err(Error::PolicyLoad(_))));
    }

    #[test]
    fn providers_are_deduplicated_and_sorted() {
        let catalog = PolicyCatalog::from_json_bytes(fixture().as_bytes()).unwrap();
        assert_eq!(catalog.providers(), vec!["p".to_string(), "q".to_string()]);
    }
}
