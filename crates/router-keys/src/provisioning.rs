//! API-key provisioning from the environment (§6).
//!
//! Reads `<PROVIDER>_API_KEYS` (comma-separated) or a singular
//! `<PROVIDER>_API_KEY` for each recognised provider and builds one
//! `KeyRotator` per provider that has at least one key configured.

use crate::KeyRotator;
use router_common::{Clock, ProviderId, RotatorConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Providers whose keys this orchestrator knows how to provision.
pub const RECOGNISED_PROVIDERS: &[&str] =
    &["nvidia", "cerebras", "groq", "sambanova", "openai", "anthropic", "google"];

/// Strategy-level names that resolve to a canonical provider pool rather than
/// naming one directly (e.g. Google's Antigravity surface shares Google's keys).
fn canonical_provider(name: &str) -> ProviderId {
    match name {
        "antigravity" | "gemini" => "google".to_string(),
        other => other.to_string(),
    }
}

fn env_var_name(provider: &str) -> String {
    provider.to_ascii_uppercase().replace('-', "_")
}

/// Read `<PROVIDER>_API_KEYS` / `<PROVIDER>_API_KEY` for one provider, applying
/// the alias map so callers can ask by either the canonical or strategy-level name.
pub fn keys_for_provider(provider: &str) -> Vec<String> {
    let canonical = canonical_provider(provider);
    let prefix = env_var_name(&canonical);

    if let Ok(plural) = std::env::var(format!("{prefix}_API_KEYS")) {
        return plural
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(single) = std::env::var(format!("{prefix}_API_KEY")) {
        if !single.trim().is_empty() {
            return vec![single.trim().to_string()];
        }
    }
    Vec::new()
}

/// Build one `KeyRotator` per recognised provider that has at least one key
/// configured in the environment.
pub fn provision_from_env(config: RotatorConfig, clock: Arc<dyn Clock>) -> HashMap<ProviderId, Arc<KeyRotator>> {
    let mut rotators = HashMap::new();
    for provider in RECOGNISED_PROVIDERS {
        let secrets = keys_for_provider(provider);
        if secrets.is_empty() {
            continue;
        }
        let keyed: Vec<(String, String)> = secrets
            .into_iter()
            .enumerate()
            .map(|(i, secret)| (format!("{provider}-{i}"), secret))
            .collect();
        let rotator = KeyRotator::with_clock(provider.to_string(), keyed, config.clone(), clock.clone());
        rotators.insert(provider.to_string(), Arc::new(rotator));
    }
    rotators
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn reads_comma_separated_plural_var() {
        std::env::set_var("OPENAI_API_KEYS", "a,b, c");
        let keys = keys_for_provider("openai");
        std::env::remove_var("OPENAI_API_KEYS");
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    #[serial]
    fn falls_back_to_singular_var() {
        std::env::remove_var("ANTHROPIC_API_KEYS");
        std::env::set_var("ANTHROPIC_API_KEY", "solo-key");
        let keys = keys_for_provider("anthropic");
        std::env::remove_var("ANTHROPIC_API_KEY");
        assert_eq!(keys, vec!["solo-key"]);
    }

    #[test]
    #[serial]
    fn alias_resolves_to_canonical_pool() {
        std::env::set_var("GOOGLE_API_KEYS", "g1");
        let keys = keys_for_provider("antigravity");
        std::env::remove_var("GOOGLE_API_KEYS");
        assert_eq!(keys, vec!["g1"]);
    }

    #[test]
    #[serial]
    fn unset_provider_yields_empty() {
        std::env::remove_var("GROQ_API_KEYS");
        std::env::remove_var("GROQ_API_KEY");
        assert!(keys_for_provider("groq").is_empty());
    }
}
