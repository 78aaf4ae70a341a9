//! Small stateless helpers shared across components.

use chrono::{DateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new correlation id (task id, advice id, pattern id, ...).
pub fn generate_id() -> Uuid {
    Uuid::new_v4()
}

pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Convert a byte count to a human-readable string, for health/log messages.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{bytes} {}", UNITS[unit_index])
    } else {
        format!("{size:.2} {}", UNITS[unit_index])
    }
}

/// Plain exponential backoff, no jitter — callers needing jitter go through `retry`.
pub fn exponential_backoff(attempt: u32, initial_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> u64 {
    let delay = initial_delay_ms as f64 * multiplier.powi(attempt as i32);
    (delay as u64).min(max_delay_ms)
}

/// Non-cryptographic hash, used for fingerprinting stuck-bug failure tokens.
pub fn simple_hash(s: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Nearest-rank percentile over a latency sample, used by scorer diagnostics.
pub fn calculate_percentile(mut latencies: Vec<u64>, percentile: f64) -> u64 {
    if latencies.is_empty() {
        return 0;
    }
    latencies.sort_unstable();
    let index = ((latencies.len() as f64 * percentile / 100.0) - 1.0).max(0.0) as usize;
    latencies[index.min(latencies.len() - 1)]
}

/// Jaccard similarity between two whitespace-tokenized strings, used by the
/// stuck-bug detector's fingerprint comparison and the positive-pattern merge.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;

    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();

    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Validate a model id against the narrow charset the policy file is expected to use.
pub fn validate_model_id(model_id: &str) -> bool {
    !model_id.is_empty()
        && model_id.len() <= 256
        && model_id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_rounds_to_two_decimals() {
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        assert_eq!(exponential_backoff(0, 1000, 60_000, 2.0), 1000);
        assert_eq!(exponential_backoff(1, 1000, 60_000, 2.0), 2000);
        assert_eq!(exponential_backoff(10, 1000, 60_000, 2.0), 60_000);
    }

    #[test]
    fn validate_model_id_rejects_spaces_and_empty() {
        assert!(validate_model_id("model-1.0"));
        assert!(validate_model_id("my_model_v2"));
        assert!(!validate_model_id(""));
        assert!(!validate_model_id("model with spaces"));
    }

    #[test]
    fn calculate_percentile_matches_known_samples() {
        let latencies = vec![100, 200, 300, 400, 500];
        assert_eq!(calculate_percentile(latencies.clone(), 50.0), 300);
        assert_eq!(calculate_percentile(latencies, 95.0), 500);
        assert_eq!(calculate_percentile(vec![], 95.0), 0);
    }

    #[test]
    fn jaccard_similarity_matches_scenario_five_threshold() {
        let score = jaccard_similarity("type error at x", "type error at x in auth");
        assert!(score >= 0.5);
        assert_eq!(jaccard_similarity("", ""), 1.0);
    }
}
