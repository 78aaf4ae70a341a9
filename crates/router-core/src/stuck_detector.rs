//! StuckBugDetector: a bounded ring of recent failures per session, used to
//! decide when `PerspectiveSwitch` should force a different model.
//!
//! Grounded on the teacher's `IntelligentRouter`'s bounded `request_history`
//! (kept to the last 1000 entries, drained in batches) — here the ring is
//! much smaller (50) and keyed per session rather than global.

use chrono::{DateTime, Utc};
use router_common::{utils::jaccard_similarity, Clock, StuckDetectorConfig};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

const MAX_RECENT_FAILURES: usize = 50;

#[derive(Debug, Clone)]
struct FailureRecord {
    fingerprint: String,
    at: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionState {
    recent_failures: VecDeque<FailureRecord>,
    last_success_at: Option<DateTime<Utc>>,
    first_seen_at: DateTime<Utc>,
}

/// Fingerprint a failure from its code snippet and error message, per §4.6.
fn fingerprint(code: &str, error: &str) -> String {
    let mut tokens: Vec<&str> = code.split_whitespace().chain(error.split_whitespace()).collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Tracks recent failures per session and decides whether that session looks stuck.
pub struct StuckBugDetector {
    config: StuckDetectorConfig,
    clock: Arc<dyn Clock>,
    sessions: Mutex<std::collections::HashMap<String, SessionState>>,
}

impl StuckBugDetector {
    pub fn new(config: StuckDetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, sessions: Mutex::new(std::collections::HashMap::new()) }
    }

    /// Record a failure for `session_id`, fingerprinted from the failing code
    /// and error message.
    pub async fn record_failure(&self, session_id: &str, code: &str, error: &str) {
        let now = self.clock.now_utc();
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(session_id.to_string()).or_insert_with(|| SessionState {
            recent_failures: VecDeque::new(),
            last_success_at: None,
            first_seen_at: now,
        });

        state.recent_failures.push_back(FailureRecord { fingerprint: fingerprint(code, error), at: now });
        if state.recent_failures.len() > MAX_RECENT_FAILURES {
            state.recent_failures.pop_front();
        }
    }

    /// Record a success for `session_id`, resetting the timeout clock.
    pub async fn record_success(&self, session_id: &str) {
        let now = self.clock.now_utc();
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(session_id.to_string()).or_insert_with(|| SessionState {
            recent_failures: VecDeque::new(),
            last_success_at: None,
            first_seen_at: now,
        });
        state.last_success_at = Some(now);
        state.recent_failures.clear();
    }

    /// Whether `session_id` currently looks stuck: no success for longer than
    /// `timeout_ms`, or `failure_threshold` failures within `failure_window_ms`
    /// with at least two of them near-identical (Jaccard ≥ `similarity_threshold`).
    pub async fn is_stuck(&self, session_id: &str) -> bool {
        let now = self.clock.now_utc();
        let sessions = self.sessions.lock().await;
        let Some(state) = sessions.get(session_id) else { return false };

        let since_last_activity = state.last_success_at.unwrap_or(state.first_seen_at);
        let timed_out = (now - since_last_activity).num_milliseconds() as u64 > self.config.timeout_ms
            && !state.recent_failures.is_empty();
        if timed_out {
            return true;
        }

        let window_start = now - chrono::Duration::milliseconds(self.config.failure_window_ms as i64);
        let recent: Vec<&FailureRecord> =
            state.recent_failures.iter().filter(|f| f.at >= window_start).collect();

        if recent.len() < self.config.failure_threshold as usize {
            return false;
        }

        for i in 0..recent.len() {
            for j in (i + 1)..recent.len() {
                if jaccard_similarity(&recent[i].fingerprint, &recent[j].fingerprint) >= self.config.similarity_threshold
                {
                    return true;
                }
            }
        }
        false
    }
}
