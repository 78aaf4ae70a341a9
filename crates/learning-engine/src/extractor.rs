//! PatternExtractor: scans historical session transcripts for anti-patterns and
//! positive patterns, and `BackfillEngine`, the batched driver that feeds a
//! directory of historical sessions through it without exhausting memory.
//!
//! The extractor treats a tool call's `payload` as identifying the file or
//! target the call acted on — the narrow session shape in `session` doesn't
//! carry structured tool arguments, so this is the simplifying assumption the
//! detectors below are built on.

use crate::catalog::{AntiPatternCatalog, PositivePatternTracker};
use crate::session::{Session, ToolCall};
use once_cell::sync::Lazy;
use regex::Regex;
use router_common::{AntiPatternType, Error, PositivePatternType, Result, Severity};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

const FILE_BATCH_SIZE: usize = 100;
const SESSION_BATCH_SIZE: usize = 10;

static SUPPRESSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(any|ignore|suppress|ts-ignore)\b").unwrap());

fn is_edit_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("edit") || lower.contains("write")
}

fn is_verify_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("build") || lower.contains("test") || lower.contains("cargo") || lower.contains("bash")
}

fn is_grep_tool(name: &str) -> bool {
    name.eq_ignore_ascii_case("grep")
}

fn is_read_tool(name: &str) -> bool {
    name.eq_ignore_ascii_case("read")
}

fn is_lsp_or_ast_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("lsp") || lower.contains("ast-grep") || lower.contains("ast_grep")
}

fn is_delegation_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("subagent") || lower.contains("task")
}

fn looks_like_error(call: &ToolCall) -> bool {
    call.is_error || call.response_excerpt.to_lowercase().contains("error")
}

fn normalized_error(call: &ToolCall) -> String {
    call.response_excerpt.trim().to_lowercase()
}

/// Scans session transcripts and records detected patterns into the shared catalogs.
pub struct PatternExtractor {
    anti_patterns: Arc<AntiPatternCatalog>,
    positive_patterns: Arc<PositivePatternTracker>,
    /// Normalised error string -> session ids it has appeared in, for the
    /// cross-session `repeated_mistake` detector.
    error_sightings: Mutex<HashMap<String, HashSet<String>>>,
    /// Session ids already ingested, so `extract_from_session` is idempotent.
    processed_sessions: Mutex<HashSet<String>>,
}

impl PatternExtractor {
    pub fn new(anti_patterns: Arc<AntiPatternCatalog>, positive_patterns: Arc<PositivePatternTracker>) -> Self {
        Self {
            anti_patterns,
            positive_patterns,
            error_sightings: Mutex::new(HashMap::new()),
            processed_sessions: Mutex::new(HashSet::new()),
        }
    }

    /// Run every detector over `session`, merging findings into the catalogs.
    /// A no-op on repeat calls for the same session id.
    pub async fn extract_from_session(&self, session: &Session) {
        {
            let mut processed = self.processed_sessions.lock().await;
            if !processed.insert(session.id.clone()) {
                return;
            }
        }

        let calls: Vec<&ToolCall> = session.tool_calls().collect();

        self.detect_shotgun_debug(session, &calls).await;
        self.detect_inefficient_solution(session, &calls).await;
        self.detect_type_suppression(session, &calls).await;
        self.detect_broken_state(session, &calls).await;
        self.detect_failed_debug(session, &calls).await;
        self.detect_wrong_tool(session, &calls).await;
        self.detect_quota_exhaustion_risk(session, &calls).await;
        self.detect_repeated_mistake(session, &calls).await;

        self.detect_efficient_debug(session, &calls).await;
        self.detect_creative_solution(session, &calls).await;
        self.detect_good_delegation(session, &calls).await;
        self.detect_fast_resolution(session).await;
    }

    async fn detect_shotgun_debug(&self, session: &Session, calls: &[&ToolCall]) {
        let mut edits_per_file: HashMap<&str, (u32, u32)> = HashMap::new();
        for call in calls.iter().filter(|c| is_edit_tool(&c.name)) {
            let entry = edits_per_file.entry(call.payload.as_str()).or_insert((0, 0));
            entry.0 += 1;
            if looks_like_error(call) {
                entry.1 += 1;
            }
        }

        for (file, (total_edits, failed_edits)) in edits_per_file {
            if total_edits <= 3 {
                continue;
            }
            let severity = if total_edits > 6 { Severity::Critical } else { Severity::High };
            self.anti_patterns
                .add(
                    AntiPatternType::ShotgunDebug,
                    format!("shotgun editing {file}"),
                    severity,
                    format!("total_edits={total_edits} failed_edits={failed_edits} session={}", session.id),
                )
                .await;
        }
    }

    async fn detect_inefficient_solution(&self, session: &Session, calls: &[&ToolCall]) {
        for call in calls.iter().filter(|c| is_edit_tool(&c.name)) {
            let estimated_tokens = (call.payload.chars().count() as f64) / 4.0;
            let lines_changed = call.payload.lines().count().max(1) as f64;
            if estimated_tokens / lines_changed > 500.0 {
                self.anti_patterns
                    .add(
                        AntiPatternType::InefficientSolution,
                        session.task_type_hint(),
                        Severity::Medium,
                        session.task_type_hint(),
                    )
                    .await;
            }
        }
    }

    async fn detect_type_suppression(&self, session: &Session, calls: &[&ToolCall]) {
        for call in calls.iter().filter(|c| is_edit_tool(&c.name)) {
            if SUPPRESSION_RE.is_match(&call.payload) {
                self.anti_patterns
                    .add(
                        AntiPatternType::TypeSuppression,
                        format!("suppression marker in edit to {}", call.payload),
                        Severity::High,
                        session.id.clone(),
                    )
                    .await;
            }
        }
    }

    async fn detect_broken_state(&self, session: &Session, calls: &[&ToolCall]) {
        let mut streak = 0usize;
        let mut streak_start_file = "";
        for call in calls.iter().filter(|c| is_verify_tool(&c.name)) {
            if looks_like_error(call) {
                if streak == 0 {
                    streak_start_file = call.payload.as_str();
                }
                streak += 1;
            } else {
                streak = 0;
            }

            if streak >= 3 {
                self.anti_patterns
                    .add(
                        AntiPatternType::BrokenState,
                        format!("repeated failing verification near {streak_start_file}"),
                        Severity::High,
                        streak_start_file.to_string(),
                    )
                    .await;
                streak = 0;
            }
        }
    }

    async fn detect_failed_debug(&self, session: &Session, calls: &[&ToolCall]) {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for call in calls.iter().filter(|c| c.is_error) {
            *counts.entry(normalized_error(call)).or_insert(0) += 1;
        }
        for (error, count) in counts {
            if count >= 3 {
                self.anti_patterns
                    .add(AntiPatternType::FailedDebug, error, Severity::Medium, session.id.clone())
                    .await;
            }
        }
    }

    async fn detect_wrong_tool(&self, session: &Session, calls: &[&ToolCall]) {
        const WINDOW: usize = 4;
        if calls.len() < WINDOW {
            return;
        }
        for window in calls.windows(WINDOW) {
            let grep_count = window.iter().filter(|c| is_grep_tool(&c.name)).count();
            let read_count = window.iter().filter(|c| is_read_tool(&c.name)).count();
            if grep_count >= 2 && read_count >= 2 {
                self.anti_patterns
                    .add(
                        AntiPatternType::WrongTool,
                        "grep+read:".to_string() + &session.task_type_hint(),
                        Severity::Low,
                        format!("grep:{}", session.task_type_hint()),
                    )
                    .await;
                break;
            }
        }
    }

    async fn detect_quota_exhaustion_risk(&self, session: &Session, calls: &[&ToolCall]) {
        let quota_mentions = calls.iter().filter(|c| c.response_excerpt.to_lowercase().contains("quota")).count();
        let fallback_mentions = calls.iter().filter(|c| c.response_excerpt.to_lowercase().contains("fallback")).count();
        if quota_mentions >= 2 || fallback_mentions >= 1 {
            self.anti_patterns
                .add(
                    AntiPatternType::QuotaExhaustionRisk,
                    "quota pressure observed in session transcript".to_string(),
                    Severity::Medium,
                    session.id.clone(),
                )
                .await;
        }
    }

    async fn detect_repeated_mistake(&self, session: &Session, calls: &[&ToolCall]) {
        let mut sightings = self.error_sightings.lock().await;
        for call in calls.iter().filter(|c| c.is_error) {
            let error = normalized_error(call);
            let sessions = sightings.entry(error.clone()).or_default();
            sessions.insert(session.id.clone());
            if sessions.len() >= 2 {
                self.anti_patterns
                    .add(AntiPatternType::RepeatedMistake, error, Severity::High, session.id.clone())
                    .await;
            }
        }
    }

    async fn detect_efficient_debug(&self, session: &Session, calls: &[&ToolCall]) {
        for window in calls.windows(3) {
            if is_read_tool(&window[0].name) && is_edit_tool(&window[1].name) && is_verify_tool(&window[2].name)
                && !looks_like_error(window[2])
            {
                self.positive_patterns
                    .add(
                        PositivePatternType::EfficientDebug,
                        "read then edit then clean verify".to_string(),
                        1.0,
                        session.task_type_hint(),
                    )
                    .await;
            }
        }
    }

    async fn detect_creative_solution(&self, session: &Session, calls: &[&ToolCall]) {
        if calls.is_empty() {
            return;
        }
        let error_ratio = calls.iter().filter(|c| c.is_error).count() as f64 / calls.len() as f64;
        if calls.iter().any(|c| is_lsp_or_ast_tool(&c.name)) && error_ratio < 0.2 {
            self.positive_patterns
                .add(
                    PositivePatternType::CreativeSolution,
                    "used structural search/LSP tooling with few errors".to_string(),
                    1.0 - error_ratio,
                    session.task_type_hint(),
                )
                .await;
        }
    }

    async fn detect_good_delegation(&self, session: &Session, calls: &[&ToolCall]) {
        if calls.is_empty() {
            return;
        }
        let error_ratio = calls.iter().filter(|c| c.is_error).count() as f64 / calls.len() as f64;
        if calls.iter().any(|c| is_delegation_tool(&c.name)) && error_ratio < 0.2 {
            self.positive_patterns
                .add(
                    PositivePatternType::GoodDelegation,
                    "delegated subtasks with few errors".to_string(),
                    1.0 - error_ratio,
                    session.task_type_hint(),
                )
                .await;
        }
    }

    async fn detect_fast_resolution(&self, session: &Session) {
        let message_count = session.messages.len();
        if !(2..=5).contains(&message_count) {
            return;
        }
        let calls: Vec<&ToolCall> = session.tool_calls().collect();
        if calls.is_empty() {
            return;
        }
        let error_ratio = calls.iter().filter(|c| c.is_error).count() as f64 / calls.len() as f64;
        if error_ratio < 0.2 {
            self.positive_patterns
                .add(
                    PositivePatternType::FastResolution,
                    "resolved in a short, mostly error-free session".to_string(),
                    1.0 - error_ratio,
                    session.task_type_hint(),
                )
                .await;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackfillSummary {
    pub sessions_processed: usize,
    pub sessions_skipped: usize,
}

/// Batched driver feeding a directory of historical session transcripts
/// through a `PatternExtractor` without exhausting memory on a large backlog.
pub struct BackfillEngine {
    extractor: Arc<PatternExtractor>,
}

impl BackfillEngine {
    pub fn new(extractor: Arc<PatternExtractor>) -> Self {
        Self { extractor }
    }

    /// Walk `dir` for `*.json` session files, ingesting them in batches of
    /// `SESSION_BATCH_SIZE`, yielding to the scheduler between batches.
    pub async fn backfill_directory(&self, dir: impl AsRef<Path>) -> Result<BackfillSummary> {
        let mut entries = tokio::fs::read_dir(dir.as_ref())
            .await
            .map_err(|e| Error::Persistence(format!("reading session directory: {e}")))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Persistence(e.to_string()))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }

        let mut summary = BackfillSummary::default();
        for file_batch in paths.chunks(FILE_BATCH_SIZE) {
            for session_batch in file_batch.chunks(SESSION_BATCH_SIZE) {
                for path in session_batch {
                    match self.load_and_extract(path).await {
                        Ok(()) => summary.sessions_processed += 1,
                        Err(err) => {
                            tracing::warn!(path = %path.display(), error = %err, "skipping unreadable session file");
                            summary.sessions_skipped += 1;
                        }
                    }
                }
                tokio::task::yield_now().await;
            }
        }

        Ok(summary)
    }

    async fn load_and_extract(&self, path: &Path) -> Result<()> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| Error::Persistence(e.to_string()))?;
        let session: Session = serde_json::from_str(&contents)?;
        self.extractor.extract_from_session(&session).await;
        Ok(())
    }
}

impl Session {
    /// Best-effort task-type label for patterns that need one but have no
    /// richer signal than the session transcript itself.
    fn task_type_hint(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role == "task_type")
            .map(|m| m.role.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionMessage;
    use router_common::{Clock, SystemClock};
    use std::sync::Arc;

    fn call(name: &str, payload: &str, response: &str, is_error: bool) -> ToolCall {
        ToolCall { name: name.to_string(), payload: payload.to_string(), response_excerpt: response.to_string(), is_error }
    }

    fn session_with(id: &str, calls: Vec<ToolCall>) -> Session {
        Session { id: id.to_string(), messages: vec![SessionMessage { role: "assistant".to_string(), tool_calls: calls }] }
    }

    fn extractor() -> PatternExtractor {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        PatternExtractor::new(Arc::new(AntiPatternCatalog::new(clock)), Arc::new(PositivePatternTracker::new()))
    }

    #[tokio::test]
    async fn scenario_six_shotgun_debug_matches_documented_fields() {
        let extractor = extractor();
        let calls = vec![
            call("edit", "src/auth.js", "ok", false),
            call("edit", "src/auth.js", "TypeError", true),
            call("edit", "src/auth.js", "TypeError", true),
            call("edit", "src/auth.js", "TypeError", true),
            call("edit", "src/auth.js", "ok", false),
        ];
        let session = session_with("s1", calls);
        extractor.extract_from_session(&session).await;

        let patterns = extractor.anti_patterns.all().await;
        let shotgun = patterns.iter().find(|p| p.kind == AntiPatternType::ShotgunDebug).unwrap();
        assert_eq!(shotgun.severity, Severity::High);
        assert!(shotgun.context.contains("total_edits=5"));
        assert!(shotgun.context.contains("failed_edits=3"));
    }

    #[tokio::test]
    async fn extraction_is_idempotent_on_repeat_ingestion() {
        let extractor = extractor();
        let calls = vec![
            call("edit", "src/auth.js", "ok", false),
            call("edit", "src/auth.js", "TypeError", true),
            call("edit", "src/auth.js", "TypeError", true),
            call("edit", "src/auth.js", "TypeError", true),
        ];
        let session = session_with("s1", calls);
        extractor.extract_from_session(&session).await;
        let first = extractor.anti_patterns.all().await;
        extractor.extract_from_session(&session).await;
        let second = extractor.anti_patterns.all().await;
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].occurrences, second[0].occurrences);
    }

    #[tokio::test]
    async fn type_suppression_detects_ts_ignore_marker() {
        let extractor = extractor();
        let session = session_with("s1", vec![call("edit", "// @ts-ignore next line", "ok", false)]);
        extractor.extract_from_session(&session).await;
        let patterns = extractor.anti_patterns.all().await;
        assert!(patterns.iter().any(|p| p.kind == AntiPatternType::TypeSuppression));
    }

    #[tokio::test]
    async fn wrong_tool_fires_on_grep_read_heavy_window() {
        let extractor = extractor();
        let calls = vec![
            call("grep", "foo", "matches", false),
            call("read", "a.rs", "contents", false),
            call("grep", "bar", "matches", false),
            call("read", "b.rs", "contents", false),
        ];
        let session = session_with("s1", calls);
        extractor.extract_from_session(&session).await;
        let patterns = extractor.anti_patterns.all().await;
        assert!(patterns.iter().any(|p| p.kind == AntiPatternType::WrongTool));
    }

    #[tokio::test]
    async fn repeated_mistake_needs_two_distinct_sessions() {
        let extractor = extractor();
        let err_call = call("bash", "cargo test", "assertion failed: left == right", true);
        extractor.extract_from_session(&session_with("s1", vec![err_call.clone()])).await;
        let after_one = extractor.anti_patterns.all().await;
        assert!(!after_one.iter().any(|p| p.kind == AntiPatternType::RepeatedMistake));

        extractor.extract_from_session(&session_with("s2", vec![err_call])).await;
        let after_two = extractor.anti_patterns.all().await;
        assert!(after_two.iter().any(|p| p.kind == AntiPatternType::RepeatedMistake));
    }

    #[tokio::test]
    async fn efficient_debug_positive_pattern_from_clean_sequence() {
        let extractor = extractor();
        let calls = vec![call("read", "a.rs", "contents", false), call("edit", "a.rs", "ok", false), call("cargo_test", "a.rs", "ok", false)];
        let session = session_with("s1", calls);
        extractor.extract_from_session(&session).await;
        let positives = extractor.positive_patterns.all().await;
        assert!(positives.iter().any(|p| p.kind == PositivePatternType::EfficientDebug));
    }

    #[tokio::test]
    async fn backfill_engine_processes_a_directory_of_sessions() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            let session = session_with(&format!("s{i}"), vec![call("read", "a.rs", "ok", false)]);
            let path = dir.path().join(format!("session-{i}.json"));
            tokio::fs::write(&path, serde_json::to_vec(&session).unwrap()).await.unwrap();
        }
        let extractor = Arc::new(extractor());
        let backfill = BackfillEngine::new(extractor);
        let summary = backfill.backfill_directory(dir.path()).await.unwrap();
        assert_eq!(summary.sessions_processed, 3);
        assert_eq!(summary.sessions_skipped, 0);
    }
}
