//! Minimal session-log ingestion contract for `PatternExtractor`.
//!
//! The host agent's actual log-file layout is out of scope here — this is a
//! narrow, documented shape the extractor scans, not a full log schema.

use serde::{Deserialize, Serialize};

/// One tool invocation recorded inside a session message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub payload: String,
    pub response_excerpt: String,
    pub is_error: bool,
}

/// One message in a historical session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// A full historical session: an id plus its ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub messages: Vec<SessionMessage>,
}

impl Session {
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.messages.iter().flat_map(|m| m.tool_calls.iter())
    }
}
