//! Pattern learning and advisory engine for the model-routing orchestrator.
//!
//! Historical sessions are scanned for anti-patterns and positive patterns
//! (`extractor`), stored in weighted catalogs (`catalog`), and combined with
//! live quota pressure into routing advice (`advisor`). `engine` is the
//! façade a caller actually holds: it drives ingestion, persists the catalogs
//! after every mutation, and dispatches a small fixed set of hook events.

pub mod advisor;
pub mod catalog;
pub mod engine;
pub mod extractor;
pub mod session;

pub use advisor::{AdviceContext, OrchestrationAdvisor};
pub use catalog::{AntiPatternCatalog, PositivePatternTracker, WarnContext};
pub use engine::{HookCallback, HookEvent, HookEventKind, LearningEngine, LearningEngineConfig};
pub use extractor::{BackfillEngine, BackfillSummary, PatternExtractor};
pub use session::{Session, SessionMessage, ToolCall};
