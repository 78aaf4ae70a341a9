//! Adaptive scoring, strategy orchestration, and stuck-task detection for the
//! model-routing orchestrator.
//!
//! This crate holds the three components that sit between a candidate model
//! set (`router-policy`) and a final `Selection`: the strategy chain that may
//! short-circuit scoring entirely, the scorer itself, and the stuck-task
//! detector that feeds `PerspectiveSwitch`. The facade that wires them
//! together with key acquisition and outcome recording lives in `model-router`.

mod scorer;
mod strategy;
mod stuck_detector;

pub use scorer::{AdaptiveScorer, ScoreResult};
pub use strategy::{
    FallbackLayer, ManualOverride, PerspectiveSwitch, ProjectStart, ReversionManager, Strategy, StrategyDecision,
    StrategyOrchestrator,
};
pub use stuck_detector::StuckBugDetector;
