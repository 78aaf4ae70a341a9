//! ModelRouter facade: the single entry point that turns a `TaskContext`
//! into a `Selection` and feeds the outcome of acting on it back to every
//! component that needs to learn from it.

mod outcome_bus;
mod router;

pub use outcome_bus::{OutcomeBus, OutcomeEvent, DEFAULT_CAPACITY};
pub use router::{ModelRouter, ModelRouterComponents};
