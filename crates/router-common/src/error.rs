//! Error taxonomy for the model-routing and learning orchestrator.

use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds a routing call, or any ambient subsystem, can surface.
///
/// The routing call itself resolves to either a `Selection` or exactly one of
/// `NoAvailableProvider`, `OverrideModelUnknown`, `KeyAcquisitionTimeout`,
/// `PolicyLoad`, `Persistence`, `Hook`, or `Strategy` — every lower-level
/// failure is absorbed into one of these before it reaches the caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no available provider: {0}")]
    NoAvailableProvider(String),

    #[error("override model unknown: {0}")]
    OverrideModelUnknown(String),

    #[error("key acquisition timed out: {0}")]
    KeyAcquisitionTimeout(String),

    #[error("policy load error: {0}")]
    PolicyLoad(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("hook error: {0}")]
    Hook(String),

    #[error("strategy error: {0}")]
    Strategy(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Whether a caller may reasonably retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_) | Error::KeyAcquisitionTimeout(_))
    }

    /// Stable category string, used for metrics labels and log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Error::NoAvailableProvider(_) => "no_available_provider",
            Error::OverrideModelUnknown(_) => "override_model_unknown",
            Error::KeyAcquisitionTimeout(_) => "key_acquisition_timeout",
            Error::PolicyLoad(_) => "policy_load",
            Error::Persistence(_) => "persistence",
            Error::Hook(_) => "hook",
            Error::Strategy(_) => "strategy",
            Error::Configuration(_) => "configuration",
            Error::Network(_) => "network",
            Error::Timeout(_) => "timeout",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Serialization(_) => "serialization",
            Error::Generic(_) => "generic",
        }
    }
}
