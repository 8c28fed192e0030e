//! Error types for the engine

use thiserror::Error;

use crate::models::PositionStatus;

/// Result type alias using our TradeError
pub type Result<T> = std::result::Result<T, TradeError>;

/// Every failure a command caller or the execution layer can observe
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    /// Malformed or out-of-range command parameters (nothing was mutated)
    #[error("Validation error: {0}")]
    Validation(String),

    /// No active position or limit order for the asset
    #[error("No position found for {0}")]
    NotFound(String),

    /// Command not legal in the position's current state
    #[error("Invalid state for {asset}: {status:?} ({reason})")]
    InvalidState {
        asset: String,
        status: PositionStatus,
        reason: String,
    },

    /// Submission exhausted its retries, or only part of the quantity filled
    #[error("Execution failed for {asset}: {reason} (filled {filled})")]
    ExecutionFailed {
        asset: String,
        filled: f64,
        reason: String,
    },

    /// The signing service refused the intent
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// A single submission attempt was rejected by the collaborator
    #[error("Submission rejected: {0}")]
    Submission(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The coordinator task is gone or dropped a reply
    #[error("Coordinator channel error: {0}")]
    Channel(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TradeError {
    pub fn invalid_state(
        asset: impl Into<String>,
        status: PositionStatus,
        reason: impl Into<String>,
    ) -> Self {
        TradeError::InvalidState {
            asset: asset.into(),
            status,
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind, used for the JSON result lines
    pub fn kind(&self) -> &'static str {
        match self {
            TradeError::Validation(_) => "ValidationError",
            TradeError::NotFound(_) => "NotFound",
            TradeError::InvalidState { .. } => "InvalidState",
            TradeError::ExecutionFailed { .. } => "ExecutionFailed",
            TradeError::SigningFailed(_) => "SigningFailed",
            TradeError::Submission(_) => "SubmissionRejected",
            TradeError::Configuration(_) => "ConfigurationError",
            TradeError::Channel(_) => "ChannelError",
            TradeError::Internal(_) => "InternalError",
        }
    }
}

impl From<config::ConfigError> for TradeError {
    fn from(err: config::ConfigError) -> Self {
        TradeError::Configuration(err.to_string())
    }
}
