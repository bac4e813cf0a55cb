//! Error types for pipeline orchestration

use crate::record::ComponentId;
use crate::state::ComponentState;
use thiserror::Error;

/// Pipeline errors
///
/// `Success` and `Async` are not errors: they are reported as
/// [`Completion::Done`](crate::Completion::Done) and
/// [`Completion::Pending`](crate::Completion::Pending).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Wait was cancelled before components converged
    #[error("Wait interrupted before components converged")]
    Interrupted,

    /// Wait exceeded its deadline without convergence
    #[error("Timed out waiting for components to converge")]
    TimedOut,

    /// A component reported failure (synchronously or via its event channel)
    #[error("Component operation failed: {0}")]
    OperationFailed(String),

    /// A component does not implement the requested operation
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Requested state cannot be used as a target
    #[error("Invalid target state: {0}")]
    InvalidTarget(ComponentState),

    /// Command queue full, or a conflicting wait/command is outstanding
    #[error("Pipeline busy")]
    Busy,

    /// Event or query referenced a component that is not attached
    #[error("Unknown component: {0}")]
    UnknownComponent(ComponentId),

    /// Pipeline has been torn down
    #[error("Pipeline has been shut down")]
    ShutDown,

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Stable numeric code, carried as `param1` of outbound messages
    pub fn code(&self) -> i32 {
        match self {
            Self::Interrupted => -1,
            Self::TimedOut => -2,
            Self::OperationFailed(_) => -3,
            Self::Unsupported(_) => -4,
            Self::InvalidTarget(_) => -5,
            Self::Busy => -6,
            Self::UnknownComponent(_) => -7,
            Self::ShutDown => -8,
            Self::Config(_) => -9,
        }
    }

    /// Short variant name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Interrupted => "Interrupted",
            Self::TimedOut => "TimedOut",
            Self::OperationFailed(_) => "OperationFailed",
            Self::Unsupported(_) => "Unsupported",
            Self::InvalidTarget(_) => "InvalidTarget",
            Self::Busy => "Busy",
            Self::UnknownComponent(_) => "UnknownComponent",
            Self::ShutDown => "ShutDown",
            Self::Config(_) => "Config",
        }
    }

    /// Shorthand for [`PipelineError::OperationFailed`]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::OperationFailed(message.into())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
