//! Error types for engine startup.

use thiserror::Error;

/// Errors surfaced by the startup coordinator and the provider built on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartupError {
    /// An owner-only operation was called from another thread
    #[error("{operation} must be called on the owner thread")]
    NotOwnerContext { operation: &'static str },

    /// The initialization routine failed on the calling (owner) thread
    #[error("Error initializing engine: {0}")]
    Init(String),

    /// Initialization already failed earlier; the engine will never start
    #[error("Engine startup previously failed: {0}")]
    Poisoned(String),

    /// The startup task could not be posted to the owner thread
    #[error("Failed to dispatch to owner thread: {0}")]
    Dispatch(String),

    /// The operation needs a started engine
    #[error("{operation} requires the engine to be started")]
    NotStarted { operation: &'static str },
}

/// Result type for startup operations
pub type StartupResult<T> = std::result::Result<T, StartupError>;
