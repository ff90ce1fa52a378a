//! Error types for the core module.

use agent_core::EngineError;

/// Core error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine rejected a call or went away.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Task execution failed.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A requested session is not in the task history.
    #[error("session not found in task history: {0}")]
    SessionNotFound(String),

    /// `--continue` found nothing to resume.
    #[error("no previous tasks found to continue in this workspace")]
    NoPreviousTask,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
