//! Engine error types.

/// Errors raised by an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An operation was called before `activate`.
    #[error("engine not activated")]
    NotActivated,

    /// The engine was already disposed.
    #[error("engine disposed")]
    Disposed,

    /// Transport-level error talking to the engine host.
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine rejected a request or failed while running it.
    #[error("engine error: {0}")]
    Failed(String),

    /// Engine output could not be parsed.
    #[error("failed to parse engine output: {0}")]
    Parse(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
