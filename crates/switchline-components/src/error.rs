//! Component error types.

use thiserror::Error;

/// Result type for component operations.
pub type ComponentResult<T> = Result<T, ComponentError>;

/// Errors that can occur building or running components.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The component spec is not recognized.
    #[error("unknown component {0:?} (expected echo, uppercase, prefix:<p>, suffix:<s>, or cmd:<program>)")]
    UnknownComponent(String),

    /// The external process could not be spawned or managed.
    #[error("process error: {0}")]
    Process(#[from] std::io::Error),
}
