//! Error types for the metrics engine.

use thiserror::Error;

use dupmon_events::ResultState;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Mutations the engine refuses to apply. Prior state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("backup name must not be empty")]
    EmptyBackupName,

    #[error("counter overflow for backup '{backup}' result '{result}'")]
    CounterOverflow { backup: String, result: ResultState },

    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}
