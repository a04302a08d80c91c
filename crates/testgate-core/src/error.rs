//! Error taxonomy for testgate.
//!
//! Only configuration problems and interrupts are errors. A test command
//! that exits non-zero or cannot be spawned is an ordinary failed outcome
//! (see [`crate::exec::ExecOutcome`]).

/// testgate errors.
#[derive(Debug, thiserror::Error)]
pub enum TestgateError {
    #[error("invalid iteration count {0}: must be a positive integer")]
    InvalidIterationCount(i64),

    #[error("invalid command for {name}: {reason}")]
    InvalidCommand { name: String, reason: String },

    #[error("invalid pattern {pattern:?} in scope {scope}: {reason}")]
    InvalidPattern {
        scope: String,
        pattern: String,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("interrupted while running {0}")]
    Interrupted(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TestgateError {
    /// Whether this error was raised before any process was spawned.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TestgateError::InvalidIterationCount(_)
                | TestgateError::InvalidCommand { .. }
                | TestgateError::InvalidPattern { .. }
                | TestgateError::Config(_)
                | TestgateError::Toml(_)
        )
    }
}

/// Result type for testgate operations.
pub type Result<T> = std::result::Result<T, TestgateError>;
