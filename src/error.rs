//! Error handling module for archsetup
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Library modules return these; orchestration layers wrap them in `anyhow`
//! with context before they reach `main`.
//!
//! # Taxonomy
//!
//! | Variant        | Raised when |
//! |----------------|-------------|
//! | `Validation`   | empty or mismatched credentials, invalid selection or config value |
//! | `Cancelled`    | operator cancelled, closed input, or did not type `yes` |
//! | `Precondition` | disk state makes the chosen plan impossible |
//! | `Command`      | an external tool exited non-zero |

use thiserror::Error;

/// Main error type for archsetup
#[derive(Error, Debug)]
pub enum InstallError {
    /// IO errors (file operations, terminal, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operator input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operator cancelled a selection or refused confirmation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Disk or system state does not allow the requested operation.
    /// Always raised before any destructive step.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// External tool exited unsuccessfully
    #[error("{tool} failed (exit code {code}): {stderr}")]
    Command {
        tool: String,
        code: i32,
        stderr: String,
    },

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Install state machine transition errors
    #[error("Install transition error: {0}")]
    InstallTransition(String),

    /// System errors (spawn failures, missing devices)
    #[error("System error: {0}")]
    System(String),
}

/// Result type alias for archsetup operations
pub type Result<T> = std::result::Result<T, InstallError>;

// Convenient error constructors
impl InstallError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a command failure error
    pub fn command(tool: impl Into<String>, code: i32, stderr: impl Into<String>) -> Self {
        Self::Command {
            tool: tool.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an install transition error
    pub fn install_transition(msg: impl Into<String>) -> Self {
        Self::InstallTransition(msg.into())
    }

    /// Create a system error
    pub fn system(msg: impl Into<String>) -> Self {
        Self::System(msg.into())
    }

    /// True when the operator chose to stop rather than something failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
