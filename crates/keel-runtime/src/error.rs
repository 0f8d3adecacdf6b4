//! Runtime error types.

use thiserror::Error;

/// Errors raised while assembling or driving a session runtime.
///
/// Failures local to one tool call never surface here; they end that call in
/// a terminal state instead.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A tool with the same name is already registered.
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    /// A tool's registration metadata is inconsistent.
    #[error("invalid registration for tool '{tool}': {reason}")]
    InvalidRegistration {
        /// The tool name.
        tool: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Approval policy error.
    #[error("approval error: {0}")]
    Approval(#[from] keel_approval::ApprovalError),

    /// Checkpoint error.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] keel_checkpoint::CheckpointError),

    /// Session record error.
    #[error("session error: {0}")]
    Session(#[from] keel_session::SessionError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] keel_config::ConfigError),

    /// Security error.
    #[error("security error: {0}")]
    Security(#[from] keel_core::SecurityError),

    /// I/O error while preparing session directories.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being prepared.
        path: std::path::PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
