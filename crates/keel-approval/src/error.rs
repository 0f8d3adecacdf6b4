use keel_core::SecurityError;

/// Errors raised while building or updating approval policy.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// The approval mode string is not recognized.
    #[error("unknown approval mode '{0}'; expected default, auto-edit, yolo or plan")]
    UnknownMode(String),

    /// A tool-list pattern is not a valid glob.
    #[error("invalid tool pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Glob parser message.
        reason: String,
    },

    /// The plan scratch scope could not be established.
    #[error("invalid plan scope: {0}")]
    Scope(#[from] SecurityError),

    /// The policy lock was poisoned by a panicking writer.
    #[error("policy store poisoned")]
    Poisoned,
}

/// Result type for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
