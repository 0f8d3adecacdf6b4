//! Session recorder error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from session storage.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session path failed containment or identifier checks. Fatal to
    /// initialization; raised before any file handle is opened.
    #[error("session path rejected: {0}")]
    Security(#[from] keel_core::SecurityError),

    /// The storage root is not usable.
    #[error("invalid storage root {path}: {reason}")]
    InvalidRoot {
        /// Configured root.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// Filesystem error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Another writer holds the session file.
    #[error("session file {0} is locked by another writer")]
    Locked(PathBuf),

    /// A write failed; the session is now flagged incomplete.
    #[error("failed to write session entry: {0}")]
    Write(String),

    /// The writer task is gone.
    #[error("session writer for {0} has stopped")]
    WriterClosed(String),

    /// No record exists for the session.
    #[error("session not found: {0}")]
    NotFound(String),

    /// Refusing to overwrite an existing record.
    #[error("session {0} already exists")]
    AlreadyExists(String),

    /// Unknown storage format name.
    #[error("unknown session format '{0}' (expected 'jsonl' or 'json')")]
    UnknownFormat(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SessionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
