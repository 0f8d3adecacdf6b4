//! Error types for checkpointing.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while taking, recording, or restoring checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem error outside of a restore's write phase.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A stored blob no longer matches its content hash.
    #[error("blob {hash} for '{path}' is corrupt")]
    CorruptBlob {
        /// Expected hash.
        hash: String,
        /// Workspace-relative path the blob restores.
        path: String,
    },

    /// A blob referenced by a manifest is missing from the store.
    #[error("blob {hash} for '{path}' is missing")]
    MissingBlob {
        /// Expected hash.
        hash: String,
        /// Workspace-relative path the blob restores.
        path: String,
    },

    /// Restore failed after the workspace had already been modified.
    ///
    /// The workspace is in a mixed state and must be inspected by hand.
    #[error("partial restore of {checkpoint}: {written} paths written before failure at '{path}': {reason}")]
    PartialRestore {
        /// Checkpoint or snapshot being restored.
        checkpoint: String,
        /// Number of paths already written or removed.
        written: usize,
        /// Path that failed.
        path: String,
        /// Failure detail.
        reason: String,
    },

    /// Unknown checkpoint or snapshot.
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    /// The checkpoint was superseded by an earlier restore.
    #[error("checkpoint {0} is stale")]
    Stale(String),

    /// A git command in the shadow repository failed.
    #[error("git {command} failed: {stderr}")]
    Git {
        /// Subcommand and arguments.
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// A snapshot could not be produced.
    #[error("snapshot failed: {0}")]
    Snapshot(String),

    /// Unknown backend name in configuration.
    #[error("unknown checkpoint backend '{0}' (expected 'directory' or 'git')")]
    UnknownBackend(String),

    /// The session id cannot name a log file.
    #[error(transparent)]
    Security(#[from] keel_core::SecurityError),

    /// Manifest or log (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;
