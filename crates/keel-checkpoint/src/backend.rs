//! Snapshot backend trait and backend selection.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::directory::DirectoryBackend;
use crate::error::{CheckpointError, CheckpointResult};
use crate::git::GitBackend;
use crate::record::{RestoreReport, SnapshotHandle};

/// Stores and restores whole-workspace snapshots.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Short backend name recorded alongside each checkpoint.
    fn name(&self) -> &'static str;

    /// Capture the current workspace content.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be read or the snapshot
    /// cannot be stored.
    async fn snapshot(&self, label: &str) -> CheckpointResult<SnapshotHandle>;

    /// Bring the workspace back to the content of `handle`.
    ///
    /// Implementations verify the snapshot before touching the workspace.
    /// Any failure after the first write is reported as
    /// [`CheckpointError::PartialRestore`].
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot is missing or corrupt, or if writing
    /// the workspace fails.
    async fn restore(&self, handle: &SnapshotHandle) -> CheckpointResult<RestoreReport>;
}

/// Which snapshot backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Content-addressed blob store with JSON manifests.
    #[default]
    Directory,
    /// Shadow git repository whose work tree is the workspace.
    Git,
}

impl BackendKind {
    /// Configuration name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Git => "git",
        }
    }

    /// Build the backend for a workspace, storing under `store_dir`.
    #[must_use]
    pub fn build(self, workspace_root: &Path, store_dir: &Path) -> Arc<dyn SnapshotBackend> {
        match self {
            Self::Directory => Arc::new(DirectoryBackend::new(
                workspace_root,
                store_dir.join("objects"),
            )),
            Self::Git => Arc::new(GitBackend::new(workspace_root, store_dir.join("shadow.git"))),
        }
    }
}

impl FromStr for BackendKind {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "directory" | "dir" => Ok(Self::Directory),
            "git" => Ok(Self::Git),
            other => Err(CheckpointError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-workspace store directory under a shared checkpoint root.
///
/// Workspaces are keyed by a hash of their absolute path so two projects
/// never share snapshots or logs.
#[must_use]
pub fn workspace_store_dir(store_root: &Path, workspace_root: &Path) -> PathBuf {
    let canonical = workspace_root
        .canonicalize()
        .unwrap_or_else(|_| workspace_root.to_path_buf());
    let digest = blake3::hash(canonical.to_string_lossy().as_bytes());
    let key = digest.to_hex();
    store_root.join(keel_core::truncate_to_boundary(key.as_str(), 16))
}
