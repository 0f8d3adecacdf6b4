//! Checkpoint identifiers and log records.

use keel_core::{SessionId, Timestamp, ToolCallId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique checkpoint identifier (`ckpt_<uuid>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("ckpt_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing identifier.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-specific reference to stored snapshot content: a manifest hash
/// for the directory backend, a commit id for the git backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHandle(String);

impl SnapshotHandle {
    /// Wrap a backend reference.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve characters, for display.
    #[must_use]
    pub fn short(&self) -> &str {
        keel_core::truncate_to_boundary(&self.0, 12)
    }
}

impl fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a checkpoint can still be restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Restorable.
    Active,
    /// Taken after a checkpoint that was later restored.
    Stale,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Stale => f.write_str("stale"),
        }
    }
}

/// One checkpoint in the session's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Checkpoint identifier.
    pub id: CheckpointId,
    /// Session the checkpoint belongs to.
    pub session_id: SessionId,
    /// Backend that stored the snapshot.
    pub backend: String,
    /// Backend reference to the snapshot content.
    pub handle: SnapshotHandle,
    /// Session record position the checkpoint protects.
    pub position: u64,
    /// Call the checkpoint was taken for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<ToolCallId>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Current status.
    pub status: CheckpointStatus,
}

impl CheckpointRecord {
    /// Whether the checkpoint can be restored.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == CheckpointStatus::Active
    }
}

/// What a restore changed in the workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Files rewritten to their snapshot content.
    pub restored: usize,
    /// Files removed because the snapshot did not contain them.
    pub removed: usize,
    /// Files already matching the snapshot.
    pub unchanged: usize,
}
