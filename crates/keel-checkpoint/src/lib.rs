//! Keel Checkpoint - workspace snapshots taken before irreversible calls.
//!
//! This crate provides:
//! - [`SnapshotBackend`]: store and restore whole-workspace content
//! - [`DirectoryBackend`] (blake3 blobs + manifests) and [`GitBackend`]
//!   (shadow repository)
//! - [`CheckpointLog`]: the append-only per-session record of checkpoints
//! - [`CheckpointManager`]: coalescing, restore, and stale marking
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_checkpoint::prelude::*;
//! use keel_core::SessionId;
//! use std::path::Path;
//!
//! # async fn example() -> CheckpointResult<()> {
//! let workspace = Path::new("/work/project");
//! let store = workspace_store_dir(Path::new("/home/me/.keel/checkpoints"), workspace);
//! let session = SessionId::from_raw("demo");
//!
//! let backend = BackendKind::Directory.build(workspace, &store);
//! let log = CheckpointLog::new(CheckpointLog::session_path(&store, &session)?);
//! let manager = CheckpointManager::open(session, backend, log).await?;
//!
//! let ensured = manager.ensure_checkpoint(0, None).await?;
//! manager.restore(&ensured.record.id).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod backend;
pub mod directory;
pub mod error;
pub mod git;
pub mod log;
pub mod manager;
pub mod record;

pub use backend::{BackendKind, SnapshotBackend, workspace_store_dir};
pub use directory::DirectoryBackend;
pub use error::{CheckpointError, CheckpointResult};
pub use git::GitBackend;
pub use log::CheckpointLog;
pub use manager::{CheckpointManager, EnsuredCheckpoint, RestoreOutcome};
pub use record::{CheckpointId, CheckpointRecord, CheckpointStatus, RestoreReport, SnapshotHandle};
