//! Prelude module - commonly used types for convenient import.
//!
//! Use `use keel_checkpoint::prelude::*;` to import all essential types.

pub use crate::{CheckpointError, CheckpointResult};

pub use crate::{BackendKind, SnapshotBackend, workspace_store_dir};

pub use crate::{CheckpointLog, CheckpointManager, EnsuredCheckpoint, RestoreOutcome};

pub use crate::{CheckpointId, CheckpointRecord, CheckpointStatus, RestoreReport};
