//! Checkpoint manager: coalescing, logging, restore and stale marking.

use keel_core::{SessionId, Timestamp, ToolCallId};
use keel_events::{EventBus, EventMetadata, KeelEvent};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::backend::SnapshotBackend;
use crate::error::{CheckpointError, CheckpointResult};
use crate::log::CheckpointLog;
use crate::record::{
    CheckpointId, CheckpointRecord, CheckpointStatus, RestoreReport, SnapshotHandle,
};

const EVENT_SOURCE: &str = "checkpoint";

/// Result of [`CheckpointManager::ensure_checkpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredCheckpoint {
    /// The checkpoint covering the current mutation window.
    pub record: CheckpointRecord,
    /// `false` when an existing checkpoint was reused.
    pub created: bool,
}

/// Result of [`CheckpointManager::restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// The restored checkpoint.
    pub record: CheckpointRecord,
    /// Workspace changes made by the backend.
    pub report: RestoreReport,
    /// Newer checkpoints marked stale by this restore.
    pub invalidated: Vec<CheckpointId>,
}

#[derive(Debug, Default)]
struct ManagerState {
    records: Vec<CheckpointRecord>,
    /// Checkpoint taken since the last executed mutation, if any.
    covering: Option<CheckpointId>,
}

/// Owns one session's checkpoints.
///
/// All operations serialize on an internal async lock, so two calls that
/// both need a checkpoint never snapshot twice for the same window.
pub struct CheckpointManager {
    session_id: SessionId,
    backend: Arc<dyn SnapshotBackend>,
    log: CheckpointLog,
    state: Mutex<ManagerState>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("session_id", &self.session_id)
            .field("backend", &self.backend.name())
            .field("log", &self.log.path())
            .finish_non_exhaustive()
    }
}

impl CheckpointManager {
    /// Open the manager, replaying any existing log for the session.
    ///
    /// A reopened session starts with no covering checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub async fn open(
        session_id: SessionId,
        backend: Arc<dyn SnapshotBackend>,
        log: CheckpointLog,
    ) -> CheckpointResult<Self> {
        let records = log.read().await?;
        Ok(Self {
            session_id,
            backend,
            log,
            state: Mutex::new(ManagerState {
                records,
                covering: None,
            }),
            events: None,
        })
    }

    /// Publish checkpoint events on `bus`.
    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Session these checkpoints belong to.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Backend name.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Make sure a checkpoint covers the current mutation window.
    ///
    /// Reuses the covering checkpoint when no mutation has executed since it
    /// was taken; otherwise snapshots the workspace and appends a new record.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot or log append fails. The caller must
    /// not run the mutation in that case.
    pub async fn ensure_checkpoint(
        &self,
        position: u64,
        call_id: Option<&ToolCallId>,
    ) -> CheckpointResult<EnsuredCheckpoint> {
        let mut state = self.state.lock().await;

        if let Some(id) = &state.covering
            && let Some(record) = state.records.iter().find(|r| &r.id == id && r.is_active())
        {
            return Ok(EnsuredCheckpoint {
                record: record.clone(),
                created: false,
            });
        }

        let label = match call_id {
            Some(call) => format!("keel: before {call} at #{position}"),
            None => format!("keel: checkpoint at #{position}"),
        };
        let handle = self.backend.snapshot(&label).await?;
        let record = CheckpointRecord {
            id: CheckpointId::new(),
            session_id: self.session_id.clone(),
            backend: self.backend.name().to_string(),
            handle,
            position,
            call_id: call_id.cloned(),
            created_at: Timestamp::now(),
            status: CheckpointStatus::Active,
        };
        self.log.append_created(&record).await?;

        state.covering = Some(record.id.clone());
        state.records.push(record.clone());

        info!(
            checkpoint_id = %record.id,
            position,
            backend = self.backend.name(),
            handle = %record.handle.short(),
            "Checkpoint created"
        );
        self.publish(KeelEvent::CheckpointCreated {
            metadata: EventMetadata::new(self.session_id.clone(), EVENT_SOURCE),
            checkpoint_id: record.id.to_string(),
            position,
            call_id: record.call_id.clone(),
            backend: record.backend.clone(),
        });

        Ok(EnsuredCheckpoint {
            record,
            created: true,
        })
    }

    /// Close the current mutation window. Called after any mutating call
    /// has executed, whatever its outcome.
    pub async fn note_mutation(&self) {
        self.state.lock().await.covering = None;
    }

    /// The checkpoint covering the current window, if any.
    pub async fn covering(&self) -> Option<CheckpointId> {
        self.state.lock().await.covering.clone()
    }

    /// All checkpoints in creation order.
    pub async fn list(&self) -> Vec<CheckpointRecord> {
        self.state.lock().await.records.clone()
    }

    /// Look up one checkpoint.
    pub async fn get(&self, id: &CheckpointId) -> Option<CheckpointRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    /// Most recent active checkpoint.
    pub async fn latest_active(&self) -> Option<CheckpointRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .rev()
            .find(|r| r.is_active())
            .cloned()
    }

    /// Restore the workspace to checkpoint `id`.
    ///
    /// Every active checkpoint created after `id` is marked stale. The
    /// restored checkpoint then covers the new mutation window.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::NotFound`] or [`CheckpointError::Stale`]
    /// for unusable ids, any verification error from the backend (workspace
    /// untouched), or [`CheckpointError::PartialRestore`].
    pub async fn restore(&self, id: &CheckpointId) -> CheckpointResult<RestoreOutcome> {
        let mut state = self.state.lock().await;

        let index = state
            .records
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        let Some(record) = state.records.get(index).cloned() else {
            return Err(CheckpointError::NotFound(id.to_string()));
        };
        if !record.is_active() {
            return Err(CheckpointError::Stale(id.to_string()));
        }

        let report = match self.backend.restore(&record.handle).await {
            Ok(report) => report,
            Err(e) => {
                if matches!(e, CheckpointError::PartialRestore { .. }) {
                    state.covering = None;
                    error!(checkpoint_id = %id, error = %e, "Restore left the workspace partially written");
                }
                return Err(e);
            },
        };

        let newer: Vec<CheckpointId> = state
            .records
            .iter()
            .skip(index.saturating_add(1))
            .filter(|r| r.is_active())
            .map(|r| r.id.clone())
            .collect();
        for stale in &newer {
            self.log.append_status(stale, CheckpointStatus::Stale).await?;
            if let Some(r) = state.records.iter_mut().find(|r| &r.id == stale) {
                r.status = CheckpointStatus::Stale;
            }
        }
        state.covering = Some(record.id.clone());

        info!(
            checkpoint_id = %id,
            restored = report.restored,
            removed = report.removed,
            invalidated = newer.len(),
            "Checkpoint restored"
        );
        self.publish(KeelEvent::CheckpointRestored {
            metadata: EventMetadata::new(self.session_id.clone(), EVENT_SOURCE),
            checkpoint_id: id.to_string(),
            invalidated: newer.iter().map(ToString::to_string).collect(),
        });

        Ok(RestoreOutcome {
            record,
            report,
            invalidated: newer,
        })
    }

    /// Snapshot handle of a checkpoint, for display.
    pub async fn handle_of(&self, id: &CheckpointId) -> Option<SnapshotHandle> {
        self.get(id).await.map(|r| r.handle)
    }

    fn publish(&self, event: KeelEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryBackend;
    use std::fs;
    use tempfile::TempDir;

    async fn manager(ws: &TempDir, store: &TempDir) -> CheckpointManager {
        let backend = Arc::new(DirectoryBackend::new(ws.path(), store.path().join("objects")));
        let log = CheckpointLog::new(store.path().join("logs/s1.jsonl"));
        CheckpointManager::open(SessionId::from_raw("s1"), backend, log)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_coalesces_within_window() {
        let ws = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        fs::write(ws.path().join("a.txt"), "a").unwrap();
        let mgr = manager(&ws, &store).await;

        let first = mgr.ensure_checkpoint(1, None).await.unwrap();
        let second = mgr.ensure_checkpoint(2, None).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.record.id, second.record.id);

        mgr.note_mutation().await;
        let third = mgr.ensure_checkpoint(3, None).await.unwrap();
        assert!(third.created);
        assert_eq!(mgr.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_restore_marks_newer_stale() {
        let ws = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        fs::write(ws.path().join("a.txt"), "v1").unwrap();
        let mgr = manager(&ws, &store).await;

        let first = mgr.ensure_checkpoint(1, None).await.unwrap().record;
        mgr.note_mutation().await;
        fs::write(ws.path().join("a.txt"), "v2").unwrap();
        let second = mgr.ensure_checkpoint(4, None).await.unwrap().record;
        mgr.note_mutation().await;
        fs::write(ws.path().join("a.txt"), "v3").unwrap();

        let outcome = mgr.restore(&first.id).await.unwrap();
        assert_eq!(outcome.invalidated, vec![second.id.clone()]);
        assert_eq!(fs::read_to_string(ws.path().join("a.txt")).unwrap(), "v1");

        let stale = mgr.get(&second.id).await.unwrap();
        assert_eq!(stale.status, CheckpointStatus::Stale);
        assert!(matches!(
            mgr.restore(&second.id).await,
            Err(CheckpointError::Stale(_))
        ));
        assert_eq!(mgr.covering().await, Some(first.id.clone()));

        // Stale status survives a reopen.
        let reopened = manager(&ws, &store).await;
        let records = reopened.list().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].status, CheckpointStatus::Stale);
        assert!(reopened.covering().await.is_none());
    }

    #[tokio::test]
    async fn test_publishes_events() {
        let ws = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mgr = manager(&ws, &store).await.with_event_bus(bus);

        let call = ToolCallId::from_raw("call_1");
        let ensured = mgr.ensure_checkpoint(7, Some(&call)).await.unwrap();
        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            KeelEvent::CheckpointCreated {
                checkpoint_id,
                position,
                call_id,
                backend,
                ..
            } => {
                assert_eq!(checkpoint_id, ensured.record.id.as_str());
                assert_eq!(*position, 7);
                assert_eq!(call_id.as_ref(), Some(&call));
                assert_eq!(backend, "directory");
            },
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_checkpoint() {
        let ws = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let mgr = manager(&ws, &store).await;
        assert!(matches!(
            mgr.restore(&CheckpointId::from_raw("ckpt_missing")).await,
            Err(CheckpointError::NotFound(_))
        ));
    }
}
