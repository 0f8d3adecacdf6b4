//! Append-only checkpoint log.
//!
//! One JSON object per line. A checkpoint is written once when created; a
//! later status change is a separate line, never an in-place edit. Readers
//! replay the lines in order and need no lock on the writer.

use keel_core::{SessionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{CheckpointError, CheckpointResult};
use crate::record::{CheckpointId, CheckpointRecord, CheckpointStatus};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogLine {
    Created {
        record: CheckpointRecord,
    },
    Status {
        id: CheckpointId,
        status: CheckpointStatus,
        at: Timestamp,
    },
}

/// Writer for one session's checkpoint log.
#[derive(Debug, Clone)]
pub struct CheckpointLog {
    path: PathBuf,
}

impl CheckpointLog {
    /// Log location for a session under a workspace store directory.
    ///
    /// # Errors
    ///
    /// Returns a security error if the session id cannot name a file.
    pub fn session_path(store_dir: &Path, session_id: &SessionId) -> CheckpointResult<PathBuf> {
        keel_core::paths::validate_identifier(session_id.as_str())?;
        Ok(store_dir
            .join("logs")
            .join(format!("{}.jsonl", session_id.as_str())))
    }

    /// Use the log at `path`. The file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a newly created checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be written and synced.
    pub async fn append_created(&self, record: &CheckpointRecord) -> CheckpointResult<()> {
        self.append(&LogLine::Created {
            record: record.clone(),
        })
        .await
    }

    /// Append a status change.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be written and synced.
    pub async fn append_status(
        &self,
        id: &CheckpointId,
        status: CheckpointStatus,
    ) -> CheckpointResult<()> {
        self.append(&LogLine::Status {
            id: id.clone(),
            status,
            at: Timestamp::now(),
        })
        .await
    }

    async fn append(&self, line: &LogLine) -> CheckpointResult<()> {
        let mut bytes = serde_json::to_vec(line)?;
        bytes.push(b'\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CheckpointError::io(parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        Ok(())
    }

    /// Replay the log into creation-ordered records with current status.
    ///
    /// A missing file is an empty log. An unparseable line ends the replay
    /// with a warning; everything before it is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn read(&self) -> CheckpointResult<Vec<CheckpointRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(&self.path, e)),
        };
        Ok(replay(&content, &self.path))
    }
}

fn replay(content: &str, path: &Path) -> Vec<CheckpointRecord> {
    let mut records: Vec<CheckpointRecord> = Vec::new();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogLine>(line) {
            Ok(LogLine::Created { record }) => records.push(record),
            Ok(LogLine::Status { id, status, .. }) => {
                if let Some(record) = records.iter_mut().find(|r| r.id == id) {
                    record.status = status;
                }
            },
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = index.saturating_add(1),
                    error = %e,
                    "Checkpoint log truncated at unparseable line"
                );
                break;
            },
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SnapshotHandle;
    use tempfile::TempDir;

    fn record(position: u64) -> CheckpointRecord {
        CheckpointRecord {
            id: CheckpointId::new(),
            session_id: SessionId::from_raw("s1"),
            backend: "directory".into(),
            handle: SnapshotHandle::new("abc"),
            position,
            call_id: None,
            created_at: Timestamp::now(),
            status: CheckpointStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_replay_applies_status_lines() {
        let dir = TempDir::new().unwrap();
        let log = CheckpointLog::new(dir.path().join("logs/s1.jsonl"));
        let first = record(1);
        let second = record(5);
        log.append_created(&first).await.unwrap();
        log.append_created(&second).await.unwrap();
        log.append_status(&second.id, CheckpointStatus::Stale)
            .await
            .unwrap();

        let records = log.read().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, first.id);
        assert!(records[0].is_active());
        assert_eq!(records[1].status, CheckpointStatus::Stale);
    }

    #[tokio::test]
    async fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = CheckpointLog::new(dir.path().join("none.jsonl"));
        assert!(log.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_torn_tail_keeps_prefix() {
        let dir = TempDir::new().unwrap();
        let log = CheckpointLog::new(dir.path().join("s1.jsonl"));
        log.append_created(&record(1)).await.unwrap();

        let mut content = std::fs::read_to_string(log.path()).unwrap();
        content.push_str("{\"op\":\"created\",\"rec");
        std::fs::write(log.path(), content).unwrap();

        assert_eq!(log.read().await.unwrap().len(), 1);
    }

    #[test]
    fn test_session_path_rejects_traversal() {
        let store = Path::new("/store");
        assert!(CheckpointLog::session_path(store, &SessionId::from_raw("../x")).is_err());
        assert_eq!(
            CheckpointLog::session_path(store, &SessionId::from_raw("s1")).unwrap(),
            PathBuf::from("/store/logs/s1.jsonl")
        );
    }
}
