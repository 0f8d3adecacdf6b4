//! Read-side access to stored sessions: listing, read-back, export, import.

use keel_core::SessionId;
use keel_core::paths::validate_identifier;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

use crate::error::{SessionError, SessionResult};
use crate::format::{
    ReadBack, RecordFormat, SessionDocument, document_to_jsonl, parse_jsonl_bytes,
};
use crate::path::resolve_session_path;

/// Summary of one stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: SessionId,
    /// Formats present on disk.
    pub formats: Vec<RecordFormat>,
    /// Last modification of the newest file.
    pub modified: SystemTime,
}

/// A storage root holding session records.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Open the store at `root`. Nothing is created.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sessions under the root, most recently modified first.
    ///
    /// Files whose stem is not a valid identifier are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the root exists but cannot be read.
    pub async fn list(&self) -> SessionResult<Vec<SessionSummary>> {
        if !is_dir(&self.root).await {
            return Ok(Vec::new());
        }

        let mut summaries: Vec<SessionSummary> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| SessionError::io(&self.root, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionError::io(&self.root, e))?
        {
            let path = entry.path();

            let format = match path.extension().and_then(|e| e.to_str()) {
                Some("jsonl") => RecordFormat::Jsonl,
                Some("json") => RecordFormat::Json,
                _ => continue,
            };
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_identifier(stem).is_err() {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            if let Some(existing) = summaries.iter_mut().find(|s| s.id.as_str() == stem) {
                existing.formats.push(format);
                existing.modified = existing.modified.max(modified);
            } else {
                summaries.push(SessionSummary {
                    id: SessionId::from_raw(stem),
                    formats: vec![format],
                    modified,
                });
            }
        }

        for summary in &mut summaries {
            summary.formats.sort_by_key(|f| f.extension());
        }
        summaries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    /// Read a session's entries.
    ///
    /// Prefers the JSON Lines journal; falls back to the consolidated
    /// document. A corrupt journal tail is reported, not raised.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if neither file exists, a security
    /// error for a rejected id, or an error for an unreadable document.
    pub async fn read_back(&self, session_id: &SessionId) -> SessionResult<ReadBack> {
        let jsonl = resolve_session_path(&self.root, session_id, RecordFormat::Jsonl)?;
        let json = resolve_session_path(&self.root, session_id, RecordFormat::Json)?;
        if is_file(&jsonl).await {
            let bytes = tokio::fs::read(&jsonl)
                .await
                .map_err(|e| SessionError::io(&jsonl, e))?;
            let read = parse_jsonl_bytes(&bytes);
            debug!(
                session_id = %session_id,
                entries = read.entries.len(),
                complete = read.is_complete(),
                "Session read back"
            );
            return Ok(read);
        }

        if is_file(&json).await {
            let document = read_document(&json).await?;
            return Ok(ReadBack {
                entries: document.entries,
                corrupt_tail: None,
            });
        }

        Err(SessionError::NotFound(session_id.to_string()))
    }

    /// Write the consolidated document for a session next to its journal.
    ///
    /// Returns the document path.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be read or the document
    /// cannot be written.
    pub async fn export(&self, session_id: &SessionId) -> SessionResult<PathBuf> {
        let path = resolve_session_path(&self.root, session_id, RecordFormat::Json)?;
        let read = self.read_back(session_id).await?;
        let document = SessionDocument::new(session_id.clone(), read.entries);
        write_atomic(&path, &serde_json::to_vec_pretty(&document)?).await?;
        info!(session_id = %session_id, path = %path.display(), "Session exported");
        Ok(path)
    }

    /// Import a consolidated document as a new JSON Lines journal.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyExists`] if the journal exists, a
    /// security error if the document's session id is unsafe, or an I/O or
    /// parse error.
    pub async fn import(&self, document_path: &Path) -> SessionResult<SessionId> {
        let document = read_document(document_path).await?;
        let target = resolve_session_path(&self.root, &document.session_id, RecordFormat::Jsonl)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SessionError::io(&self.root, e))?;
        if tokio::fs::try_exists(&target)
            .await
            .map_err(|e| SessionError::io(&target, e))?
        {
            return Err(SessionError::AlreadyExists(document.session_id.to_string()));
        }
        write_atomic(&target, document_to_jsonl(&document)?.as_bytes()).await?;
        info!(
            session_id = %document.session_id,
            entries = document.entries.len(),
            "Session imported"
        );
        Ok(document.session_id)
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

async fn read_document(path: &Path) -> SessionResult<SessionDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SessionError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> SessionResult<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| SessionError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(SessionError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use crate::recorder::{RecorderOptions, SessionRecorder};
    use keel_core::TurnId;
    use tempfile::TempDir;

    async fn record(root: &Path, id: &str, messages: usize) {
        let recorder =
            SessionRecorder::initialize(RecorderOptions::new(root, SessionId::from_raw(id)))
                .await
                .unwrap();
        for n in 0..messages {
            recorder
                .append(EntryKind::AssistantMessage {
                    turn_id: TurnId::from_raw("t1"),
                    content: format!("reply {n}"),
                })
                .await
                .unwrap();
        }
        recorder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_and_read_back() {
        let dir = TempDir::new().unwrap();
        record(dir.path(), "alpha", 2).await;
        record(dir.path(), "beta", 1).await;
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = SessionStore::new(dir.path());
        let mut ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["alpha", "beta"]);

        let read = store.read_back(&SessionId::from_raw("alpha")).await.unwrap();
        assert_eq!(read.entries.len(), 2);
        assert!(read.is_complete());
    }

    #[tokio::test]
    async fn test_export_then_import_round_trips() {
        let src = TempDir::new().unwrap();
        record(src.path(), "alpha", 3).await;
        let store = SessionStore::new(src.path());
        let doc_path = store.export(&SessionId::from_raw("alpha")).await.unwrap();

        let dst = TempDir::new().unwrap();
        let other = SessionStore::new(dst.path());
        let id = other.import(&doc_path).await.unwrap();
        assert_eq!(id.as_str(), "alpha");

        let original = store.read_back(&id).await.unwrap();
        let imported = other.read_back(&id).await.unwrap();
        assert_eq!(original.entries, imported.entries);

        assert!(matches!(
            other.import(&doc_path).await,
            Err(SessionError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_session() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(matches!(
            store.read_back(&SessionId::from_raw("nope")).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_import_rejects_unsafe_session_id() {
        let dir = TempDir::new().unwrap();
        let doc = SessionDocument::new(SessionId::from_raw("../escape"), Vec::new());
        let doc_path = dir.path().join("doc.json");
        std::fs::write(&doc_path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let store = SessionStore::new(dir.path().join("sessions"));
        assert!(matches!(
            store.import(&doc_path).await,
            Err(SessionError::Security(_))
        ));
        assert!(!dir.path().join("sessions").exists());
    }
}
