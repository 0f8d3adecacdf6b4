//! The session recorder and its per-session writer task.
//!
//! Each recorder owns one writer task fed by a bounded channel. The task
//! assigns sequence numbers and writes entries in submission order.
//! [`SessionRecorder::append`] waits for its own acknowledgement;
//! [`SessionRecorder::submit`] only queues, so a slow disk never holds up
//! the caller. Recorders for different sessions share nothing.
//!
//! A failed write does not stop the session. The recorder flags itself
//! incomplete and the next successful write is preceded by a `RecordGap`
//! entry describing what was lost.

use async_trait::async_trait;
use keel_core::{SessionId, Timestamp};
use keel_events::{EventBus, EventMetadata, KeelEvent};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::{EntryKind, SessionEntry};
use crate::error::{SessionError, SessionResult};
use crate::format::{ReadBack, RecordFormat, SessionDocument, parse_jsonl_bytes};
use crate::path::resolve_session_path;

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Destination for serialized entries.
#[async_trait]
pub trait RecordSink: Send + 'static {
    /// Append one newline-terminated entry durably.
    ///
    /// On error nothing of `line` may remain visible to readers.
    async fn append_line(&mut self, line: &[u8]) -> io::Result<()>;

    /// Rebuild the consolidated document, when the sink keeps one.
    ///
    /// Called on flush and on close, never per entry.
    async fn consolidate(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// JSON Lines file sink holding an exclusive advisory lock.
#[derive(Debug)]
pub struct FileSink {
    session_id: SessionId,
    path: PathBuf,
    file: tokio::fs::File,
    len: u64,
    document_path: Option<PathBuf>,
    // Held for the sink's lifetime; the lock is released when it drops.
    _lock: std::fs::File,
}

#[async_trait]
impl RecordSink for FileSink {
    async fn append_line(&mut self, line: &[u8]) -> io::Result<()> {
        let before = self.len;
        let written = async {
            self.file.write_all(line).await?;
            self.file.flush().await?;
            self.file.sync_data().await
        }
        .await;

        match written {
            Ok(()) => {
                self.len = self.len.saturating_add(line.len() as u64);
                Ok(())
            },
            Err(e) => {
                // Drop any torn bytes so the next line starts clean.
                if let Err(trunc) = self.file.set_len(before).await {
                    warn!(path = %self.path.display(), error = %trunc, "Could not truncate torn session line");
                }
                Err(e)
            },
        }
    }

    async fn consolidate(&mut self) -> io::Result<()> {
        let Some(path) = &self.document_path else {
            return Ok(());
        };
        let bytes = tokio::fs::read(&self.path).await?;
        let entries = parse_jsonl_bytes(&bytes).entries;
        let document = SessionDocument::new(self.session_id.clone(), entries);
        let json = serde_json::to_vec_pretty(&document).map_err(io::Error::other)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await
    }
}

/// How to open a recorder.
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Absolute storage root.
    pub root: PathBuf,
    /// Session to record.
    pub session_id: SessionId,
    /// Storage format.
    pub format: RecordFormat,
    /// Writer channel capacity.
    pub channel_capacity: usize,
    /// Bus for `RecordIncomplete` events.
    pub events: Option<EventBus>,
}

impl RecorderOptions {
    /// Options with defaults for everything but root and session.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, session_id: SessionId) -> Self {
        Self {
            root: root.into(),
            session_id,
            format: RecordFormat::Jsonl,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            events: None,
        }
    }

    /// Set the storage format.
    #[must_use]
    pub fn with_format(mut self, format: RecordFormat) -> Self {
        self.format = format;
        self
    }

    /// Publish recorder events on `bus`.
    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }
}

enum Command {
    Append {
        kind: EntryKind,
        ack: Option<oneshot::Sender<SessionResult<SessionEntry>>>,
    },
    Barrier {
        ack: oneshot::Sender<()>,
    },
}

/// Writes one session's record.
#[derive(Debug)]
pub struct SessionRecorder {
    session_id: SessionId,
    path: PathBuf,
    tx: mpsc::Sender<Command>,
    next_seq: Arc<AtomicU64>,
    incomplete: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SessionRecorder {
    /// Validate the session path, lock the file, and start the writer.
    ///
    /// Path checks run first and synchronously; a rejected path fails here
    /// before any file is opened. An existing record is resumed: sequence
    /// numbers continue, and an unreadable tail is cut off and noted with a
    /// `RecordGap` entry on the next write.
    ///
    /// # Errors
    ///
    /// Returns a security or root error for a rejected path,
    /// [`SessionError::Locked`] if another writer holds the file, or an I/O
    /// error.
    pub async fn initialize(options: RecorderOptions) -> SessionResult<Self> {
        let RecorderOptions {
            root,
            session_id,
            format,
            channel_capacity,
            events,
        } = options;

        let path = resolve_session_path(&root, &session_id, RecordFormat::Jsonl)?;
        let document_path = match format {
            RecordFormat::Json => Some(resolve_session_path(&root, &session_id, RecordFormat::Json)?),
            RecordFormat::Jsonl => None,
        };

        let opened = {
            let journal_path = path.clone();
            tokio::task::spawn_blocking(move || open_journal(&journal_path))
                .await
                .map_err(|e| SessionError::io(&path, io::Error::other(e)))??
        };
        let OpenedJournal {
            lock,
            len,
            existing,
        } = opened;

        let mut pending_gap = None;
        if let Some(tail) = &existing.corrupt_tail {
            warn!(
                session_id = %session_id,
                line = tail.line,
                discarded = tail.discarded_lines,
                error = %tail.error,
                "Session record had an unreadable tail, truncated"
            );
            pending_gap = Some(Gap {
                failed_writes: tail.discarded_lines as u64,
                error: format!("unreadable tail at line {}: {}", tail.line, tail.error),
            });
        }

        let file = lock
            .try_clone()
            .map(tokio::fs::File::from_std)
            .map_err(|e| SessionError::io(&path, e))?;
        let next_seq = existing.next_seq();

        let sink = FileSink {
            session_id: session_id.clone(),
            path: path.clone(),
            file,
            len,
            document_path,
            _lock: lock,
        };

        info!(
            session_id = %session_id,
            path = %path.display(),
            format = %format,
            resume_at = next_seq,
            "Session recorder initialized"
        );

        Ok(Self::spawn(
            session_id,
            path,
            sink,
            WriterStart {
                next_seq,
                pending_gap,
                events,
                channel_capacity,
            },
        ))
    }

    /// Start a recorder over a custom sink, beginning at sequence zero.
    #[must_use]
    pub fn from_sink<S: RecordSink>(
        session_id: SessionId,
        sink: S,
        events: Option<EventBus>,
    ) -> Self {
        Self::spawn(
            session_id,
            PathBuf::new(),
            sink,
            WriterStart {
                next_seq: 0,
                pending_gap: None,
                events,
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            },
        )
    }

    fn spawn<S: RecordSink>(
        session_id: SessionId,
        path: PathBuf,
        sink: S,
        start: WriterStart,
    ) -> Self {
        let (tx, rx) = mpsc::channel(start.channel_capacity.max(1));
        let next_seq = Arc::new(AtomicU64::new(start.next_seq));
        let incomplete = Arc::new(AtomicBool::new(start.pending_gap.is_some()));

        let writer = Writer {
            session_id: session_id.clone(),
            sink,
            next_seq: start.next_seq,
            shared_seq: Arc::clone(&next_seq),
            incomplete: Arc::clone(&incomplete),
            pending_gap: start.pending_gap,
            dirty: false,
            events: start.events,
        };
        let task = tokio::spawn(writer.run(rx));

        Self {
            session_id,
            path,
            tx,
            next_seq,
            incomplete,
            task,
        }
    }

    /// Append an entry and wait until it is durable.
    ///
    /// Returns the entry as written, with its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Write`] if this write failed (the session is
    /// now incomplete) or [`SessionError::WriterClosed`].
    pub async fn append(&self, kind: EntryKind) -> SessionResult<SessionEntry> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Append {
            kind,
            ack: Some(ack),
        })
        .await?;
        done.await
            .map_err(|_| SessionError::WriterClosed(self.session_id.to_string()))?
    }

    /// Queue an entry without waiting for it to reach the disk.
    ///
    /// Submission order is preserved relative to every other `submit`,
    /// `append` and `flush` on this recorder. A failed write flags the
    /// session incomplete exactly as for [`SessionRecorder::append`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WriterClosed`] if the writer has stopped.
    pub async fn submit(&self, kind: EntryKind) -> SessionResult<()> {
        self.send(Command::Append { kind, ack: None }).await
    }

    async fn send(&self, command: Command) -> SessionResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SessionError::WriterClosed(self.session_id.to_string()))
    }

    /// Wait until every entry submitted before this call has been handled
    /// and the consolidated document, if any, is current.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WriterClosed`] if the writer has stopped.
    pub async fn flush(&self) -> SessionResult<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Barrier { ack }).await?;
        done.await
            .map_err(|_| SessionError::WriterClosed(self.session_id.to_string()))
    }

    /// Stop the writer after draining queued entries and release the lock.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WriterClosed`] if the writer task panicked.
    pub async fn close(self) -> SessionResult<()> {
        let Self {
            session_id,
            tx,
            task,
            ..
        } = self;
        drop(tx);
        task.await
            .map_err(|_| SessionError::WriterClosed(session_id.to_string()))
    }

    /// Session being recorded.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// JSON Lines file path (empty for custom sinks).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number the next written entry will take.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    /// Whether any write has failed or a tail was discarded.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.incomplete.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct Gap {
    failed_writes: u64,
    error: String,
}

struct WriterStart {
    next_seq: u64,
    pending_gap: Option<Gap>,
    events: Option<EventBus>,
    channel_capacity: usize,
}

struct Writer<S> {
    session_id: SessionId,
    sink: S,
    next_seq: u64,
    shared_seq: Arc<AtomicU64>,
    incomplete: Arc<AtomicBool>,
    pending_gap: Option<Gap>,
    // Entries written since the document was last rebuilt.
    dirty: bool,
    events: Option<EventBus>,
}

/// A locked journal with any unreadable tail already cut off.
struct OpenedJournal {
    lock: std::fs::File,
    len: u64,
    existing: ReadBack,
}

fn open_journal(path: &Path) -> SessionResult<OpenedJournal> {
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| SessionError::io(path, e))?;
    fs2::FileExt::try_lock_exclusive(&lock).map_err(|_| SessionError::Locked(path.to_path_buf()))?;

    let bytes = std::fs::read(path).map_err(|e| SessionError::io(path, e))?;
    let existing = parse_jsonl_bytes(&bytes);
    let mut len = bytes.len() as u64;
    if let Some(tail) = &existing.corrupt_tail {
        lock.set_len(tail.offset)
            .map_err(|e| SessionError::io(path, e))?;
        len = tail.offset;
    }
    Ok(OpenedJournal {
        lock,
        len,
        existing,
    })
}

impl<S: RecordSink> Writer<S> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Append { kind, ack } => {
                    let result = self.append(kind).await;
                    if let Some(ack) = ack {
                        let _ = ack.send(result);
                    }
                },
                Command::Barrier { ack } => {
                    self.consolidate().await;
                    let _ = ack.send(());
                },
            }
        }
        self.consolidate().await;
        debug!(session_id = %self.session_id, "Session writer stopped");
    }

    async fn consolidate(&mut self) {
        if !self.dirty {
            return;
        }
        match self.sink.consolidate().await {
            Ok(()) => self.dirty = false,
            // The JSON Lines journal still holds every entry.
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Consolidated session document not updated");
            },
        }
    }

    async fn append(&mut self, kind: EntryKind) -> SessionResult<SessionEntry> {
        if let Some(gap) = self.pending_gap.clone() {
            let marker = EntryKind::RecordGap {
                failed_writes: gap.failed_writes,
                error: gap.error,
            };
            if let Err(e) = self.write_entry(marker).await {
                return Err(self.record_failure(&e));
            }
            self.pending_gap = None;
        }

        match self.write_entry(kind).await {
            Ok(entry) => Ok(entry),
            Err(e) => Err(self.record_failure(&e)),
        }
    }

    async fn write_entry(&mut self, kind: EntryKind) -> io::Result<SessionEntry> {
        let entry = SessionEntry {
            seq: self.next_seq,
            recorded_at: Timestamp::now(),
            kind,
        };
        let mut line = serde_json::to_vec(&entry).map_err(io::Error::other)?;
        line.push(b'\n');
        self.sink.append_line(&line).await?;

        self.next_seq = self.next_seq.saturating_add(1);
        self.shared_seq.store(self.next_seq, Ordering::SeqCst);
        self.dirty = true;
        Ok(entry)
    }

    fn record_failure(&mut self, error: &io::Error) -> SessionError {
        match &mut self.pending_gap {
            Some(gap) => gap.failed_writes = gap.failed_writes.saturating_add(1),
            None => {
                self.pending_gap = Some(Gap {
                    failed_writes: 1,
                    error: error.to_string(),
                });
            },
        }

        if !self.incomplete.swap(true, Ordering::SeqCst) {
            warn!(session_id = %self.session_id, error = %error, "Session record is now incomplete");
            if let Some(bus) = &self.events {
                bus.publish(KeelEvent::RecordIncomplete {
                    metadata: EventMetadata::new(self.session_id.clone(), "recorder"),
                    error: error.to_string(),
                });
            }
        }
        SessionError::Write(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::parse_jsonl;
    use keel_core::TurnId;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn message(n: usize) -> EntryKind {
        EntryKind::UserMessage {
            turn_id: TurnId::from_raw("t1"),
            content: format!("message {n}"),
        }
    }

    #[tokio::test]
    async fn test_entries_written_in_submission_order() {
        let dir = TempDir::new().unwrap();
        let recorder = SessionRecorder::initialize(RecorderOptions::new(
            dir.path(),
            SessionId::from_raw("s1"),
        ))
        .await
        .unwrap();

        for n in 0..5 {
            let entry = recorder.append(message(n)).await.unwrap();
            assert_eq!(entry.seq, n as u64);
        }
        assert_eq!(recorder.position(), 5);
        let path = recorder.path().to_path_buf();
        recorder.close().await.unwrap();

        let read = parse_jsonl(&std::fs::read_to_string(path).unwrap());
        assert!(read.is_complete());
        let seqs: Vec<u64> = read.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_second_writer_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let id = SessionId::from_raw("s1");
        let _first = SessionRecorder::initialize(RecorderOptions::new(dir.path(), id.clone()))
            .await
            .unwrap();
        let second = SessionRecorder::initialize(RecorderOptions::new(dir.path(), id)).await;
        assert!(matches!(second, Err(SessionError::Locked(_))));
    }

    #[tokio::test]
    async fn test_traversal_fails_before_file_created() {
        let dir = TempDir::new().unwrap();
        let result = SessionRecorder::initialize(RecorderOptions::new(
            dir.path(),
            SessionId::from_raw("../escape"),
        ))
        .await;
        assert!(matches!(result, Err(SessionError::Security(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(!dir.path().parent().unwrap().join("escape.jsonl").exists());
    }

    #[tokio::test]
    async fn test_resume_truncates_corrupt_tail_and_marks_gap() {
        let dir = TempDir::new().unwrap();
        let id = SessionId::from_raw("s1");
        let recorder = SessionRecorder::initialize(RecorderOptions::new(dir.path(), id.clone()))
            .await
            .unwrap();
        recorder.append(message(0)).await.unwrap();
        let path = recorder.path().to_path_buf();
        recorder.close().await.unwrap();

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"seq\":1,\"recor");
        std::fs::write(&path, content).unwrap();

        let recorder = SessionRecorder::initialize(RecorderOptions::new(dir.path(), id))
            .await
            .unwrap();
        assert!(recorder.is_incomplete());
        assert_eq!(recorder.position(), 1);
        let entry = recorder.append(message(1)).await.unwrap();
        assert_eq!(entry.seq, 2);
        recorder.close().await.unwrap();

        let read = parse_jsonl(&std::fs::read_to_string(&path).unwrap());
        assert!(read.is_complete());
        assert_eq!(read.entries.len(), 3);
        assert!(matches!(read.entries[1].kind, EntryKind::RecordGap { .. }));
    }

    #[tokio::test]
    async fn test_resume_cuts_invalid_utf8_tail_at_byte_offset() {
        let dir = TempDir::new().unwrap();
        let id = SessionId::from_raw("s1");
        let recorder = SessionRecorder::initialize(RecorderOptions::new(dir.path(), id.clone()))
            .await
            .unwrap();
        recorder.append(message(0)).await.unwrap();
        let path = recorder.path().to_path_buf();
        recorder.close().await.unwrap();

        let good = std::fs::read(&path).unwrap();
        let mut content = good.clone();
        content.extend_from_slice(b"{\"seq\":1,\"note\":\"\xff\xfe\"}\n");
        std::fs::write(&path, &content).unwrap();

        let recorder = SessionRecorder::initialize(RecorderOptions::new(dir.path(), id))
            .await
            .unwrap();
        assert!(recorder.is_incomplete());
        assert_eq!(std::fs::read(&path).unwrap(), good);
        recorder.append(message(1)).await.unwrap();
        recorder.close().await.unwrap();

        let read = parse_jsonl_bytes(&std::fs::read(&path).unwrap());
        assert!(read.is_complete());
        assert_eq!(read.entries.len(), 3);
    }

    #[tokio::test]
    async fn test_json_document_rebuilt_on_flush_and_close() {
        let dir = TempDir::new().unwrap();
        let id = SessionId::from_raw("s1");
        let doc_path = dir.path().join("s1.json");
        let read_doc = || -> SessionDocument {
            serde_json::from_slice(&std::fs::read(&doc_path).unwrap()).unwrap()
        };

        let recorder = SessionRecorder::initialize(
            RecorderOptions::new(dir.path(), id.clone()).with_format(RecordFormat::Json),
        )
        .await
        .unwrap();
        recorder.append(message(0)).await.unwrap();
        recorder.append(message(1)).await.unwrap();
        assert!(!doc_path.exists());

        recorder.flush().await.unwrap();
        let doc = read_doc();
        assert_eq!(doc.session_id, id);
        assert_eq!(doc.entries.len(), 2);

        recorder.append(message(2)).await.unwrap();
        assert_eq!(read_doc().entries.len(), 2);
        recorder.close().await.unwrap();
        assert_eq!(read_doc().entries.len(), 3);
    }

    /// Records lines in memory after a fixed delay per write.
    struct SlowSink {
        delay: std::time::Duration,
        lines: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RecordSink for SlowSink {
        async fn append_line(&mut self, line: &[u8]) -> io::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.lines
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(line).into_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_submit_does_not_wait_for_the_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = SlowSink {
            delay: std::time::Duration::from_millis(300),
            lines: Arc::clone(&lines),
        };
        let recorder = SessionRecorder::from_sink(SessionId::from_raw("s1"), sink, None);

        let started = std::time::Instant::now();
        for n in 0..3 {
            recorder.submit(message(n)).await.unwrap();
        }
        assert!(started.elapsed() < std::time::Duration::from_millis(200));
        assert!(lines.lock().unwrap().is_empty());

        recorder.flush().await.unwrap();
        let read = parse_jsonl(&lines.lock().unwrap().concat());
        let seqs: Vec<u64> = read.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    /// Fails the writes whose index is listed, records the rest in memory.
    struct FlakySink {
        fail_on: Vec<usize>,
        calls: usize,
        lines: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RecordSink for FlakySink {
        async fn append_line(&mut self, line: &[u8]) -> io::Result<()> {
            let call = self.calls;
            self.calls = self.calls.saturating_add(1);
            if self.fail_on.contains(&call) {
                return Err(io::Error::other("disk full"));
            }
            self.lines
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(line).into_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_write_flags_incomplete_and_writes_gap() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let sink = FlakySink {
            fail_on: vec![1],
            calls: 0,
            lines: Arc::clone(&lines),
        };
        let recorder = SessionRecorder::from_sink(SessionId::from_raw("s1"), sink, Some(bus));

        recorder.append(message(0)).await.unwrap();
        let err = recorder.append(message(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::Write(_)));
        assert!(recorder.is_incomplete());
        assert_eq!(rx.recv().await.unwrap().event_type(), "record_incomplete");

        let entry = recorder.append(message(2)).await.unwrap();
        assert_eq!(entry.seq, 2);

        let text = lines.lock().unwrap().concat();
        let read = parse_jsonl(&text);
        assert_eq!(read.entries.len(), 3);
        match &read.entries[1].kind {
            EntryKind::RecordGap {
                failed_writes,
                error,
            } => {
                assert_eq!(*failed_writes, 1);
                assert!(error.contains("disk full"));
            },
            other => panic!("expected gap, got {other:?}"),
        }
    }
}
