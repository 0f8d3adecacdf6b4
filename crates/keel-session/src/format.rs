//! The two on-disk record formats and pure conversion between them.
//!
//! - **JSON Lines** (`<id>.jsonl`): one [`SessionEntry`] per line, appended
//!   incrementally.
//! - **Document** (`<id>.json`): a single [`SessionDocument`] holding every
//!   entry.
//!
//! Conversion preserves entry order and content exactly.

use keel_core::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entry::SessionEntry;
use crate::error::{SessionError, SessionResult};

/// Current consolidated document version.
pub const DOCUMENT_VERSION: u32 = 1;

/// Storage format for a session record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// Incremental JSON Lines.
    #[default]
    Jsonl,
    /// JSON Lines journal plus a consolidated document rebuilt from it on
    /// flush and on close.
    Json,
}

impl RecordFormat {
    /// File extension.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::Json => "json",
        }
    }
}

impl FromStr for RecordFormat {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" => Ok(Self::Jsonl),
            "json" => Ok(Self::Json),
            other => Err(SessionError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// The consolidated record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    /// Format version.
    pub version: u32,
    /// Session identifier.
    pub session_id: SessionId,
    /// All entries in record order.
    pub entries: Vec<SessionEntry>,
}

impl SessionDocument {
    /// Wrap entries in a document.
    #[must_use]
    pub fn new(session_id: SessionId, entries: Vec<SessionEntry>) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            session_id,
            entries,
        }
    }
}

/// Where a JSON Lines read stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptTail {
    /// One-based line number of the first unparseable line.
    pub line: usize,
    /// Byte offset where that line starts; the valid prefix ends here.
    pub offset: u64,
    /// Lines from the corrupt one to the end of the file.
    pub discarded_lines: usize,
    /// Parse error for the corrupt line.
    pub error: String,
}

/// Entries recovered from a record, plus any unreadable tail.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadBack {
    /// Entries before the first unparseable line.
    pub entries: Vec<SessionEntry>,
    /// Present when the read stopped early.
    pub corrupt_tail: Option<CorruptTail>,
}

impl ReadBack {
    /// Whether every line parsed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.corrupt_tail.is_none()
    }

    /// Sequence number the next entry should take.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.entries
            .last()
            .map_or(0, |e| e.seq.saturating_add(1))
    }
}

/// Parse JSON Lines, stopping at the first unparseable line.
#[must_use]
pub fn parse_jsonl(text: &str) -> ReadBack {
    parse_jsonl_bytes(text.as_bytes())
}

/// Parse raw JSON Lines bytes, stopping at the first unparseable line.
///
/// Lines are decoded one at a time, so [`CorruptTail::offset`] is an exact
/// byte offset into `bytes` even when an earlier line is not valid UTF-8.
#[must_use]
pub fn parse_jsonl_bytes(bytes: &[u8]) -> ReadBack {
    let mut entries = Vec::new();
    let mut offset: u64 = 0;

    let lines: Vec<&[u8]> = bytes.split_inclusive(|b| *b == b'\n').collect();
    for (index, raw) in lines.iter().enumerate() {
        let line = trim_line_end(raw);
        if !line.iter().all(u8::is_ascii_whitespace) {
            match serde_json::from_slice::<SessionEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    return ReadBack {
                        entries,
                        corrupt_tail: Some(CorruptTail {
                            line: index.saturating_add(1),
                            offset,
                            discarded_lines: lines.len().saturating_sub(index),
                            error: e.to_string(),
                        }),
                    };
                },
            }
        }
        offset = offset.saturating_add(raw.len() as u64);
    }

    ReadBack {
        entries,
        corrupt_tail: None,
    }
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = line {
        line = rest;
    }
    line
}

/// Render entries as JSON Lines, one per line with a trailing newline.
///
/// # Errors
///
/// Returns an error if an entry cannot be serialized.
pub fn to_jsonl(entries: &[SessionEntry]) -> SessionResult<String> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');
    }
    Ok(out)
}

/// Convert a document to JSON Lines.
///
/// # Errors
///
/// Returns an error if an entry cannot be serialized.
pub fn document_to_jsonl(document: &SessionDocument) -> SessionResult<String> {
    to_jsonl(&document.entries)
}

/// Convert JSON Lines to a document. The tail, if any, is returned alongside.
#[must_use]
pub fn jsonl_to_document(session_id: SessionId, text: &str) -> (SessionDocument, Option<CorruptTail>) {
    let read = parse_jsonl(text);
    (SessionDocument::new(session_id, read.entries), read.corrupt_tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{CheckpointAction, CheckpointEntry, EntryKind};
    use keel_core::{Timestamp, TurnId};

    fn entries() -> Vec<SessionEntry> {
        let kinds = vec![
            EntryKind::UserMessage {
                turn_id: TurnId::from_raw("t1"),
                content: "remove the build dir".into(),
            },
            EntryKind::Thought {
                turn_id: TurnId::from_raw("t1"),
                subject: Some("Plan".into()),
                description: "rm is destructive".into(),
            },
            EntryKind::Checkpoint(CheckpointEntry {
                action: CheckpointAction::Created,
                checkpoint_id: "ckpt_1".into(),
                backend: "directory".into(),
                position: 2,
                call_id: None,
                invalidated: Vec::new(),
            }),
            EntryKind::TokenUsage {
                turn_id: TurnId::from_raw("t1"),
                input: 1200,
                output: 80,
                cached: 0,
                thoughts: 12,
            },
        ];
        kinds
            .into_iter()
            .zip(0u64..)
            .map(|(kind, seq)| SessionEntry {
                seq,
                recorded_at: Timestamp::now(),
                kind,
            })
            .collect()
    }

    #[test]
    fn test_document_jsonl_document_is_identity() {
        let doc = SessionDocument::new(SessionId::from_raw("s1"), entries());
        let jsonl = document_to_jsonl(&doc).unwrap();
        let (back, tail) = jsonl_to_document(SessionId::from_raw("s1"), &jsonl);
        assert!(tail.is_none());
        assert_eq!(back, doc);
    }

    #[test]
    fn test_truncated_tail_returns_prefix() {
        let all = entries();
        let mut text = to_jsonl(&all).unwrap();
        let valid_len = text.len() as u64;
        text.push_str("{\"seq\":4,\"recorded_at\":\"2026-01-01T00:");

        let read = parse_jsonl(&text);
        assert_eq!(read.entries, all);
        let tail = read.corrupt_tail.unwrap();
        assert_eq!(tail.line, 5);
        assert_eq!(tail.offset, valid_len);
        assert_eq!(tail.discarded_lines, 1);
        assert_eq!(read.entries.len(), 4);
    }

    #[test]
    fn test_corrupt_middle_line_stops_read() {
        let all = entries();
        let mut lines: Vec<String> = to_jsonl(&all)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect();
        lines[1] = "not json".into();
        let text = lines.join("\n");

        let read = parse_jsonl(&text);
        assert_eq!(read.entries.len(), 1);
        assert_eq!(read.corrupt_tail.unwrap().discarded_lines, 3);
    }

    #[test]
    fn test_tail_offset_is_a_byte_offset() {
        let all = entries();
        let mut bytes = to_jsonl(&all[..1]).unwrap().into_bytes();
        let first_len = bytes.len() as u64;
        // A line holding a raw 0xff byte inside a string is unreadable.
        bytes.extend_from_slice(b"{\"seq\":1,\"note\":\"\xff\xff\"}\n");
        bytes.extend_from_slice(to_jsonl(&all[1..2]).unwrap().as_bytes());

        let read = parse_jsonl_bytes(&bytes);
        assert_eq!(read.entries.len(), 1);
        let tail = read.corrupt_tail.unwrap();
        assert_eq!(tail.line, 2);
        assert_eq!(tail.offset, first_len);
        assert_eq!(tail.discarded_lines, 2);
    }

    #[test]
    fn test_next_seq() {
        let read = parse_jsonl(&to_jsonl(&entries()).unwrap());
        assert_eq!(read.next_seq(), 4);
        assert_eq!(parse_jsonl("").next_seq(), 0);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSONL".parse::<RecordFormat>().unwrap(), RecordFormat::Jsonl);
        assert!("yaml".parse::<RecordFormat>().is_err());
    }
}
