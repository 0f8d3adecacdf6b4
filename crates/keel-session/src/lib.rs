//! Keel Session - the durable, append-only record of a session.
//!
//! This crate provides:
//! - [`SessionEntry`] and its [`EntryKind`] bodies, including the full
//!   persisted [`ToolCallEntry`]
//! - JSON Lines and consolidated document formats with pure conversion
//! - Session path containment checked on every initialization
//! - [`SessionRecorder`]: one ordered writer task per session
//! - [`SessionStore`]: listing, read-back, export and import
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_session::prelude::*;
//! use keel_core::{SessionId, TurnId};
//!
//! # async fn example() -> SessionResult<()> {
//! let options = RecorderOptions::new("/home/me/.keel/sessions", SessionId::from_raw("demo"));
//! let recorder = SessionRecorder::initialize(options).await?;
//! recorder
//!     .append(EntryKind::UserMessage {
//!         turn_id: TurnId::new(),
//!         content: "clean up the build dir".into(),
//!     })
//!     .await?;
//! recorder.close().await?;
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

pub mod entry;
pub mod error;
pub mod format;
pub mod path;
pub mod recorder;
pub mod store;

pub use entry::{
    CheckpointAction, CheckpointEntry, EntryKind, SessionEntry, SessionMetadata, ToolCallEntry,
    TransitionStamp,
};
pub use error::{SessionError, SessionResult};
pub use format::{
    CorruptTail, ReadBack, RecordFormat, SessionDocument, document_to_jsonl, jsonl_to_document,
    parse_jsonl, parse_jsonl_bytes, to_jsonl,
};
pub use path::resolve_session_path;
pub use recorder::{FileSink, RecordSink, RecorderOptions, SessionRecorder};
pub use store::{SessionStore, SessionSummary};
