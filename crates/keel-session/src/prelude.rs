//! Prelude module - commonly used types for convenient import.
//!
//! Use `use keel_session::prelude::*;` to import all essential types.

pub use crate::{SessionError, SessionResult};

pub use crate::{EntryKind, SessionEntry, ToolCallEntry};

pub use crate::{ReadBack, RecordFormat, SessionDocument};

pub use crate::{RecorderOptions, SessionRecorder, SessionStore};
