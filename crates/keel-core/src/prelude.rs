//! Prelude module - commonly used types for convenient import.
//!
//! Use `use keel_core::prelude::*;` to import all essential types.

// Identifiers and time
pub use crate::{SessionId, Timestamp, ToolCallId, TurnId};

// Tool call data model
pub use crate::{MutationClass, ToolCallRequest, ToolCallState};

// Errors
pub use crate::{SecurityError, SecurityResult};

// Directories
pub use crate::dirs::{KeelHome, WorkspaceDir};
