//! Prelude module - commonly used types for convenient import.
//!
//! Use `use keel_runtime::prelude::*;` to import all essential types.

// Tools
pub use crate::{ArgumentSchema, FieldType, Tool, ToolError, ToolRegistry, ToolResult};

// Scheduling
pub use crate::{CancellationToken, Scheduler, SchedulerConfig, ToolCallOutcome};

// Turns and sessions
pub use crate::{ModelOutput, SessionRuntime, ToolResultMessage, TurnController};

// Errors
pub use crate::{RuntimeError, RuntimeResult};
