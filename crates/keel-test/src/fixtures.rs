//! Test fixtures for common types.

use keel_core::{ToolCallId, ToolCallRequest, TurnId};
use serde_json::Value;

/// Create a test turn ID.
#[must_use]
pub fn test_turn_id() -> TurnId {
    TurnId::new()
}

/// Create a tool call request with a fresh call ID.
#[must_use]
pub fn test_call(tool: &str, arguments: Value, turn: &TurnId) -> ToolCallRequest {
    ToolCallRequest::new(tool, arguments, turn.clone())
}

/// Create a tool call request with a fixed call ID.
#[must_use]
pub fn test_call_with_id(id: &str, tool: &str, arguments: Value, turn: &TurnId) -> ToolCallRequest {
    ToolCallRequest::with_id(ToolCallId::from_raw(id), tool, arguments, turn.clone())
}
