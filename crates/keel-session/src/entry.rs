//! Session record entries.
//!
//! Every entry carries a sequence number assigned by the writer in
//! submission order, a timestamp, and a tagged body. Entries are immutable
//! once written.

use keel_approval::{ApprovalDecision, ConfirmationOutcome};
use keel_core::{SessionId, Timestamp, ToolCallId, ToolCallRequest, ToolCallState, TurnId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One immutable record entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Position in the record, starting at zero.
    pub seq: u64,
    /// When the writer accepted the entry.
    pub recorded_at: Timestamp,
    /// Entry body.
    #[serde(flatten)]
    pub kind: EntryKind,
}

/// Entry body, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    /// Session-level metadata, normally the first entry.
    Metadata(SessionMetadata),
    /// Text the user sent.
    UserMessage {
        /// Turn the message opened.
        turn_id: TurnId,
        /// Message text.
        content: String,
    },
    /// Text the model produced.
    AssistantMessage {
        /// Turn the message belongs to.
        turn_id: TurnId,
        /// Message text.
        content: String,
    },
    /// A model reasoning summary.
    Thought {
        /// Turn the thought belongs to.
        turn_id: TurnId,
        /// Short subject line.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        /// Thought text.
        description: String,
    },
    /// Token accounting for one model response.
    TokenUsage {
        /// Turn the usage belongs to.
        turn_id: TurnId,
        /// Prompt tokens.
        input: u64,
        /// Completion tokens.
        output: u64,
        /// Prompt tokens served from cache.
        #[serde(default)]
        cached: u64,
        /// Reasoning tokens.
        #[serde(default)]
        thoughts: u64,
    },
    /// A finished tool call.
    ToolCall(ToolCallEntry),
    /// The approval mode changed mid-session.
    ModeChange {
        /// Previous mode.
        from: String,
        /// New mode.
        to: String,
    },
    /// A checkpoint was created or restored.
    Checkpoint(CheckpointEntry),
    /// One or more earlier writes were lost; the record is incomplete.
    RecordGap {
        /// Number of failed writes since the last successful one.
        failed_writes: u64,
        /// First error observed.
        error: String,
    },
}

impl EntryKind {
    /// Stable type label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Metadata(_) => "metadata",
            Self::UserMessage { .. } => "user_message",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::Thought { .. } => "thought",
            Self::TokenUsage { .. } => "token_usage",
            Self::ToolCall(_) => "tool_call",
            Self::ModeChange { .. } => "mode_change",
            Self::Checkpoint(_) => "checkpoint",
            Self::RecordGap { .. } => "record_gap",
        }
    }
}

/// Session-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Session identifier.
    pub session_id: SessionId,
    /// Session start.
    pub started_at: Timestamp,
    /// Workspace the session operates on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
    /// Approval mode at session start.
    pub approval_mode: String,
    /// Free-form extra fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// When a call entered one of its states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStamp {
    /// State label (`validating`, `scheduled`, ...).
    pub state: String,
    /// Entry time.
    pub at: Timestamp,
}

/// The persisted record of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEntry {
    /// Call identifier.
    pub call_id: ToolCallId,
    /// Turn the call was proposed in.
    pub turn_id: TurnId,
    /// Tool name.
    pub tool_name: String,
    /// Arguments as proposed.
    pub arguments: Value,
    /// Approval decision, absent when the call failed validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecision>,
    /// Confirmation answer, when one was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationOutcome>,
    /// Terminal state.
    pub state: ToolCallState,
    /// Tool output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Checkpoint taken for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    /// Every state the call entered, in order.
    pub transitions: Vec<TransitionStamp>,
}

impl ToolCallEntry {
    /// Start an entry for `request` with no decision or transitions yet.
    #[must_use]
    pub fn for_request(request: &ToolCallRequest, state: ToolCallState) -> Self {
        Self {
            call_id: request.id().clone(),
            turn_id: request.turn_id().clone(),
            tool_name: request.tool_name().to_string(),
            arguments: request.arguments().clone(),
            decision: None,
            confirmation: None,
            state,
            result: None,
            checkpoint_id: None,
            transitions: Vec::new(),
        }
    }

    /// Time the call entered `state`, if it did.
    #[must_use]
    pub fn entered_at(&self, state: &str) -> Option<Timestamp> {
        self.transitions
            .iter()
            .find(|t| t.state == state)
            .map(|t| t.at)
    }
}

/// Whether a checkpoint entry records creation or restoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointAction {
    /// Snapshot taken.
    Created,
    /// Workspace rolled back.
    Restored,
}

/// A checkpoint lifecycle entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Created or restored.
    pub action: CheckpointAction,
    /// Checkpoint identifier.
    pub checkpoint_id: String,
    /// Backend that holds the snapshot.
    pub backend: String,
    /// Record position the checkpoint protects.
    pub position: u64,
    /// Call the checkpoint was taken for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<ToolCallId>,
    /// Checkpoints invalidated by a restore.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalidated: Vec<String>,
}
