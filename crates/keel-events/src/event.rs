//! Event types published on the bus.

use keel_core::{SessionId, Timestamp, ToolCallId, ToolCallState, TurnId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was produced.
    pub timestamp: Timestamp,
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Component that produced the event (`scheduler`, `checkpoint`, ...).
    pub source: String,
}

impl EventMetadata {
    /// Create metadata stamped with the current time.
    #[must_use]
    pub fn new(session_id: SessionId, source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Timestamp::now(),
            session_id,
            source: source.into(),
        }
    }
}

/// A structured lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeelEvent {
    /// A tool call moved to a new state.
    CallStateChanged {
        /// Event metadata.
        metadata: EventMetadata,
        /// The call that transitioned.
        call_id: ToolCallId,
        /// Turn the call was proposed in.
        turn_id: TurnId,
        /// Tool being called.
        tool_name: String,
        /// Previous state, `None` for the initial `Validating` entry.
        from: Option<ToolCallState>,
        /// New state.
        to: ToolCallState,
    },
    /// A checkpoint was taken.
    CheckpointCreated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Checkpoint identifier.
        checkpoint_id: String,
        /// Session record position the checkpoint protects.
        position: u64,
        /// Call the checkpoint was taken for, if any.
        call_id: Option<ToolCallId>,
        /// Snapshot backend that produced the handle.
        backend: String,
    },
    /// A checkpoint was restored.
    CheckpointRestored {
        /// Event metadata.
        metadata: EventMetadata,
        /// Checkpoint identifier.
        checkpoint_id: String,
        /// Newer checkpoints that were marked stale.
        invalidated: Vec<String>,
    },
    /// The approval mode changed mid-session.
    ModeChanged {
        /// Event metadata.
        metadata: EventMetadata,
        /// Previous mode label.
        from: String,
        /// New mode label.
        to: String,
    },
    /// A session record write failed and the record is now incomplete.
    RecordIncomplete {
        /// Event metadata.
        metadata: EventMetadata,
        /// The storage error.
        error: String,
    },
}

impl KeelEvent {
    /// Stable snake-case event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CallStateChanged { .. } => "call_state_changed",
            Self::CheckpointCreated { .. } => "checkpoint_created",
            Self::CheckpointRestored { .. } => "checkpoint_restored",
            Self::ModeChanged { .. } => "mode_changed",
            Self::RecordIncomplete { .. } => "record_incomplete",
        }
    }

    /// The event's metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::CallStateChanged { metadata, .. }
            | Self::CheckpointCreated { metadata, .. }
            | Self::CheckpointRestored { metadata, .. }
            | Self::ModeChanged { metadata, .. }
            | Self::RecordIncomplete { metadata, .. } => metadata,
        }
    }

    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.metadata().session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = KeelEvent::CallStateChanged {
            metadata: EventMetadata::new(SessionId::from_raw("s1"), "scheduler"),
            call_id: ToolCallId::from_raw("call_1"),
            turn_id: TurnId::from_raw("t1"),
            tool_name: "write_file".into(),
            from: Some(ToolCallState::Scheduled),
            to: ToolCallState::Executing,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "call_state_changed");
        assert_eq!(json["to"]["state"], "executing");

        let back: KeelEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_metadata_timestamps_increase() {
        let a = EventMetadata::new(SessionId::from_raw("s1"), "a");
        let b = EventMetadata::new(SessionId::from_raw("s1"), "b");
        assert!(b.timestamp > a.timestamp);
        assert_ne!(a.event_id, b.event_id);
    }
}
