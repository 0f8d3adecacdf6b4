//! The per-call state machine value.
//!
//! ```text
//! Validating ─► Scheduled ─► AwaitingApproval ─► Executing ─► Succeeded
//!     │             │               │                │
//!     └─► Failed    ├─► Failed      ├─► Denied       ├─► Failed
//!                   ├─► Denied      └─► Cancelled    └─► Cancelled
//!                   ├─► Cancelled
//!                   └─► Executing (approval not needed)
//! ```
//!
//! Transitions only move forward; a call reaches exactly one terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ToolCallState {
    /// Arguments are being checked against the tool's declared contract.
    Validating,
    /// Valid and waiting for dispatch.
    Scheduled,
    /// Suspended on a human or automated confirmation.
    AwaitingApproval,
    /// Running in the tool executor.
    Executing,
    /// Terminal: the executor reported success.
    Succeeded,
    /// Terminal: validation, checkpointing, or execution failed.
    Failed {
        /// Human-readable error, tool payload preserved verbatim.
        error: String,
    },
    /// Terminal: the approval policy denied the call.
    Denied {
        /// The rule and reason that produced the denial.
        reason: String,
    },
    /// Terminal: rejected at confirmation, or cancelled while pending or running.
    Cancelled {
        /// Why the call was cancelled.
        reason: String,
    },
}

impl ToolCallState {
    /// Stable snake-case label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Scheduled => "scheduled",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Denied { .. } => "denied",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether this is a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed { .. } | Self::Denied { .. } | Self::Cancelled { .. }
        )
    }

    /// The human-readable reason carried by a terminal state, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            Self::Denied { reason } | Self::Cancelled { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Validating, Self::Scheduled | Self::Failed { .. })
            | (
                Self::Scheduled,
                Self::AwaitingApproval
                | Self::Executing
                | Self::Failed { .. }
                | Self::Denied { .. }
                | Self::Cancelled { .. },
            )
            | (
                Self::AwaitingApproval,
                Self::Executing | Self::Denied { .. } | Self::Cancelled { .. } | Self::Failed { .. },
            )
            | (
                Self::Executing,
                Self::Succeeded | Self::Failed { .. } | Self::Cancelled { .. },
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ToolCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {reason}", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> ToolCallState {
        ToolCallState::Failed {
            error: "boom".into(),
        }
    }

    #[test]
    fn test_forward_path() {
        use ToolCallState::*;
        assert!(Validating.can_transition_to(&Scheduled));
        assert!(Scheduled.can_transition_to(&AwaitingApproval));
        assert!(AwaitingApproval.can_transition_to(&Executing));
        assert!(Executing.can_transition_to(&Succeeded));
        assert!(Scheduled.can_transition_to(&Executing));
    }

    #[test]
    fn test_no_state_is_revisited() {
        use ToolCallState::*;
        assert!(!Scheduled.can_transition_to(&Validating));
        assert!(!Executing.can_transition_to(&AwaitingApproval));
        assert!(!Executing.can_transition_to(&Executing));
        assert!(!Succeeded.can_transition_to(&failed()));
        assert!(!failed().can_transition_to(&Succeeded));
    }

    #[test]
    fn test_success_only_from_executing() {
        use ToolCallState::*;
        assert!(!Scheduled.can_transition_to(&Succeeded));
        assert!(!AwaitingApproval.can_transition_to(&Succeeded));
    }

    #[test]
    fn test_terminal_reason() {
        let denied = ToolCallState::Denied {
            reason: "deny-list match".into(),
        };
        assert!(denied.is_terminal());
        assert_eq!(denied.reason(), Some("deny-list match"));
        assert_eq!(denied.to_string(), "denied: deny-list match");
        assert!(!ToolCallState::Executing.is_terminal());
    }
}
