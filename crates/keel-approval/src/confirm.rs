//! Confirmation handlers.
//!
//! When the engine returns [`ApprovalDecision::NeedsConfirmation`] the
//! scheduler suspends the call and hands the prompt to a
//! [`ConfirmationHandler`]. The CLI implements one over stdin; tests and
//! headless runs use [`NoConfirmation`] or a scripted handler.
//!
//! [`ApprovalDecision::NeedsConfirmation`]: crate::ApprovalDecision::NeedsConfirmation

use async_trait::async_trait;
use keel_core::ToolCallRequest;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decision::ConfirmationPrompt;

/// The answer to a confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    /// Run this call.
    Approve,
    /// Run this call and stop asking for this tool for the rest of the session.
    ApproveAlways,
    /// Do not run this call.
    Reject {
        /// Why the call was rejected.
        reason: String,
    },
}

impl ConfirmationOutcome {
    /// Shorthand for a rejection.
    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }

    /// Whether the call may run.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve | Self::ApproveAlways)
    }
}

impl fmt::Display for ConfirmationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => f.write_str("approve"),
            Self::ApproveAlways => f.write_str("approve always"),
            Self::Reject { reason } => write!(f, "reject: {reason}"),
        }
    }
}

/// Something that can answer confirmation prompts.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    /// Ask for a decision on `request`.
    ///
    /// Implementations may wait indefinitely; the scheduler races this
    /// future against turn cancellation.
    async fn confirm(
        &self,
        request: &ToolCallRequest,
        prompt: &ConfirmationPrompt,
    ) -> ConfirmationOutcome;

    /// Whether a human (or script) is attached. When this returns `false`
    /// the scheduler rejects without calling [`confirm`](Self::confirm).
    fn is_available(&self) -> bool {
        true
    }
}

/// A handler for non-interactive runs: every prompt is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConfirmation;

#[async_trait]
impl ConfirmationHandler for NoConfirmation {
    async fn confirm(
        &self,
        _request: &ToolCallRequest,
        prompt: &ConfirmationPrompt,
    ) -> ConfirmationOutcome {
        ConfirmationOutcome::reject(format!(
            "no confirmation handler attached for '{}'",
            prompt.tool_name
        ))
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{MutationClass, TurnId};
    use serde_json::json;

    #[tokio::test]
    async fn test_no_confirmation_rejects() {
        let handler = NoConfirmation;
        let request = ToolCallRequest::new("shell_exec", json!({}), TurnId::from_raw("t"));
        let prompt = ConfirmationPrompt {
            tool_name: "shell_exec".into(),
            targets: Vec::new(),
            mutation_class: MutationClass::MutatesShellState,
            preview: "ls".into(),
        };

        assert!(!handler.is_available());
        let outcome = handler.confirm(&request, &prompt).await;
        assert!(!outcome.is_approved());
        assert!(outcome.to_string().contains("shell_exec"));
    }

    #[test]
    fn test_outcome_serde_tag() {
        let json = serde_json::to_value(ConfirmationOutcome::ApproveAlways).unwrap();
        assert_eq!(json, json!({"outcome": "approve_always"}));
    }
}
