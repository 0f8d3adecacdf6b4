//! Approval decisions and the rules that produce them.

use keel_core::MutationClass;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::mode::ApprovalMode;

/// The rule that produced a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum DecisionRule {
    /// The tool matched an entry of the deny list.
    DenyList {
        /// The matching pattern.
        pattern: String,
    },
    /// The tool matched an entry of the configured allow list.
    AllowList {
        /// The matching pattern.
        pattern: String,
    },
    /// The tool was approved for the rest of the session by a confirmation.
    SessionAllowList,
    /// No list matched; the active mode decided.
    ModeDefault {
        /// Mode in effect at decision time.
        mode: ApprovalMode,
    },
    /// Plan mode: a target path lies outside the scratch scope.
    PlanScopeViolation {
        /// The offending target, as supplied.
        path: PathBuf,
    },
    /// No tool with this name is registered.
    UnknownTool,
}

impl fmt::Display for DecisionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DenyList { pattern } => write!(f, "deny-list match '{pattern}'"),
            Self::AllowList { pattern } => write!(f, "allow-list match '{pattern}'"),
            Self::SessionAllowList => f.write_str("session allow-list"),
            Self::ModeDefault { mode } => write!(f, "mode default ({mode})"),
            Self::PlanScopeViolation { path } => {
                write!(f, "plan-scope violation '{}'", path.display())
            },
            Self::UnknownTool => f.write_str("unknown tool"),
        }
    }
}

/// What the user is asked to confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPrompt {
    /// Tool being called.
    pub tool_name: String,
    /// Paths the call declares it will touch.
    pub targets: Vec<PathBuf>,
    /// The tool's declared class.
    pub mutation_class: MutationClass,
    /// Human-readable summary of what will happen.
    pub preview: String,
}

/// Outcome of evaluating one proposed call against the policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Proceed without asking.
    Allow {
        /// Rule that allowed the call.
        rule: DecisionRule,
    },
    /// Never execute.
    Deny {
        /// Human-readable reason, recorded verbatim.
        reason: String,
        /// Rule that denied the call.
        rule: DecisionRule,
    },
    /// Ask a confirmation handler first.
    NeedsConfirmation {
        /// What to show the user.
        prompt: ConfirmationPrompt,
        /// Rule that required confirmation.
        rule: DecisionRule,
    },
}

impl ApprovalDecision {
    /// The rule behind this decision.
    #[must_use]
    pub fn rule(&self) -> &DecisionRule {
        match self {
            Self::Allow { rule } | Self::Deny { rule, .. } | Self::NeedsConfirmation { rule, .. } => {
                rule
            },
        }
    }

    /// Whether the call may proceed without confirmation.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Whether the call is denied outright.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow { rule } => write!(f, "allow ({rule})"),
            Self::Deny { reason, .. } => write!(f, "deny: {reason}"),
            Self::NeedsConfirmation { rule, .. } => write!(f, "needs confirmation ({rule})"),
        }
    }
}
