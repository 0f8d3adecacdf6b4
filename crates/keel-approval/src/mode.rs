//! Process-wide trust modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ApprovalError;

/// The user-selected trust mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Prompt for anything beyond read-only.
    #[default]
    Default,
    /// Auto-approve path edits; prompt for shell and destructive calls.
    #[serde(alias = "auto_edit", alias = "autoEdit")]
    AutoEdit,
    /// Auto-approve everything not explicitly denied.
    Yolo,
    /// Read-only, except writes under the plan scratch scope.
    Plan,
}

impl ApprovalMode {
    /// Canonical kebab-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AutoEdit => "auto-edit",
            Self::Yolo => "yolo",
            Self::Plan => "plan",
        }
    }
}

impl FromStr for ApprovalMode {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "default" => Ok(Self::Default),
            "auto-edit" | "auto_edit" | "autoEdit" => Ok(Self::AutoEdit),
            "yolo" => Ok(Self::Yolo),
            "plan" => Ok(Self::Plan),
            other => Err(ApprovalError::UnknownMode(other.to_owned())),
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
