//! Tool call requests and declared mutation classes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

use crate::types::{Timestamp, ToolCallId, TurnId};

/// The category of side effect a tool declares at registration.
///
/// Every registered tool declares exactly one class. The scheduler uses it
/// to decide what may run concurrently, and the approval engine uses it for
/// mode defaults and plan-scope checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "kebab-case")]
pub enum MutationClass {
    /// Observes state without changing it.
    ReadOnly,
    /// Writes to the filesystem paths named by the listed argument fields.
    MutatesPath {
        /// Argument fields holding target paths (string or array of strings).
        path_fields: Vec<String>,
    },
    /// Changes the state of the shared shell session.
    MutatesShellState,
    /// Irreversible or unbounded effects.
    Destructive,
}

impl MutationClass {
    /// Shorthand for a path-mutating class.
    #[must_use]
    pub fn mutates_path<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MutatesPath {
            path_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Stable kebab-case label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::MutatesPath { .. } => "mutates-path",
            Self::MutatesShellState => "mutates-shell-state",
            Self::Destructive => "destructive",
        }
    }

    /// Whether the class observes state only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    /// Whether a checkpoint must exist before a call of this class executes.
    #[must_use]
    pub fn requires_checkpoint(&self) -> bool {
        matches!(self, Self::MutatesShellState | Self::Destructive)
    }

    /// Whether calls of this class are serialized against every other
    /// mutating call, regardless of declared paths.
    #[must_use]
    pub fn is_globally_serialized(&self) -> bool {
        self.requires_checkpoint()
    }

    /// Extract the target paths a call declares through its path fields.
    ///
    /// Only [`MutationClass::MutatesPath`] declares paths. String fields yield
    /// one path, arrays yield one path per string element, and anything else
    /// is ignored (argument validation reports it separately).
    #[must_use]
    pub fn target_paths(&self, arguments: &Value) -> Vec<PathBuf> {
        let Self::MutatesPath { path_fields } = self else {
            return Vec::new();
        };

        let mut paths = Vec::new();
        for field in path_fields {
            match arguments.get(field) {
                Some(Value::String(s)) => paths.push(PathBuf::from(s)),
                Some(Value::Array(items)) => {
                    paths.extend(items.iter().filter_map(Value::as_str).map(PathBuf::from));
                },
                _ => {},
            }
        }
        paths
    }
}

impl fmt::Display for MutationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A tool call proposed by the model.
///
/// Immutable once created: the scheduler, policy engine and recorder all see
/// the same request value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    id: ToolCallId,
    tool_name: String,
    arguments: Value,
    turn_id: TurnId,
    proposed_at: Timestamp,
}

impl ToolCallRequest {
    /// Create a request with a fresh call ID.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, arguments: Value, turn_id: TurnId) -> Self {
        Self::with_id(ToolCallId::new(), tool_name, arguments, turn_id)
    }

    /// Create a request with a model-provided call ID.
    #[must_use]
    pub fn with_id(
        id: ToolCallId,
        tool_name: impl Into<String>,
        arguments: Value,
        turn_id: TurnId,
    ) -> Self {
        Self {
            id,
            tool_name: tool_name.into(),
            arguments,
            turn_id,
            proposed_at: Timestamp::now(),
        }
    }

    /// Call identifier.
    #[must_use]
    pub fn id(&self) -> &ToolCallId {
        &self.id
    }

    /// Name of the tool being called.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Argument payload, opaque beyond declared path fields.
    #[must_use]
    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// The turn that proposed this call.
    #[must_use]
    pub fn turn_id(&self) -> &TurnId {
        &self.turn_id
    }

    /// When the request was created.
    #[must_use]
    pub fn proposed_at(&self) -> Timestamp {
        self.proposed_at
    }
}

impl fmt::Display for ToolCallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tool_name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_paths_from_string_and_array_fields() {
        let class = MutationClass::mutates_path(["file_path", "extra"]);
        let args = json!({
            "file_path": "src/main.rs",
            "extra": ["a.txt", 42, "b.txt"],
        });
        assert_eq!(
            class.target_paths(&args),
            vec![
                PathBuf::from("src/main.rs"),
                PathBuf::from("a.txt"),
                PathBuf::from("b.txt"),
            ]
        );
    }

    #[test]
    fn test_non_path_classes_declare_no_targets() {
        let args = json!({"file_path": "x"});
        assert!(MutationClass::ReadOnly.target_paths(&args).is_empty());
        assert!(MutationClass::Destructive.target_paths(&args).is_empty());
    }

    #[test]
    fn test_checkpoint_requirement() {
        assert!(MutationClass::Destructive.requires_checkpoint());
        assert!(MutationClass::MutatesShellState.requires_checkpoint());
        assert!(!MutationClass::ReadOnly.requires_checkpoint());
        assert!(!MutationClass::mutates_path(["p"]).requires_checkpoint());
    }

    #[test]
    fn test_class_serialization_is_kebab_tagged() {
        let json = serde_json::to_value(MutationClass::MutatesShellState).unwrap();
        assert_eq!(json, json!({"class": "mutates-shell-state"}));
    }
}
