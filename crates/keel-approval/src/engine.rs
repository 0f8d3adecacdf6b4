//! The approval decision function.
//!
//! # Evaluation order
//!
//! 1. Deny list match -> `Deny`
//! 2. Unknown tool -> `Deny`
//! 3. Allow list or session allow-list match -> `Allow`
//! 4. Mode default:
//!    - `yolo`: `Allow`
//!    - `auto-edit`: `Allow` read-only and path edits, confirm the rest
//!    - `default`: `Allow` read-only, confirm the rest
//!    - `plan`: `Allow` read-only, `Allow` path edits confined to the scratch
//!      scope, `Deny` everything else
//!
//! [`decide`] is pure apart from reading filesystem metadata for plan-scope
//! containment; it never blocks on user input.

use keel_core::{MutationClass, ToolCallRequest};
use serde_json::Value;
use tracing::debug;

use crate::decision::{ApprovalDecision, ConfirmationPrompt, DecisionRule};
use crate::mode::ApprovalMode;
use crate::store::PolicySnapshot;

/// Longest argument preview shown in a confirmation prompt.
const MAX_PREVIEW_CHARS: usize = 240;

/// What the engine needs to know about the registered tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolEntry<'a> {
    /// Declared mutation class.
    pub mutation_class: &'a MutationClass,
    /// Tool-provided preview of this call, if the tool offers one.
    pub preview: Option<&'a str>,
}

/// Classify a proposed call.
///
/// `entry` is `None` when no tool with the requested name is registered.
#[must_use]
pub fn decide(
    request: &ToolCallRequest,
    policy: &PolicySnapshot,
    entry: Option<ToolEntry<'_>>,
) -> ApprovalDecision {
    let decision = evaluate(request, policy, entry);
    debug!(
        call_id = %request.id(),
        tool = request.tool_name(),
        mode = %policy.mode,
        decision = %decision,
        "Approval decision"
    );
    decision
}

fn evaluate(
    request: &ToolCallRequest,
    policy: &PolicySnapshot,
    entry: Option<ToolEntry<'_>>,
) -> ApprovalDecision {
    let tool = request.tool_name();

    if let Some(pattern) = policy.deny.find(tool) {
        return ApprovalDecision::Deny {
            reason: format!("tool '{tool}' is excluded by pattern '{pattern}'"),
            rule: DecisionRule::DenyList {
                pattern: pattern.to_owned(),
            },
        };
    }

    let Some(entry) = entry else {
        return ApprovalDecision::Deny {
            reason: format!("tool '{tool}' is not registered"),
            rule: DecisionRule::UnknownTool,
        };
    };

    if let Some(pattern) = policy.allow.find(tool) {
        return ApprovalDecision::Allow {
            rule: DecisionRule::AllowList {
                pattern: pattern.to_owned(),
            },
        };
    }
    if policy.session_allow.contains(tool) {
        return ApprovalDecision::Allow {
            rule: DecisionRule::SessionAllowList,
        };
    }

    mode_default(request, policy, entry)
}

fn mode_default(
    request: &ToolCallRequest,
    policy: &PolicySnapshot,
    entry: ToolEntry<'_>,
) -> ApprovalDecision {
    let mode = policy.mode;
    let rule = DecisionRule::ModeDefault { mode };
    let class = entry.mutation_class;

    match (mode, class) {
        (ApprovalMode::Yolo, _)
        | (_, MutationClass::ReadOnly)
        | (ApprovalMode::AutoEdit, MutationClass::MutatesPath { .. }) => {
            ApprovalDecision::Allow { rule }
        },
        (ApprovalMode::Plan, MutationClass::MutatesPath { .. }) => plan_path_edit(request, policy, class),
        (ApprovalMode::Plan, _) => ApprovalDecision::Deny {
            reason: format!(
                "plan mode is read-only; '{}' is {}",
                request.tool_name(),
                class
            ),
            rule,
        },
        (ApprovalMode::Default | ApprovalMode::AutoEdit, _) => ApprovalDecision::NeedsConfirmation {
            prompt: ConfirmationPrompt {
                tool_name: request.tool_name().to_owned(),
                targets: class.target_paths(request.arguments()),
                mutation_class: class.clone(),
                preview: entry
                    .preview
                    .map_or_else(|| summarize_arguments(request.arguments()), str::to_owned),
            },
            rule,
        },
    }
}

fn plan_path_edit(
    request: &ToolCallRequest,
    policy: &PolicySnapshot,
    class: &MutationClass,
) -> ApprovalDecision {
    let targets = class.target_paths(request.arguments());
    if targets.is_empty() {
        return ApprovalDecision::Deny {
            reason: format!(
                "plan mode: '{}' declares no target path to check",
                request.tool_name()
            ),
            rule: DecisionRule::ModeDefault {
                mode: ApprovalMode::Plan,
            },
        };
    }

    for target in targets {
        if let Err(e) = policy.plan_scope.check(&target) {
            return ApprovalDecision::Deny {
                reason: format!(
                    "plan mode only allows writes under {}: {e}",
                    policy.plan_scope.scratch_dir().display()
                ),
                rule: DecisionRule::PlanScopeViolation { path: target },
            };
        }
    }

    ApprovalDecision::Allow {
        rule: DecisionRule::ModeDefault {
            mode: ApprovalMode::Plan,
        },
    }
}

/// Render `key=value` pairs of an argument object, truncated for display.
fn summarize_arguments(arguments: &Value) -> String {
    let summary = match arguments {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    keel_core::truncate_output(summary, MAX_PREVIEW_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::PlanScope;
    use crate::store::{PolicyStore, ToolPatterns};
    use keel_core::TurnId;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn snapshot(mode: ApprovalMode, root: &std::path::Path) -> PolicySnapshot {
        PolicySnapshot {
            mode,
            plan_scope: PlanScope::new(root, ".keel/tmp/plans").unwrap(),
            deny: ToolPatterns::empty(),
            allow: ToolPatterns::empty(),
            session_allow: BTreeSet::new(),
        }
    }

    fn call(tool: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::new(tool, args, TurnId::from_raw("t1"))
    }

    fn entry(class: &MutationClass) -> Option<ToolEntry<'_>> {
        Some(ToolEntry {
            mutation_class: class,
            preview: None,
        })
    }

    #[test]
    fn test_mode_default_table() {
        let dir = TempDir::new().unwrap();
        let read = MutationClass::ReadOnly;
        let edit = MutationClass::mutates_path(["path"]);
        let shell = MutationClass::MutatesShellState;
        let destroy = MutationClass::Destructive;
        let args = json!({"path": "src/app.ts"});

        let expect = |mode, class: &MutationClass| {
            let snap = snapshot(mode, dir.path());
            decide(&call("t", args.clone()), &snap, entry(class))
        };

        assert!(expect(ApprovalMode::Default, &read).is_allowed());
        assert!(matches!(
            expect(ApprovalMode::Default, &edit),
            ApprovalDecision::NeedsConfirmation { .. }
        ));
        assert!(expect(ApprovalMode::AutoEdit, &edit).is_allowed());
        assert!(matches!(
            expect(ApprovalMode::AutoEdit, &shell),
            ApprovalDecision::NeedsConfirmation { .. }
        ));
        assert!(expect(ApprovalMode::Yolo, &destroy).is_allowed());
        assert!(expect(ApprovalMode::Plan, &read).is_allowed());
        assert!(expect(ApprovalMode::Plan, &shell).is_denied());
    }

    #[test]
    fn test_plan_containment_examples() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".keel/tmp/plans")).unwrap();
        let snap = snapshot(ApprovalMode::Plan, dir.path());
        let write = MutationClass::mutates_path(["file_path"]);

        let readme = decide(
            &call("write_file", json!({"file_path": "README.md"})),
            &snap,
            entry(&write),
        );
        assert!(matches!(
            readme,
            ApprovalDecision::Deny {
                rule: DecisionRule::PlanScopeViolation { .. },
                ..
            }
        ));

        let plan = decide(
            &call(
                "write_file",
                json!({"file_path": ".keel/tmp/plans/login-plan.md"}),
            ),
            &snap,
            entry(&write),
        );
        assert!(plan.is_allowed());

        let escape = decide(
            &call(
                "write_file",
                json!({"file_path": ".keel/tmp/plans/../../secret.txt"}),
            ),
            &snap,
            entry(&write),
        );
        assert_eq!(
            escape.rule(),
            &DecisionRule::PlanScopeViolation {
                path: PathBuf::from(".keel/tmp/plans/../../secret.txt")
            }
        );
    }

    #[test]
    fn test_plan_requires_every_target_in_scope() {
        let dir = TempDir::new().unwrap();
        let snap = snapshot(ApprovalMode::Plan, dir.path());
        let multi = MutationClass::mutates_path(["paths"]);
        let decision = decide(
            &call(
                "write_many",
                json!({"paths": [".keel/tmp/plans/a.md", "src/b.rs"]}),
            ),
            &snap,
            entry(&multi),
        );
        assert!(decision.is_denied());
    }

    #[test]
    fn test_deny_list_beats_allow_list_and_yolo() {
        let dir = TempDir::new().unwrap();
        let mut snap = snapshot(ApprovalMode::Yolo, dir.path());
        snap.deny = ToolPatterns::new(["shell*"]).unwrap();
        snap.allow = ToolPatterns::new(["shell_exec"]).unwrap();

        let decision = decide(
            &call("shell_exec", json!({"command": "ls"})),
            &snap,
            entry(&MutationClass::MutatesShellState),
        );
        assert_eq!(
            decision.rule(),
            &DecisionRule::DenyList {
                pattern: "shell*".into()
            }
        );
    }

    #[test]
    fn test_allow_list_skips_confirmation() {
        let dir = TempDir::new().unwrap();
        let mut snap = snapshot(ApprovalMode::Default, dir.path());
        snap.allow = ToolPatterns::new(["mcp__*"]).unwrap();

        let decision = decide(
            &call("mcp__github__create_issue", json!({})),
            &snap,
            entry(&MutationClass::Destructive),
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_unknown_tool_denied() {
        let dir = TempDir::new().unwrap();
        let snap = snapshot(ApprovalMode::Yolo, dir.path());
        let decision = decide(&call("nope", json!({})), &snap, None);
        assert_eq!(decision.rule(), &DecisionRule::UnknownTool);
    }

    #[test]
    fn test_session_allow_after_approve_always() {
        let dir = TempDir::new().unwrap();
        let store = PolicyStore::new(
            ApprovalMode::Default,
            PlanScope::new(dir.path(), ".keel/tmp/plans").unwrap(),
        );
        store.allow_for_session("write_file").unwrap();
        let snap = store.snapshot().unwrap();

        let decision = decide(
            &call("write_file", json!({"path": "src/app.ts"})),
            &snap,
            entry(&MutationClass::mutates_path(["path"])),
        );
        assert_eq!(decision.rule(), &DecisionRule::SessionAllowList);
    }

    #[test]
    fn test_prompt_carries_targets_and_preview() {
        let dir = TempDir::new().unwrap();
        let snap = snapshot(ApprovalMode::Default, dir.path());
        let class = MutationClass::mutates_path(["path"]);

        let decision = decide(
            &call("write_file", json!({"path": "src/app.ts", "content": "x"})),
            &snap,
            entry(&class),
        );
        let ApprovalDecision::NeedsConfirmation { prompt, .. } = decision else {
            panic!("expected confirmation");
        };
        assert_eq!(prompt.tool_name, "write_file");
        assert_eq!(prompt.targets, vec![PathBuf::from("src/app.ts")]);
        assert_eq!(prompt.mutation_class, class);
        assert!(prompt.preview.contains("path=src/app.ts"));

        let with_preview = decide(
            &call("write_file", json!({"path": "src/app.ts"})),
            &snap,
            Some(ToolEntry {
                mutation_class: &class,
                preview: Some("--- a/src/app.ts\n+++ b/src/app.ts"),
            }),
        );
        let ApprovalDecision::NeedsConfirmation { prompt, .. } = with_preview else {
            panic!("expected confirmation");
        };
        assert!(prompt.preview.starts_with("--- a/src/app.ts"));
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".keel/tmp/plans")).unwrap();
        let request = call("write_file", json!({"path": ".keel/tmp/plans/p.md"}));
        let class = MutationClass::mutates_path(["path"]);

        for mode in [
            ApprovalMode::Default,
            ApprovalMode::AutoEdit,
            ApprovalMode::Yolo,
            ApprovalMode::Plan,
        ] {
            let snap = snapshot(mode, dir.path());
            let first = decide(&request, &snap, entry(&class));
            let second = decide(&request, &snap, entry(&class));
            assert_eq!(first, second);
        }
    }
}
