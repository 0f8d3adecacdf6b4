//! End-to-end approval scenarios through a real session runtime.
//!
//! Each test opens a session in a temporary workspace with the directory
//! checkpoint backend, drives a batch through the turn controller, and checks
//! the outcome, the checkpoint log and the session record together.

use keel_approval::{ApprovalDecision, ApprovalMode, ConfirmationOutcome, DecisionRule};
use keel_checkpoint::CheckpointStatus;
use keel_core::{SessionId, ToolCallState};
use keel_events::KeelEvent;
use keel_runtime::ToolError;
use keel_session::{CheckpointAction, EntryKind, SessionStore};
use keel_test::{MockTool, ScriptedConfirmations, TestWorkspace, test_call, test_turn_id};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn yolo_destructive_call_is_checkpointed_then_executed() {
    let ws = TestWorkspace::new().with_mode("yolo");
    ws.write("build/out.txt", "artifact");
    let victim = ws.root().join("build/out.txt");
    let rm = MockTool::destructive("shell_rm").with_effect(move |_| {
        std::fs::remove_file(&victim)?;
        Ok("removed".into())
    });

    let (runtime, controller) = ws
        .open_controller(
            "yolo-1",
            ws.registry([rm]),
            Arc::new(ScriptedConfirmations::unavailable()),
        )
        .await
        .unwrap();

    let turn = test_turn_id();
    let outcomes = controller
        .run_tool_calls(&[test_call("shell_rm", json!({"command": "rm -rf /tmp/x"}), &turn)])
        .await;
    let outcome = &outcomes[0];

    assert_eq!(outcome.state, ToolCallState::Succeeded);
    assert!(matches!(outcome.decision, Some(ApprovalDecision::Allow { .. })));
    assert!(outcome.confirmation.is_none());
    assert!(ws.read("build/out.txt").is_none());

    let checkpoint_id = outcome.checkpoint_id.clone().unwrap();
    let record = runtime.checkpoints().get(&checkpoint_id).await.unwrap();
    let executing = outcome.entered_at("executing").unwrap();
    assert!(record.created_at < executing);
    assert_eq!(record.call_id.as_ref(), Some(&outcome.call_id));

    // The snapshot taken before the call brings the file back.
    let restored = controller.restore_checkpoint(&checkpoint_id).await.unwrap();
    assert!(restored.report.restored >= 1);
    assert_eq!(ws.read("build/out.txt").as_deref(), Some("artifact"));

    drop(controller);
    runtime.close().await.unwrap();

    let back = SessionStore::new(ws.home().sessions_dir())
        .read_back(&SessionId::from_raw("yolo-1"))
        .await
        .unwrap();
    let labels: Vec<_> = back.entries.iter().map(|e| e.kind.label()).collect();
    assert_eq!(
        labels,
        vec!["metadata", "checkpoint", "tool_call", "checkpoint"]
    );
    match &back.entries[3].kind {
        EntryKind::Checkpoint(entry) => assert_eq!(entry.action, CheckpointAction::Restored),
        other => panic!("unexpected entry {other:?}"),
    }
}

#[tokio::test]
async fn default_mode_rejected_write_is_cancelled_without_checkpoint() {
    let ws = TestWorkspace::new();
    let writes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&writes);
    let write = MockTool::writer("write_file").with_effect(move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok("written".into())
    });
    let confirmations = ScriptedConfirmations::new().reject("not now");

    let (runtime, controller) = ws
        .open_controller(
            "default-1",
            ws.registry([write]),
            Arc::new(confirmations.clone()),
        )
        .await
        .unwrap();

    let turn = test_turn_id();
    let outcomes = controller
        .run_tool_calls(&[test_call(
            "write_file",
            json!({"file_path": "src/app.ts", "content": "export {}"}),
            &turn,
        )])
        .await;
    let outcome = &outcomes[0];

    assert!(matches!(
        outcome.decision,
        Some(ApprovalDecision::NeedsConfirmation { .. })
    ));
    assert_eq!(
        outcome.state,
        ToolCallState::Cancelled {
            reason: "rejected at confirmation: not now".into()
        }
    );
    assert_eq!(
        outcome.confirmation,
        Some(ConfirmationOutcome::reject("not now"))
    );
    assert!(outcome.entered_at("awaiting_approval").is_some());
    assert!(outcome.entered_at("executing").is_none());
    assert!(outcome.checkpoint_id.is_none());
    assert_eq!(writes.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(runtime.checkpoints().list().await.is_empty());

    let prompts = confirmations.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].tool_name, "write_file");
    assert_eq!(prompts[0].targets, vec![std::path::PathBuf::from("src/app.ts")]);

    drop(controller);
    runtime.close().await.unwrap();
}

#[tokio::test]
async fn plan_mode_allows_only_scratch_writes() {
    let ws = TestWorkspace::new().with_mode("plan");
    let (runtime, controller) = ws
        .open_controller(
            "plan-1",
            ws.registry([MockTool::writer("write_file")]),
            Arc::new(ScriptedConfirmations::unavailable()),
        )
        .await
        .unwrap();

    let turn = test_turn_id();
    let outcomes = controller
        .run_tool_calls(&[
            test_call("write_file", json!({"file_path": "README.md"}), &turn),
            test_call(
                "write_file",
                json!({"file_path": ".keel/tmp/plans/login-plan.md"}),
                &turn,
            ),
            test_call(
                "write_file",
                json!({"file_path": ".keel/tmp/plans/../../secret.txt"}),
                &turn,
            ),
        ])
        .await;

    assert_eq!(outcomes[0].state.label(), "denied");
    assert!(matches!(
        outcomes[0].decision.as_ref().map(ApprovalDecision::rule),
        Some(DecisionRule::PlanScopeViolation { .. })
    ));
    assert_eq!(outcomes[1].state, ToolCallState::Succeeded);
    assert_eq!(outcomes[2].state.label(), "denied");
    assert!(outcomes[2].entered_at("executing").is_none());

    drop(controller);
    runtime.close().await.unwrap();
}

#[tokio::test]
async fn approve_always_skips_later_prompts_for_that_tool() {
    let ws = TestWorkspace::new().with_mode("auto_edit");
    let confirmations = ScriptedConfirmations::new().then(ConfirmationOutcome::ApproveAlways);
    let (runtime, controller) = ws
        .open_controller(
            "always-1",
            ws.registry([MockTool::shell("shell_exec")]),
            Arc::new(confirmations.clone()),
        )
        .await
        .unwrap();

    let turn = test_turn_id();
    let first = controller
        .run_tool_calls(&[test_call("shell_exec", json!({"command": "cd src"}), &turn)])
        .await;
    let second = controller
        .run_tool_calls(&[test_call("shell_exec", json!({"command": "ls"}), &turn)])
        .await;

    assert!(first[0].is_success());
    assert!(second[0].is_success());
    assert_eq!(confirmations.prompted_tools(), vec!["shell_exec".to_string()]);
    assert_eq!(
        second[0].decision.as_ref().map(ApprovalDecision::rule),
        Some(&DecisionRule::SessionAllowList)
    );
    // Only a mutation since the first checkpoint forces a second one.
    assert_eq!(runtime.checkpoints().list().await.len(), 2);

    drop(controller);
    runtime.close().await.unwrap();
}

#[tokio::test]
async fn mode_change_applies_to_the_next_decision_and_is_recorded() {
    let ws = TestWorkspace::new();
    let (runtime, controller) = ws
        .open_controller(
            "mode-1",
            ws.registry([MockTool::writer("write_file")]),
            Arc::new(ScriptedConfirmations::new()),
        )
        .await
        .unwrap();
    let turn = test_turn_id();

    let before = controller
        .run_tool_calls(&[test_call("write_file", json!({"file_path": "a.txt"}), &turn)])
        .await;
    assert_eq!(before[0].state.label(), "cancelled");

    let previous = controller.set_mode(ApprovalMode::AutoEdit).await.unwrap();
    assert_eq!(previous, ApprovalMode::Default);

    let after = controller
        .run_tool_calls(&[test_call("write_file", json!({"file_path": "a.txt"}), &turn)])
        .await;
    assert!(after[0].is_success());

    drop(controller);
    runtime.close().await.unwrap();

    let back = SessionStore::new(ws.home().sessions_dir())
        .read_back(&SessionId::from_raw("mode-1"))
        .await
        .unwrap();
    assert!(back.entries.iter().any(|e| matches!(
        &e.kind,
        EntryKind::ModeChange { from, to } if from == "default" && to == "auto-edit"
    )));
}

#[tokio::test]
async fn executor_error_is_preserved_verbatim() {
    let ws = TestWorkspace::new().with_mode("yolo");
    let failing = MockTool::reader("grep")
        .with_result(Err(ToolError::ExecutionFailed("pattern too large".into())));
    let (runtime, controller) = ws
        .open_controller(
            "fail-1",
            ws.registry([failing]),
            Arc::new(ScriptedConfirmations::unavailable()),
        )
        .await
        .unwrap();

    let turn = test_turn_id();
    let outcomes = controller
        .run_tool_calls(&[test_call("grep", json!({}), &turn)])
        .await;
    assert_eq!(
        outcomes[0].state,
        ToolCallState::Failed {
            error: "pattern too large".into()
        }
    );

    drop(controller);
    runtime.close().await.unwrap();
}

#[tokio::test]
async fn restoring_an_older_checkpoint_marks_newer_ones_stale() {
    let ws = TestWorkspace::new().with_mode("yolo");
    ws.write("notes.txt", "v1");
    let target = ws.root().join("notes.txt");
    let shell = MockTool::shell("shell_exec").with_effect(move |args| {
        let command = args["command"].as_str().unwrap_or_default();
        std::fs::write(&target, command)?;
        Ok(String::new())
    });
    let (runtime, controller) = ws
        .open_controller(
            "stale-1",
            ws.registry([shell]),
            Arc::new(ScriptedConfirmations::unavailable()),
        )
        .await
        .unwrap();

    let turn = test_turn_id();
    let first = controller
        .run_tool_calls(&[test_call("shell_exec", json!({"command": "v2"}), &turn)])
        .await;
    let second = controller
        .run_tool_calls(&[test_call("shell_exec", json!({"command": "v3"}), &turn)])
        .await;
    assert_eq!(ws.read("notes.txt").as_deref(), Some("v3"));

    let older = first[0].checkpoint_id.clone().unwrap();
    let newer = second[0].checkpoint_id.clone().unwrap();
    assert_ne!(older, newer);

    let outcome = controller.restore_checkpoint(&older).await.unwrap();
    assert_eq!(outcome.invalidated, vec![newer.clone()]);
    assert_eq!(ws.read("notes.txt").as_deref(), Some("v1"));

    let newer_record = runtime.checkpoints().get(&newer).await.unwrap();
    assert_eq!(newer_record.status, CheckpointStatus::Stale);
    assert!(controller.restore_checkpoint(&newer).await.is_err());

    drop(controller);
    runtime.close().await.unwrap();
}

#[tokio::test]
async fn every_transition_is_published_once() {
    let ws = TestWorkspace::new();
    let (runtime, controller) = ws
        .open_controller(
            "events-1",
            ws.registry([MockTool::reader("read_file")]),
            Arc::new(ScriptedConfirmations::unavailable()),
        )
        .await
        .unwrap();
    let mut events = runtime.events().subscribe();

    let turn = test_turn_id();
    let outcomes = controller
        .run_tool_calls(&[test_call("read_file", json!({}), &turn)])
        .await;

    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        if let KeelEvent::CallStateChanged { call_id, to, .. } = event.as_ref() {
            assert_eq!(call_id, &outcomes[0].call_id);
            seen.push(to.label());
        }
    }
    assert_eq!(seen, vec!["validating", "scheduled", "executing", "succeeded"]);

    drop(controller);
    runtime.close().await.unwrap();
}
