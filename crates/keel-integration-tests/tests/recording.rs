//! Session record durability: full-turn recording, format round trips,
//! recovery from a torn tail, and rejection of escaping session paths.

use keel_core::{SessionId, ToolCallState};
use keel_runtime::{ModelOutput, RuntimeError, Thought, TokenUsage};
use keel_session::{
    EntryKind, RecordFormat, SessionDocument, SessionError, SessionStore, document_to_jsonl,
    jsonl_to_document,
};
use keel_test::{MockTool, ScriptedConfirmations, TestWorkspace, test_call, test_turn_id};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

async fn record_one_turn(ws: &TestWorkspace, session: &str) {
    let (runtime, controller) = ws
        .open_controller(
            session,
            ws.registry([MockTool::reader("read_file")]),
            Arc::new(ScriptedConfirmations::unavailable()),
        )
        .await
        .unwrap();

    let turn = test_turn_id();
    controller
        .record_user_message(&turn, "what does main.rs do?")
        .await;
    let results = controller
        .handle_model_output(
            &turn,
            ModelOutput {
                text: Some("Let me look.".into()),
                thoughts: vec![Thought {
                    subject: Some("Reading".into()),
                    description: "Open the entry point first.".into(),
                }],
                usage: Some(TokenUsage {
                    input: 120,
                    output: 30,
                    cached: 0,
                    thoughts: 12,
                }),
                tool_calls: vec![test_call("read_file", json!({"path": "src/main.rs"}), &turn)],
            },
        )
        .await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].is_error);
    assert_eq!(results[0].content, "read_file ok");

    drop(controller);
    runtime.close().await.unwrap();
}

#[tokio::test]
async fn a_turn_is_recorded_in_order_with_transition_stamps() {
    let ws = TestWorkspace::new();
    record_one_turn(&ws, "turn-1").await;

    let back = SessionStore::new(ws.home().sessions_dir())
        .read_back(&SessionId::from_raw("turn-1"))
        .await
        .unwrap();
    assert!(back.is_complete());
    let labels: Vec<_> = back.entries.iter().map(|e| e.kind.label()).collect();
    assert_eq!(
        labels,
        vec![
            "metadata",
            "user_message",
            "thought",
            "assistant_message",
            "token_usage",
            "tool_call"
        ]
    );
    for (i, entry) in back.entries.iter().enumerate() {
        assert_eq!(entry.seq, i as u64);
    }

    let EntryKind::ToolCall(call) = &back.entries[5].kind else {
        panic!("expected a tool call entry");
    };
    assert_eq!(call.state, ToolCallState::Succeeded);
    assert_eq!(call.result.as_deref(), Some("read_file ok"));
    let states: Vec<_> = call.transitions.iter().map(|t| t.state.as_str()).collect();
    assert_eq!(states, vec!["validating", "scheduled", "executing", "succeeded"]);
    assert!(
        call.transitions
            .windows(2)
            .all(|pair| pair[0].at < pair[1].at)
    );
}

#[tokio::test]
async fn export_then_import_reproduces_the_document() {
    let ws = TestWorkspace::new();
    record_one_turn(&ws, "export-1").await;

    let store = SessionStore::new(ws.home().sessions_dir());
    let original = store.read_back(&SessionId::from_raw("export-1")).await.unwrap();
    let exported = store.export(&SessionId::from_raw("export-1")).await.unwrap();
    assert_eq!(exported.extension().and_then(|e| e.to_str()), Some("json"));

    let document: SessionDocument =
        serde_json::from_slice(&std::fs::read(&exported).unwrap()).unwrap();
    let jsonl = document_to_jsonl(&document).unwrap();
    let (again, tail) = jsonl_to_document(document.session_id.clone(), &jsonl);
    assert!(tail.is_none());
    assert_eq!(again, document);
    assert_eq!(document.entries, original.entries);

    // Importing into a fresh root yields the same entries.
    let other = tempfile::TempDir::new().unwrap();
    let other_store = SessionStore::new(other.path());
    let imported = other_store.import(&exported).await.unwrap();
    assert_eq!(imported.as_str(), "export-1");
    assert_eq!(
        other_store.read_back(&imported).await.unwrap().entries,
        original.entries
    );
}

#[tokio::test]
async fn torn_tail_keeps_prefix_and_resume_continues_after_it() {
    let ws = TestWorkspace::new();
    record_one_turn(&ws, "crash-1").await;

    let path = ws
        .home()
        .sessions_dir()
        .join(format!("crash-1.{}", RecordFormat::Jsonl.extension()));
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(br#"{"seq":6,"recorded_at":"2026-"#).unwrap();
    drop(file);

    let store = SessionStore::new(ws.home().sessions_dir());
    let back = store.read_back(&SessionId::from_raw("crash-1")).await.unwrap();
    assert_eq!(back.entries.len(), 6);
    let tail = back.corrupt_tail.unwrap();
    assert_eq!(tail.line, 7);
    assert_eq!(tail.discarded_lines, 1);

    // Reopening truncates the torn line; the gap is noted ahead of the next
    // entry.
    let runtime = ws.open_session("crash-1").await.unwrap();
    assert_eq!(runtime.recorder().position(), 6);
    assert!(runtime.recorder().is_incomplete());
    let turn = test_turn_id();
    runtime
        .recorder()
        .append(EntryKind::UserMessage {
            turn_id: turn,
            content: "continue".into(),
        })
        .await
        .unwrap();
    runtime.close().await.unwrap();

    let back = store.read_back(&SessionId::from_raw("crash-1")).await.unwrap();
    assert!(back.is_complete());
    let labels: Vec<_> = back.entries.iter().skip(6).map(|e| e.kind.label()).collect();
    assert_eq!(labels, vec!["record_gap", "user_message"]);
    assert_eq!(back.entries[7].seq, 7);
}

#[tokio::test]
async fn escaping_session_ids_are_rejected_before_any_file_exists() {
    let ws = TestWorkspace::new();
    for bad in ["../escape", "a/b", "..", ""] {
        let err = ws.open_session(bad).await.unwrap_err();
        assert!(
            matches!(err, RuntimeError::Session(SessionError::Security(_))),
            "{bad:?} gave {err}"
        );
    }
    assert!(!ws.temp_path().join("home/escape.jsonl").exists());
    assert!(!ws.temp_path().join("escape.jsonl").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_session_file_outside_root_is_rejected() {
    let ws = TestWorkspace::new();
    let sessions = ws.home().sessions_dir();
    std::fs::create_dir_all(&sessions).unwrap();
    let outside = ws.temp_path().join("outside.jsonl");
    std::fs::write(&outside, "").unwrap();
    std::os::unix::fs::symlink(&outside, sessions.join("linked.jsonl")).unwrap();

    let err = ws.open_session("linked").await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Session(SessionError::Security(_))
    ));
    assert_eq!(std::fs::read_to_string(&outside).unwrap(), "");
}
