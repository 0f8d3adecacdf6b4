//! Session commands - list, show, export and import session records.

use anyhow::Result;
use chrono::{DateTime, Local};
use colored::Colorize;
use keel_core::SessionId;
use keel_session::{EntryKind, SessionEntry, SessionStore};
use std::path::Path;

use crate::CliContext;
use crate::theme::Theme;

fn store(ctx: &CliContext) -> SessionStore {
    SessionStore::new(ctx.resolved.config.sessions.resolve_root(&ctx.home))
}

/// List all sessions.
pub(crate) async fn list_sessions(ctx: &CliContext) -> Result<()> {
    let sessions = store(ctx).list().await?;

    if sessions.is_empty() {
        println!("{}", Theme::info("No sessions found"));
        return Ok(());
    }

    println!("\n{}", Theme::header("Sessions"));
    println!(
        "{:<40} {:>20} {}",
        "ID".dimmed(),
        "MODIFIED".dimmed(),
        "FORMATS".dimmed()
    );
    println!("{}", Theme::separator());

    for session in sessions {
        let modified: DateTime<Local> = session.modified.into();
        let formats = session
            .formats
            .iter()
            .map(|f| f.extension())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<40} {:>20} {}",
            Theme::id(session.id.as_str()),
            modified.format("%Y-%m-%d %H:%M:%S"),
            formats.dimmed()
        );
    }

    println!();
    Ok(())
}

/// Print a session's entries.
pub(crate) async fn show_session(ctx: &CliContext, id: &str, json: bool) -> Result<()> {
    let session_id = SessionId::from_raw(id);
    let read = store(ctx).read_back(&session_id).await?;

    if json {
        for entry in &read.entries {
            println!("{}", serde_json::to_string(entry)?);
        }
    } else {
        println!("\n{} {}", Theme::header("Session"), Theme::id(id));
        println!("{}", Theme::separator());
        for entry in &read.entries {
            println!("{}", describe(entry));
        }
        println!();
    }

    if let Some(tail) = &read.corrupt_tail {
        eprintln!(
            "{}",
            Theme::warning(&format!(
                "record is incomplete: line {} unreadable ({}), {} line(s) ignored",
                tail.line, tail.error, tail.discarded_lines
            ))
        );
    }
    Ok(())
}

fn describe(entry: &SessionEntry) -> String {
    let prefix = format!("{:>5}", entry.seq).dimmed();
    let body = match &entry.kind {
        EntryKind::Metadata(meta) => format!(
            "metadata     mode={} workspace={}",
            meta.approval_mode,
            meta.workspace_root
                .as_ref()
                .map_or_else(|| "-".to_string(), |p| p.display().to_string())
        ),
        EntryKind::UserMessage { content, .. } => format!("user         {}", first_line(content)),
        EntryKind::AssistantMessage { content, .. } => {
            format!("assistant    {}", first_line(content))
        },
        EntryKind::Thought {
            subject,
            description,
            ..
        } => format!(
            "thought      {}",
            subject.as_deref().unwrap_or_else(|| first_line(description))
        ),
        EntryKind::TokenUsage { input, output, .. } => {
            format!("tokens       in={input} out={output}")
        },
        EntryKind::ToolCall(call) => format!(
            "tool_call    {} {} [{}]",
            call.tool_name,
            call.call_id,
            Theme::state(call.state.label())
        ),
        EntryKind::ModeChange { from, to } => format!("mode         {from} -> {to}"),
        EntryKind::Checkpoint(cp) => format!(
            "checkpoint   {:?} {} at #{}",
            cp.action, cp.checkpoint_id, cp.position
        ),
        EntryKind::RecordGap {
            failed_writes,
            error,
        } => format!("record_gap   {failed_writes} write(s) lost: {error}")
            .red()
            .to_string(),
    };
    format!("{prefix} {body}")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Write the consolidated document for a session.
pub(crate) async fn export_session(ctx: &CliContext, id: &str) -> Result<()> {
    let path = store(ctx).export(&SessionId::from_raw(id)).await?;
    println!(
        "{}",
        Theme::success(&format!("Exported {id} to {}", path.display()))
    );
    Ok(())
}

/// Import a consolidated document as a new session.
pub(crate) async fn import_session(ctx: &CliContext, path: &Path) -> Result<()> {
    let id = store(ctx).import(path).await?;
    println!("{}", Theme::success(&format!("Imported session {id}")));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("one\ntwo"), "one");
        assert_eq!(first_line(""), "");
    }
}
