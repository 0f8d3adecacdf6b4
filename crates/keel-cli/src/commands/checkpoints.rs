//! Checkpoint commands - list and restore a session's checkpoints.

use anyhow::{Context, Result};
use colored::Colorize;
use keel_approval::NoConfirmation;
use keel_checkpoint::CheckpointId;
use keel_core::SessionId;
use keel_runtime::{SessionRuntime, ToolRegistry, open_checkpoints};
use std::path::PathBuf;
use std::sync::Arc;

use crate::CliContext;
use crate::theme::Theme;

fn workspace_root(ctx: &CliContext) -> Result<PathBuf> {
    ctx.workspace
        .canonicalize()
        .with_context(|| format!("workspace {} does not exist", ctx.workspace.display()))
}

/// List a session's checkpoints, oldest first.
pub(crate) async fn list_checkpoints(ctx: &CliContext, session: &str) -> Result<()> {
    let workspace = workspace_root(ctx)?;
    let manager = open_checkpoints(
        &ctx.resolved.config.checkpoints,
        &ctx.home,
        &workspace,
        &SessionId::from_raw(session),
    )
    .await?;
    let records = manager.list().await;

    if records.is_empty() {
        println!("{}", Theme::info("No checkpoints for this session"));
        return Ok(());
    }

    println!("\n{} {}", Theme::header("Checkpoints"), Theme::id(session));
    println!(
        "{:<38} {:>6} {:<10} {:<8} {}",
        "ID".dimmed(),
        "POS".dimmed(),
        "BACKEND".dimmed(),
        "STATUS".dimmed(),
        "CREATED".dimmed()
    );
    println!("{}", Theme::separator());
    for record in records {
        let status = if record.is_active() {
            record.status.to_string().green()
        } else {
            record.status.to_string().dimmed()
        };
        println!(
            "{:<38} {:>6} {:<10} {:<8} {}",
            Theme::id(record.id.as_str()),
            record.position,
            record.backend,
            status,
            record.created_at
        );
    }
    println!();
    Ok(())
}

/// Roll the workspace back to `checkpoint` and record the restoration.
///
/// Opens the session for writing, so it fails while another process holds
/// the session.
pub(crate) async fn restore_checkpoint(
    ctx: &CliContext,
    session: &str,
    checkpoint: &str,
) -> Result<()> {
    let runtime = SessionRuntime::open(
        &ctx.resolved.config,
        &ctx.home,
        &ctx.workspace,
        SessionId::from_raw(session),
    )
    .await?;

    let controller = runtime.controller(ToolRegistry::new(), Arc::new(NoConfirmation))?;
    let outcome = controller
        .restore_checkpoint(&CheckpointId::from_raw(checkpoint))
        .await;
    drop(controller);
    runtime.close().await?;
    let outcome = outcome?;

    println!(
        "{}",
        Theme::success(&format!(
            "Restored {checkpoint}: {} rewritten, {} removed, {} unchanged",
            outcome.report.restored, outcome.report.removed, outcome.report.unchanged
        ))
    );
    if !outcome.invalidated.is_empty() {
        println!(
            "{}",
            Theme::warning(&format!(
                "{} later checkpoint(s) marked stale",
                outcome.invalidated.len()
            ))
        );
    }
    Ok(())
}
