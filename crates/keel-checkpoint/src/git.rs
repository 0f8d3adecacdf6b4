//! Shadow git backend.
//!
//! Snapshots are commits in a private git directory whose work tree is the
//! workspace. The project's own `.git/` is never read or written; it and
//! `.keel/` are excluded through the shadow repository's `info/exclude`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::backend::SnapshotBackend;
use crate::error::{CheckpointError, CheckpointResult};
use crate::record::{RestoreReport, SnapshotHandle};

const EXCLUDES: &str = "/.git/\n/.keel/\n";

/// Snapshot backend driving a shadow git repository.
#[derive(Debug, Clone)]
pub struct GitBackend {
    workspace_root: PathBuf,
    git_dir: PathBuf,
}

impl GitBackend {
    /// Create a backend for `workspace_root` with its repository at `git_dir`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>, git_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            git_dir: git_dir.into(),
        }
    }

    /// The shadow repository directory.
    #[must_use]
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    async fn run(&self, args: &[&str]) -> CheckpointResult<String> {
        let output = Command::new("git")
            .arg(format!("--git-dir={}", self.git_dir.display()))
            .arg(format!("--work-tree={}", self.workspace_root.display()))
            .args([
                "-c",
                "user.name=Keel",
                "-c",
                "user.email=keel@localhost",
                "-c",
                "commit.gpgsign=false",
                "-c",
                "core.autocrlf=false",
            ])
            .args(args)
            .current_dir(&self.workspace_root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| CheckpointError::Git {
                command: args.join(" "),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CheckpointError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn ensure_repo(&self) -> CheckpointResult<()> {
        if self.git_dir.join("HEAD").exists() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.git_dir)
            .await
            .map_err(|e| CheckpointError::io(&self.git_dir, e))?;
        self.run(&["init", "--quiet"]).await?;

        let info = self.git_dir.join("info");
        tokio::fs::create_dir_all(&info)
            .await
            .map_err(|e| CheckpointError::io(&info, e))?;
        let mut excludes = EXCLUDES.to_string();
        if let Ok(rel) = self.git_dir.strip_prefix(&self.workspace_root) {
            excludes.push_str(&format!("/{}/\n", rel.display()));
        }
        let exclude = info.join("exclude");
        tokio::fs::write(&exclude, excludes)
            .await
            .map_err(|e| CheckpointError::io(&exclude, e))?;

        debug!(git_dir = %self.git_dir.display(), "Shadow repository initialized");
        Ok(())
    }
}

#[async_trait]
impl SnapshotBackend for GitBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn snapshot(&self, label: &str) -> CheckpointResult<SnapshotHandle> {
        self.ensure_repo().await?;
        self.run(&["add", "--all", "."]).await?;
        let message = if label.is_empty() { "keel checkpoint" } else { label };
        self.run(&["commit", "--quiet", "--allow-empty", "--no-verify", "-m", message])
            .await?;
        let commit = self.run(&["rev-parse", "HEAD"]).await?;
        debug!(commit = %commit, label, "Shadow commit created");
        Ok(SnapshotHandle::new(commit))
    }

    async fn restore(&self, handle: &SnapshotHandle) -> CheckpointResult<RestoreReport> {
        let commit = handle.as_str();
        if commit.starts_with('-') || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CheckpointError::NotFound(handle.to_string()));
        }
        let object = format!("{commit}^{{commit}}");
        if self.run(&["cat-file", "-e", &object]).await.is_err() {
            return Err(CheckpointError::NotFound(handle.to_string()));
        }

        // Stage the current tree so the diff against the commit names every
        // file the restore will touch. This only changes the shadow index.
        self.run(&["add", "--all", "."]).await?;
        let diff = self
            .run(&["diff", "--cached", "--name-status", "--no-renames", commit])
            .await?;
        let mut report = RestoreReport::default();
        for line in diff.lines() {
            if line.starts_with('A') {
                report.removed = report.removed.saturating_add(1);
            } else if !line.trim().is_empty() {
                report.restored = report.restored.saturating_add(1);
            }
        }

        let partial = |e: CheckpointError| CheckpointError::PartialRestore {
            checkpoint: handle.to_string(),
            written: report.restored.saturating_add(report.removed),
            path: self.workspace_root.display().to_string(),
            reason: e.to_string(),
        };
        self.run(&["read-tree", "--reset", "-u", commit])
            .await
            .map_err(partial)?;
        self.run(&["clean", "-f", "-d", "-q"]).await.map_err(partial)?;

        info!(
            commit = %handle.short(),
            restored = report.restored,
            removed = report.removed,
            "Workspace restored from shadow commit"
        );
        Ok(report)
    }
}
