//! Configuration types for Keel.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header produces a working
//! configuration. Modes and backends are kept as strings here and parsed into
//! domain types by the crates that own them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use keel_core::dirs::KeelHome;
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trust mode and tool lists.
    pub approval: ApprovalSection,
    /// Dispatch limits.
    pub scheduler: SchedulerSection,
    /// Snapshot backend and store location.
    pub checkpoints: CheckpointsSection,
    /// Session record storage.
    pub sessions: SessionsSection,
    /// Logging level, format and per-crate directives.
    pub logging: LoggingSection,
}

/// Approval policy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// Trust mode at session start (`default`, `auto-edit`, `yolo`, `plan`).
    pub mode: String,
    /// Plan-mode scratch directory; relative paths resolve against the
    /// workspace root.
    pub plan_scratch_dir: String,
    /// Tools (exact names or globs) that never need confirmation.
    pub allowed_tools: Vec<String>,
    /// Tools (exact names or globs) that are always denied.
    pub excluded_tools: Vec<String>,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            mode: "default".to_owned(),
            plan_scratch_dir: ".keel/tmp/plans".to_owned(),
            allowed_tools: Vec::new(),
            excluded_tools: Vec::new(),
        }
    }
}

impl ApprovalSection {
    /// Absolute plan scratch directory for a workspace.
    #[must_use]
    pub fn plan_scratch_path(&self, workspace_root: &Path) -> PathBuf {
        let configured = Path::new(&self.plan_scratch_dir);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            workspace_root.join(configured)
        }
    }
}

/// Scheduler limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Upper bound on concurrently executing independent calls.
    pub max_concurrency: usize,
    /// Tool output beyond this many bytes is truncated (0 disables).
    pub max_output_chars: usize,
    /// Per-call execution timeout in seconds (0 disables).
    pub tool_timeout_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_output_chars: 200_000,
            tool_timeout_secs: 0,
        }
    }
}

impl SchedulerSection {
    /// The per-call timeout, if enabled.
    #[must_use]
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }
}

/// Checkpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointsSection {
    /// Snapshot backend: `directory` or `git`.
    pub backend: String,
    /// Store directory. Defaults to `~/.keel/checkpoints`.
    pub store_dir: Option<String>,
}

impl Default for CheckpointsSection {
    fn default() -> Self {
        Self {
            backend: "directory".to_owned(),
            store_dir: None,
        }
    }
}

impl CheckpointsSection {
    /// Resolve the store directory against the Keel home.
    #[must_use]
    pub fn resolve_store(&self, home: &KeelHome) -> PathBuf {
        self.store_dir
            .as_ref()
            .map_or_else(|| home.checkpoints_dir(), PathBuf::from)
    }
}

/// Session record storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    /// Storage root. Defaults to `~/.keel/sessions`.
    pub storage_root: Option<String>,
    /// On-disk format: `jsonl` (incremental) or `json` (consolidated).
    pub format: String,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            storage_root: None,
            format: "jsonl".to_owned(),
        }
    }
}

impl SessionsSection {
    /// Resolve the storage root against the Keel home.
    #[must_use]
    pub fn resolve_root(&self, home: &KeelHome) -> PathBuf {
        self.storage_root
            .as_ref()
            .map_or_else(|| home.sessions_dir(), PathBuf::from)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level filter.
    pub level: String,
    /// Output format: `pretty`, `compact` or `json`.
    pub format: String,
    /// Per-target directive overrides.
    pub directives: Vec<String>,
    /// When set, log to daily-rotated files in this directory.
    pub directory: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_section_uses_defaults() {
        let config: Config = toml::from_str("[scheduler]\n").unwrap();
        assert_eq!(config.scheduler.max_concurrency, 8);
        assert_eq!(config.approval.mode, "default");
    }

    #[test]
    fn test_plan_scratch_path_relative_and_absolute() {
        let mut approval = ApprovalSection::default();
        assert_eq!(
            approval.plan_scratch_path(Path::new("/ws")),
            PathBuf::from("/ws/.keel/tmp/plans")
        );

        approval.plan_scratch_dir = "/scratch".to_owned();
        assert_eq!(
            approval.plan_scratch_path(Path::new("/ws")),
            PathBuf::from("/scratch")
        );
    }

    #[test]
    fn test_tool_timeout_zero_disables() {
        let mut scheduler = SchedulerSection::default();
        assert!(scheduler.tool_timeout().is_none());
        scheduler.tool_timeout_secs = 30;
        assert_eq!(scheduler.tool_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_storage_roots_fall_back_to_home() {
        let home = KeelHome::from_path("/h");
        assert_eq!(
            SessionsSection::default().resolve_root(&home),
            PathBuf::from("/h/sessions")
        );
        assert_eq!(
            CheckpointsSection::default().resolve_store(&home),
            PathBuf::from("/h/checkpoints")
        );
    }
}
