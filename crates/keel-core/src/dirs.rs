//! Directory layout for Keel home and workspace directories.
//!
//! - [`KeelHome`]: Global state at `~/.keel/` (or `$KEEL_HOME`).
//! - [`WorkspaceDir`]: Per-project directory at `<project>/.keel/`.
//!
//! # Layout
//!
//! ```text
//! ~/.keel/                        (KeelHome)
//! ├── logs/                         (runtime log files)
//! ├── sessions/                     (session records, one per session id)
//! ├── checkpoints/                  (snapshot store + checkpoint log)
//! └── config.toml                   (user config)
//!
//! <project>/.keel/                (WorkspaceDir)
//! ├── config.toml                   (workspace config, may only tighten)
//! └── tmp/plans/                    (plan-mode scratch scope)
//! ```

use std::io;
use std::path::{Path, PathBuf};

/// Environment variable overriding the home directory.
pub const KEEL_HOME_ENV: &str = "KEEL_HOME";

/// Global Keel home directory (`~/.keel/` or `$KEEL_HOME`).
#[derive(Debug, Clone)]
pub struct KeelHome {
    root: PathBuf,
}

impl KeelHome {
    /// Resolve the home directory.
    ///
    /// Checks `$KEEL_HOME` first, then falls back to `<home>/.keel/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `$KEEL_HOME` is relative, or if no home directory
    /// can be determined.
    pub fn resolve() -> io::Result<Self> {
        let root = if let Ok(custom) = std::env::var(KEEL_HOME_ENV) {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "KEEL_HOME must be an absolute path",
                ));
            }
            p
        } else {
            let base = directories::BaseDirs::new().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "neither KEEL_HOME nor a user home directory is available",
                )
            })?;
            base.home_dir().join(".keel")
        };

        Ok(Self { root })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure the directory structure exists with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or permission setting fails.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.sessions_dir())?;
        std::fs::create_dir_all(self.checkpoints_dir())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(self.root(), perms.clone())?;
            std::fs::set_permissions(self.logs_dir(), perms.clone())?;
            std::fs::set_permissions(self.sessions_dir(), perms.clone())?;
            std::fs::set_permissions(self.checkpoints_dir(), perms)?;
        }
        Ok(())
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Logs directory (`~/.keel/logs/`).
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Sessions directory (`~/.keel/sessions/`).
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Checkpoint store directory (`~/.keel/checkpoints/`).
    #[must_use]
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    /// Path to the user configuration file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }
}

/// Per-project workspace directory (`<project>/.keel/`).
#[derive(Debug, Clone)]
pub struct WorkspaceDir {
    /// The project root (parent of `.keel/`).
    project_root: PathBuf,
}

impl WorkspaceDir {
    /// Detect the workspace directory by walking up from `start_dir`.
    ///
    /// Detection order:
    /// 1. Directory containing `.keel/`
    /// 2. Directory containing `.git`
    /// 3. Fallback to `start_dir` itself
    #[must_use]
    pub fn detect(start_dir: &Path) -> Self {
        let start = if start_dir.is_absolute() {
            start_dir.to_path_buf()
        } else {
            std::env::current_dir().unwrap_or_default().join(start_dir)
        };

        let mut current = start.as_path();
        loop {
            if current.join(".keel").is_dir() || current.join(".git").exists() {
                return Self {
                    project_root: current.to_path_buf(),
                };
            }
            match current.parent() {
                Some(parent) if parent != current => current = parent,
                _ => break,
            }
        }

        Self {
            project_root: start,
        }
    }

    /// Create from an explicit project root (useful for testing).
    #[must_use]
    pub fn from_path(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// Project root directory (parent of `.keel/`).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.project_root
    }

    /// The `.keel/` directory itself.
    #[must_use]
    pub fn dot_keel(&self) -> PathBuf {
        self.project_root.join(".keel")
    }

    /// Path to the workspace configuration file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.dot_keel().join("config.toml")
    }

    /// Default plan-mode scratch scope (`.keel/tmp/plans/`).
    #[must_use]
    pub fn default_plan_scratch(&self) -> PathBuf {
        self.dot_keel().join("tmp").join("plans")
    }
}
