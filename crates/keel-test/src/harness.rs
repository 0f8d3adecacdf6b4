//! A temporary workspace with its own Keel home.

use keel_approval::ConfirmationHandler;
use keel_config::Config;
use keel_core::SessionId;
use keel_core::dirs::KeelHome;
use keel_runtime::{RuntimeResult, SessionRuntime, Tool, ToolRegistry, TurnController};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Once;
use tempfile::TempDir;

static LOGGING: Once = Once::new();

/// Install a test-writer subscriber once per process, filtered by `RUST_LOG`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A workspace directory and Keel home inside one temporary directory.
///
/// Everything is removed when the value is dropped.
#[derive(Debug)]
pub struct TestWorkspace {
    dir: TempDir,
    workspace: PathBuf,
    home: KeelHome,
    /// Configuration used by [`TestWorkspace::open_session`].
    pub config: Config,
}

impl TestWorkspace {
    /// Create an empty workspace with default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace).expect("create workspace");
        let workspace = workspace.canonicalize().expect("canonicalize workspace");
        let home = KeelHome::from_path(dir.path().join("home"));
        Self {
            dir,
            workspace,
            home,
            config: Config::default(),
        }
    }

    /// Set the approval mode by name.
    #[must_use]
    pub fn with_mode(mut self, mode: &str) -> Self {
        self.config.approval.mode = mode.to_string();
        self
    }

    /// Canonical workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.workspace
    }

    /// Keel home.
    #[must_use]
    pub fn home(&self) -> &KeelHome {
        &self.home
    }

    /// The temporary directory holding both.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the workspace root, creating parents.
    ///
    /// # Panics
    ///
    /// Panics on IO failure.
    #[allow(clippy::expect_used)]
    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.workspace.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, contents).expect("write file");
    }

    /// Read a workspace file, or `None` if it does not exist.
    #[must_use]
    pub fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.workspace.join(relative)).ok()
    }

    /// Build a registry from mock or real tools.
    ///
    /// # Panics
    ///
    /// Panics if a tool fails registration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn registry<T, I>(&self, tools: I) -> ToolRegistry
    where
        T: Tool + 'static,
        I: IntoIterator<Item = T>,
    {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(Arc::new(tool)).expect("register tool");
        }
        registry
    }

    /// Open a session runtime for this workspace.
    ///
    /// # Errors
    ///
    /// Propagates [`SessionRuntime::open`] errors.
    pub async fn open_session(&self, session_id: &str) -> RuntimeResult<SessionRuntime> {
        SessionRuntime::open(
            &self.config,
            &self.home,
            &self.workspace,
            SessionId::from_raw(session_id),
        )
        .await
    }

    /// Open a session and build a controller over `registry` in one step.
    ///
    /// # Errors
    ///
    /// Propagates session and controller construction errors.
    pub async fn open_controller(
        &self,
        session_id: &str,
        registry: ToolRegistry,
        confirmations: Arc<dyn ConfirmationHandler>,
    ) -> RuntimeResult<(SessionRuntime, TurnController)> {
        let runtime = self.open_session(session_id).await?;
        let controller = runtime.controller(registry, confirmations)?;
        Ok((runtime, controller))
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
