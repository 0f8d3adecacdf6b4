//! Assembling a session runtime from resolved configuration.
//!
//! [`SessionRuntime::open`] is the one place configuration turns into live
//! components: the policy store, the session recorder, the checkpoint
//! manager, and the event bus they all publish on.

use keel_approval::{ApprovalMode, ConfirmationHandler, PlanScope, PolicyStore};
use keel_checkpoint::{BackendKind, CheckpointLog, CheckpointManager, workspace_store_dir};
use keel_config::{ApprovalSection, CheckpointsSection, Config, SchedulerSection};
use keel_core::dirs::KeelHome;
use keel_core::{SessionId, Timestamp};
use keel_events::EventBus;
use keel_session::{EntryKind, RecordFormat, RecorderOptions, SessionMetadata, SessionRecorder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::TurnController;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::telemetry::spawn_forwarder;
use crate::tool::ToolRegistry;

impl From<&SchedulerSection> for SchedulerConfig {
    fn from(section: &SchedulerSection) -> Self {
        Self {
            max_concurrency: section.max_concurrency,
            max_output_chars: section.max_output_chars,
            tool_timeout: section.tool_timeout(),
        }
    }
}

/// Build the policy store from the `[approval]` section.
///
/// # Errors
///
/// Returns an error for an unknown mode, a malformed tool pattern, or a
/// scratch directory that carries traversal tricks.
pub fn build_policy(section: &ApprovalSection, workspace_root: &Path) -> RuntimeResult<PolicyStore> {
    let mode: ApprovalMode = section.mode.parse()?;
    let scope = PlanScope::new(workspace_root, section.plan_scratch_path(workspace_root))?;
    Ok(PolicyStore::new(mode, scope)
        .with_denied(section.excluded_tools.iter().cloned())?
        .with_allowed(section.allowed_tools.iter().cloned())?)
}

/// Per-workspace checkpoint store directory.
#[must_use]
pub fn checkpoint_store(section: &CheckpointsSection, home: &KeelHome, workspace_root: &Path) -> PathBuf {
    workspace_store_dir(&section.resolve_store(home), workspace_root)
}

/// Open the checkpoint manager for one session of a workspace.
///
/// # Errors
///
/// Returns an error for an unknown backend, an unusable session id, or an
/// unreadable checkpoint log.
pub async fn open_checkpoints(
    section: &CheckpointsSection,
    home: &KeelHome,
    workspace_root: &Path,
    session_id: &SessionId,
) -> RuntimeResult<CheckpointManager> {
    let kind: BackendKind = section.backend.parse()?;
    let store = checkpoint_store(section, home, workspace_root);
    let backend = kind.build(workspace_root, &store);
    let log = CheckpointLog::new(CheckpointLog::session_path(&store, session_id)?);
    Ok(CheckpointManager::open(session_id.clone(), backend, log).await?)
}

/// The live components of one session.
#[derive(Debug)]
pub struct SessionRuntime {
    session_id: SessionId,
    workspace_root: PathBuf,
    policy: Arc<PolicyStore>,
    recorder: Arc<SessionRecorder>,
    checkpoints: Arc<CheckpointManager>,
    events: EventBus,
    scheduler_config: SchedulerConfig,
    forwarder: JoinHandle<()>,
}

impl SessionRuntime {
    /// Open (or resume) a session in `workspace_root`.
    ///
    /// A new session starts its record with a metadata entry; a resumed one
    /// continues after its last entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace root does not exist, the
    /// configuration names an unknown mode, format or backend, or the
    /// session record cannot be initialized. Recorder initialization failure
    /// is fatal for the session.
    pub async fn open(
        config: &Config,
        home: &KeelHome,
        workspace_root: &Path,
        session_id: SessionId,
    ) -> RuntimeResult<Self> {
        let workspace_root = workspace_root
            .canonicalize()
            .map_err(|source| RuntimeError::Io {
                path: workspace_root.to_path_buf(),
                source,
            })?;

        let events = EventBus::new();
        let forwarder = spawn_forwarder(events.subscribe());

        let policy = Arc::new(build_policy(&config.approval, &workspace_root)?);

        let root = config.sessions.resolve_root(home);
        std::fs::create_dir_all(&root).map_err(|source| RuntimeError::Io {
            path: root.clone(),
            source,
        })?;
        let format: RecordFormat = config.sessions.format.parse()?;
        let recorder = SessionRecorder::initialize(
            RecorderOptions::new(root, session_id.clone())
                .with_format(format)
                .with_event_bus(events.clone()),
        )
        .await?;

        if recorder.position() == 0 {
            recorder
                .append(EntryKind::Metadata(SessionMetadata {
                    session_id: session_id.clone(),
                    started_at: Timestamp::now(),
                    workspace_root: Some(workspace_root.clone()),
                    approval_mode: policy.mode()?.to_string(),
                    extra: BTreeMap::new(),
                }))
                .await?;
        }

        let checkpoints = open_checkpoints(&config.checkpoints, home, &workspace_root, &session_id)
            .await?
            .with_event_bus(events.clone());

        info!(
            session_id = %session_id,
            workspace = %workspace_root.display(),
            mode = %policy.mode()?,
            backend = checkpoints.backend_name(),
            resumed_at = recorder.position(),
            "Session opened"
        );

        Ok(Self {
            session_id,
            workspace_root,
            policy,
            recorder: Arc::new(recorder),
            checkpoints: Arc::new(checkpoints),
            events,
            scheduler_config: SchedulerConfig::from(&config.scheduler),
            forwarder,
        })
    }

    /// Build a turn controller over `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy store is unreadable.
    pub fn controller(
        &self,
        registry: ToolRegistry,
        confirmations: Arc<dyn ConfirmationHandler>,
    ) -> RuntimeResult<TurnController> {
        let scheduler = Scheduler::builder(self.session_id.clone(), registry, Arc::clone(&self.policy))
            .with_confirmations(confirmations)
            .with_checkpoints(Arc::clone(&self.checkpoints))
            .with_recorder(Arc::clone(&self.recorder))
            .with_event_bus(self.events.clone())
            .with_config(self.scheduler_config.clone())
            .build()?;
        Ok(TurnController::new(scheduler)
            .with_recorder(Arc::clone(&self.recorder))
            .with_checkpoints(Arc::clone(&self.checkpoints))
            .with_event_bus(self.events.clone()))
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Canonical workspace root.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// The policy store.
    #[must_use]
    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    /// The session recorder.
    #[must_use]
    pub fn recorder(&self) -> &Arc<SessionRecorder> {
        &self.recorder
    }

    /// The checkpoint manager.
    #[must_use]
    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    /// The event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Drain the record and release the session lock.
    ///
    /// Controllers built from this runtime must be dropped first; otherwise
    /// the record is only flushed and the lock is released when the last
    /// controller goes away.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer task failed.
    pub async fn close(self) -> RuntimeResult<()> {
        let Self {
            session_id,
            recorder,
            forwarder,
            ..
        } = self;
        match Arc::try_unwrap(recorder) {
            Ok(recorder) => recorder.close().await?,
            Err(shared) => {
                warn!(session_id = %session_id, "Recorder still shared at close; flushing only");
                shared.flush().await?;
            },
        }
        forwarder.abort();
        Ok(())
    }
}
