//! The tool-call scheduler.
//!
//! A batch of proposed calls goes through, per call:
//!
//! ```text
//! Validating ─► Scheduled ─► [AwaitingApproval] ─► Executing ─► terminal
//! ```
//!
//! Validation runs for the whole batch first. Valid calls are partitioned
//! (see [`crate::partition`]): the independent set is driven concurrently,
//! the conflicting set strictly one call at a time in proposal order, and
//! the two sets make progress side by side.
//!
//! Execution is gated by a reader/writer lock. Shell-state and destructive
//! calls take the write side, so nothing else executes while they run; they
//! also take their checkpoint while holding it. Every other call takes the
//! read side. Approval happens before the gate, so a call waiting on a human
//! holds nothing.
//!
//! Checkpoint and tool-call entries are queued on the recorder when a call
//! finishes, after the gate is released, and the scheduler never waits for
//! them to reach the disk.

use dashmap::DashMap;
use keel_approval::{
    ApprovalDecision, ConfirmationHandler, ConfirmationOutcome, NoConfirmation, PolicyStore,
    ToolEntry, decide,
};
use keel_checkpoint::{CheckpointId, CheckpointManager};
use keel_core::{
    SessionId, Timestamp, ToolCallId, ToolCallRequest, ToolCallState, truncate_output,
};
use keel_events::EventBus;
use keel_session::{
    CheckpointAction, CheckpointEntry, EntryKind, SessionRecorder, ToolCallEntry, TransitionStamp,
};
use keel_telemetry::RequestContext;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::either::Either;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::RuntimeResult;
use crate::partition::{CallFootprint, partition};
use crate::tool::{RegisteredTool, ToolError, ToolRegistry};
use crate::tracker::CallTracker;

/// Default bound on concurrently executing calls.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Default output limit in bytes.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 200_000;

/// Dispatch limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on calls in `Executing` at once.
    pub max_concurrency: usize,
    /// Output beyond this many bytes is truncated (0 disables).
    pub max_output_chars: usize,
    /// Per-call execution timeout.
    pub tool_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            tool_timeout: None,
        }
    }
}

/// The terminal result of one call, returned to the turn controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutcome {
    /// Call identifier.
    pub call_id: ToolCallId,
    /// Tool name.
    pub tool_name: String,
    /// Terminal state.
    pub state: ToolCallState,
    /// Tool output, present on success.
    pub output: Option<String>,
    /// Approval decision, absent if validation failed.
    pub decision: Option<ApprovalDecision>,
    /// Confirmation answer, if one was requested.
    pub confirmation: Option<ConfirmationOutcome>,
    /// Checkpoint covering this call, if it needed one.
    pub checkpoint_id: Option<CheckpointId>,
    /// Every state the call entered.
    pub transitions: Vec<TransitionStamp>,
    /// Correlation context of the call, a child of its batch.
    pub context: RequestContext,
}

impl ToolCallOutcome {
    /// Whether the call succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == ToolCallState::Succeeded
    }

    /// The text handed back to the model: the output on success, the
    /// terminal reason otherwise.
    #[must_use]
    pub fn result_text(&self) -> String {
        match &self.output {
            Some(output) if self.is_success() => output.clone(),
            _ => self.state.to_string(),
        }
    }

    /// Time the call entered the state with `label`.
    #[must_use]
    pub fn entered_at(&self, label: &str) -> Option<Timestamp> {
        self.transitions
            .iter()
            .find(|t| t.state == label)
            .map(|t| t.at)
    }

    fn to_entry(&self, request: &ToolCallRequest) -> ToolCallEntry {
        let mut entry = ToolCallEntry::for_request(request, self.state.clone());
        entry.decision.clone_from(&self.decision);
        entry.confirmation.clone_from(&self.confirmation);
        entry.result.clone_from(&self.output);
        entry.checkpoint_id = self.checkpoint_id.as_ref().map(ToString::to_string);
        entry.transitions.clone_from(&self.transitions);
        entry
    }
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    session_id: SessionId,
    registry: ToolRegistry,
    policy: Arc<PolicyStore>,
    confirmations: Arc<dyn ConfirmationHandler>,
    checkpoints: Option<Arc<CheckpointManager>>,
    recorder: Option<Arc<SessionRecorder>>,
    events: Option<EventBus>,
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    /// Answer confirmation prompts with `handler`. Without one, every prompt
    /// is rejected.
    #[must_use]
    pub fn with_confirmations(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmations = handler;
        self
    }

    /// Take checkpoints through `manager`. Without one, calls that need a
    /// checkpoint fail.
    #[must_use]
    pub fn with_checkpoints(mut self, manager: Arc<CheckpointManager>) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    /// Write tool-call and checkpoint entries to `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<SessionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Publish state transitions on `bus`.
    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Override dispatch limits.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy store is unreadable.
    pub fn build(self) -> RuntimeResult<Scheduler> {
        let workspace_root = self
            .policy
            .snapshot()?
            .plan_scope
            .workspace_root()
            .to_path_buf();
        let mut tracker = CallTracker::new(self.session_id.clone());
        if let Some(bus) = self.events {
            tracker = tracker.with_event_bus(bus);
        }

        Ok(Scheduler {
            inner: Arc::new(Inner {
                session_id: self.session_id,
                registry: self.registry,
                policy: self.policy,
                confirmations: self.confirmations,
                checkpoints: self.checkpoints,
                recorder: self.recorder,
                tracker,
                workspace_root,
                gate: RwLock::new(()),
                permits: Semaphore::new(self.config.max_concurrency.max(1)),
                active: DashMap::new(),
                config: self.config,
            }),
        })
    }
}

/// Drives batches of tool calls for one session.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("session_id", &self.inner.session_id)
            .field("tools", &self.inner.registry.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Start building a scheduler.
    #[must_use]
    pub fn builder(
        session_id: SessionId,
        registry: ToolRegistry,
        policy: Arc<PolicyStore>,
    ) -> SchedulerBuilder {
        SchedulerBuilder {
            session_id,
            registry,
            policy,
            confirmations: Arc::new(NoConfirmation),
            checkpoints: None,
            recorder: None,
            events: None,
            config: SchedulerConfig::default(),
        }
    }

    /// Run a batch to completion.
    ///
    /// Returns one outcome per request, in proposal order. Cancelling
    /// `batch_token` cancels every call of the batch that has not finished.
    pub async fn run_batch(
        &self,
        requests: &[ToolCallRequest],
        batch_token: &CancellationToken,
    ) -> Vec<ToolCallOutcome> {
        let batch = RequestContext::new("scheduler")
            .with_session_id(self.inner.session_id.clone())
            .with_operation("run_batch");
        self.drive_batch(requests, batch_token, batch).await
    }

    /// Run a batch as part of a larger unit of work.
    ///
    /// The batch context is a child of `parent`, and every call's context
    /// is a child of the batch.
    pub async fn run_batch_in(
        &self,
        requests: &[ToolCallRequest],
        batch_token: &CancellationToken,
        parent: &RequestContext,
    ) -> Vec<ToolCallOutcome> {
        let batch = parent
            .child("scheduler")
            .with_session_id(self.inner.session_id.clone())
            .with_operation("run_batch");
        self.drive_batch(requests, batch_token, batch).await
    }

    async fn drive_batch(
        &self,
        requests: &[ToolCallRequest],
        batch_token: &CancellationToken,
        batch: RequestContext,
    ) -> Vec<ToolCallOutcome> {
        let span = batch.span();
        let outcomes = self
            .inner
            .run_batch(requests, batch_token, &batch)
            .instrument(span)
            .await;
        debug!(
            request_id = %batch.short_id(),
            calls = requests.len(),
            elapsed_ms = batch.elapsed_ms(),
            "Batch finished"
        );
        outcomes
    }

    /// Cancel one in-flight call. Siblings are unaffected.
    ///
    /// Returns `false` if the call is not in flight.
    pub fn cancel_call(&self, call_id: &ToolCallId) -> bool {
        match self.inner.active.get(call_id) {
            Some(token) => {
                token.cancel();
                true
            },
            None => false,
        }
    }

    /// Current state of a call.
    #[must_use]
    pub fn call_state(&self, call_id: &ToolCallId) -> Option<ToolCallState> {
        self.inner.tracker.state(call_id)
    }

    /// The call tracker.
    #[must_use]
    pub fn tracker(&self) -> &CallTracker {
        &self.inner.tracker
    }

    /// The tool registry.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    /// The policy store.
    #[must_use]
    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.inner.policy
    }

    /// Session being driven.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }
}

struct Inner {
    session_id: SessionId,
    registry: ToolRegistry,
    policy: Arc<PolicyStore>,
    confirmations: Arc<dyn ConfirmationHandler>,
    checkpoints: Option<Arc<CheckpointManager>>,
    recorder: Option<Arc<SessionRecorder>>,
    tracker: CallTracker,
    workspace_root: PathBuf,
    gate: RwLock<()>,
    permits: Semaphore,
    active: DashMap<ToolCallId, CancellationToken>,
    config: SchedulerConfig,
}

struct PreparedCall<'a> {
    index: usize,
    request: &'a ToolCallRequest,
    entry: &'a RegisteredTool,
    targets: Vec<PathBuf>,
    token: CancellationToken,
    context: RequestContext,
}

/// What a call accumulated on its way to a terminal state.
#[derive(Debug, Default)]
struct CallRun {
    decision: Option<ApprovalDecision>,
    confirmation: Option<ConfirmationOutcome>,
    checkpoint_id: Option<CheckpointId>,
    // Recorded with the call's entry, once the gate is released.
    checkpoint_entry: Option<EntryKind>,
    output: Option<String>,
}

enum Interrupt {
    Cancelled,
    TimedOut,
    Failed(String),
}

impl Inner {
    async fn run_batch(
        &self,
        requests: &[ToolCallRequest],
        batch_token: &CancellationToken,
        batch: &RequestContext,
    ) -> Vec<ToolCallOutcome> {
        let mut slots: Vec<Option<ToolCallOutcome>> = vec![None; requests.len()];
        let mut prepared = Vec::with_capacity(requests.len());
        let mut seen = HashSet::new();

        for (index, request) in requests.iter().enumerate() {
            let context = batch.child("tool_call").with_operation(request.tool_name());
            if !seen.insert(request.id()) || self.tracker.state(request.id()).is_some() {
                warn!(call_id = %request.id(), "Duplicate call id");
                let outcome = duplicate_outcome(request, context);
                self.record(EntryKind::ToolCall(outcome.to_entry(request)))
                    .await;
                slots[index] = Some(outcome);
                continue;
            }
            match self.prepare(index, request, batch_token, &context) {
                Ok(call) => prepared.push(call),
                Err(state) => {
                    slots[index] =
                        Some(self.finish(request, CallRun::default(), state, context).await);
                },
            }
        }

        let footprints: Vec<CallFootprint<'_>> = prepared
            .iter()
            .map(|c| CallFootprint {
                class: c.entry.mutation_class(),
                targets: c.targets.clone(),
            })
            .collect();
        let split = partition(&self.workspace_root, &footprints);

        let mut calls: Vec<Option<PreparedCall<'_>>> = prepared.into_iter().map(Some).collect();
        let independent: Vec<PreparedCall<'_>> = split
            .independent
            .iter()
            .filter_map(|&i| calls[i].take())
            .collect();
        let conflicting: Vec<PreparedCall<'_>> = split
            .conflicting
            .iter()
            .filter_map(|&i| calls[i].take())
            .collect();

        let concurrent = futures::future::join_all(independent.into_iter().map(|c| self.drive(c)));
        let sequential = async {
            let mut done = Vec::with_capacity(conflicting.len());
            for call in conflicting {
                done.push(self.drive(call).await);
            }
            done
        };
        let (concurrent, sequential) = tokio::join!(concurrent, sequential);

        for (index, outcome) in concurrent.into_iter().chain(sequential) {
            slots[index] = Some(outcome);
        }
        slots.into_iter().flatten().collect()
    }

    fn prepare<'a>(
        &'a self,
        index: usize,
        request: &'a ToolCallRequest,
        batch_token: &CancellationToken,
        context: &RequestContext,
    ) -> Result<PreparedCall<'a>, ToolCallState> {
        self.tracker.begin(request);
        let Some(entry) = self.registry.get(request.tool_name()) else {
            return Err(ToolCallState::Failed {
                error: format!("unknown tool '{}'", request.tool_name()),
            });
        };
        if let Err(violation) = entry.schema().validate(request.arguments()) {
            return Err(ToolCallState::Failed {
                error: format!("invalid arguments: {violation}"),
            });
        }

        self.tracker
            .transition(request.id(), ToolCallState::Scheduled);
        let token = batch_token.child_token();
        self.active.insert(request.id().clone(), token.clone());

        Ok(PreparedCall {
            index,
            request,
            entry,
            targets: entry.mutation_class().target_paths(request.arguments()),
            token,
            context: context.clone(),
        })
    }

    async fn drive(&self, call: PreparedCall<'_>) -> (usize, ToolCallOutcome) {
        let span = info_span!(
            "tool_call",
            call_id = %call.request.id(),
            tool = call.request.tool_name(),
            request_id = %call.context.short_id(),
        );
        async move {
            let mut run = CallRun::default();
            let state = self
                .advance(call.request, call.entry, &call.token, &mut run)
                .await;
            let outcome = self.finish(call.request, run, state, call.context).await;
            (call.index, outcome)
        }
        .instrument(span)
        .await
    }

    async fn advance(
        &self,
        request: &ToolCallRequest,
        entry: &RegisteredTool,
        token: &CancellationToken,
        run: &mut CallRun,
    ) -> ToolCallState {
        if token.is_cancelled() {
            return cancelled("cancelled before dispatch");
        }

        let policy = match self.policy.snapshot() {
            Ok(policy) => policy,
            Err(e) => {
                return ToolCallState::Failed {
                    error: format!("approval policy unavailable: {e}"),
                };
            },
        };
        let preview = entry.tool().preview(request.arguments());
        let decision = decide(
            request,
            &policy,
            Some(ToolEntry {
                mutation_class: entry.mutation_class(),
                preview: preview.as_deref(),
            }),
        );
        drop(policy);
        run.decision = Some(decision.clone());

        match decision {
            ApprovalDecision::Deny { reason, .. } => return ToolCallState::Denied { reason },
            ApprovalDecision::NeedsConfirmation { prompt, .. } => {
                self.tracker
                    .transition(request.id(), ToolCallState::AwaitingApproval);
                let answer = if self.confirmations.is_available() {
                    match token
                        .run_until_cancelled(self.confirmations.confirm(request, &prompt))
                        .await
                    {
                        Some(answer) => answer,
                        None => return cancelled("cancelled while awaiting approval"),
                    }
                } else {
                    ConfirmationOutcome::reject(format!(
                        "no confirmation handler attached for '{}'",
                        prompt.tool_name
                    ))
                };
                run.confirmation = Some(answer.clone());

                match answer {
                    ConfirmationOutcome::Approve => {},
                    ConfirmationOutcome::ApproveAlways => {
                        if let Err(e) = self.policy.allow_for_session(request.tool_name()) {
                            warn!(error = %e, "Could not remember approve-always answer");
                        }
                    },
                    ConfirmationOutcome::Reject { reason } => {
                        return ToolCallState::Cancelled {
                            reason: format!("rejected at confirmation: {reason}"),
                        };
                    },
                }
            },
            ApprovalDecision::Allow { .. } => {},
        }

        let class = entry.mutation_class();
        let guard = token
            .run_until_cancelled(async {
                if class.is_globally_serialized() {
                    Either::Right(self.gate.write().await)
                } else {
                    Either::Left(self.gate.read().await)
                }
            })
            .await;
        let Some(_guard) = guard else {
            return cancelled("cancelled while waiting to execute");
        };

        if class.requires_checkpoint() {
            match self.checkpoint(request, run).await {
                Ok(id) => run.checkpoint_id = Some(id),
                Err(error) => return ToolCallState::Failed { error },
            }
        }

        let _permit = match token.run_until_cancelled(self.permits.acquire()).await {
            Some(Ok(permit)) => permit,
            Some(Err(_)) => {
                return ToolCallState::Failed {
                    error: "scheduler is shut down".into(),
                };
            },
            None => return cancelled("cancelled while waiting to execute"),
        };

        self.tracker
            .transition(request.id(), ToolCallState::Executing);
        let result = self.execute(entry, request, token).await;

        if !class.is_read_only()
            && let Some(manager) = &self.checkpoints
        {
            manager.note_mutation().await;
        }

        let limit = self.config.max_output_chars;
        match result {
            Ok(output) => {
                run.output = Some(truncate_output(output, limit));
                ToolCallState::Succeeded
            },
            Err(Interrupt::Cancelled) => cancelled("cancelled"),
            Err(Interrupt::TimedOut) => cancelled("timed out"),
            Err(Interrupt::Failed(error)) => ToolCallState::Failed {
                error: truncate_output(error, limit),
            },
        }
    }

    async fn execute(
        &self,
        entry: &RegisteredTool,
        request: &ToolCallRequest,
        token: &CancellationToken,
    ) -> Result<String, Interrupt> {
        let tool = Arc::clone(entry.tool());
        let arguments = request.arguments().clone();
        let task_token = token.clone();
        let mut handle =
            AbortOnDropHandle::new(tokio::spawn(async move {
                tool.execute(arguments, task_token).await
            }));

        let timeout = self.config.tool_timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(ToolError::Cancelled)) => Err(Interrupt::Cancelled),
                Ok(Err(e)) => Err(Interrupt::Failed(e.to_string())),
                Err(e) => Err(Interrupt::Failed(format!("tool task failed: {e}"))),
            },
            () = token.cancelled() => Err(Interrupt::Cancelled),
            () = deadline => {
                token.cancel();
                warn!(timeout = ?timeout, "Tool call timed out");
                Err(Interrupt::TimedOut)
            },
        }
    }

    async fn checkpoint(
        &self,
        request: &ToolCallRequest,
        run: &mut CallRun,
    ) -> Result<CheckpointId, String> {
        let Some(manager) = &self.checkpoints else {
            return Err("checkpoint failed: no checkpoint manager is configured".into());
        };
        let position = self.recorder.as_ref().map_or(0, |r| r.position());

        match manager.ensure_checkpoint(position, Some(request.id())).await {
            Ok(ensured) => {
                let record = ensured.record;
                if ensured.created {
                    run.checkpoint_entry = Some(EntryKind::Checkpoint(CheckpointEntry {
                        action: CheckpointAction::Created,
                        checkpoint_id: record.id.to_string(),
                        backend: record.backend.clone(),
                        position: record.position,
                        call_id: record.call_id.clone(),
                        invalidated: Vec::new(),
                    }));
                }
                Ok(record.id)
            },
            Err(e) => {
                error!(error = %e, "Checkpoint before mutation failed");
                Err(format!("checkpoint failed: {e}"))
            },
        }
    }

    async fn finish(
        &self,
        request: &ToolCallRequest,
        run: CallRun,
        state: ToolCallState,
        context: RequestContext,
    ) -> ToolCallOutcome {
        self.tracker.transition(request.id(), state.clone());
        self.active.remove(request.id());

        let outcome = ToolCallOutcome {
            call_id: request.id().clone(),
            tool_name: request.tool_name().to_string(),
            state,
            output: run.output,
            decision: run.decision,
            confirmation: run.confirmation,
            checkpoint_id: run.checkpoint_id,
            transitions: self.tracker.transitions(request.id()),
            context,
        };
        info!(
            call_id = %outcome.call_id,
            tool = %outcome.tool_name,
            state = %outcome.state,
            elapsed_ms = outcome.context.elapsed_ms(),
            "Tool call finished"
        );
        if let Some(entry) = run.checkpoint_entry {
            self.record(entry).await;
        }
        self.record(EntryKind::ToolCall(outcome.to_entry(request)))
            .await;
        outcome
    }

    /// Queues `kind` without waiting for the disk. Storage failures never
    /// change a call's outcome; the recorder marks the session incomplete
    /// and writes a gap marker later.
    async fn record(&self, kind: EntryKind) {
        if let Some(recorder) = &self.recorder
            && let Err(e) = recorder.submit(kind).await
        {
            warn!(session_id = %self.session_id, error = %e, "Session record write failed");
        }
    }
}

fn cancelled(reason: &str) -> ToolCallState {
    ToolCallState::Cancelled {
        reason: reason.to_string(),
    }
}

fn duplicate_outcome(request: &ToolCallRequest, context: RequestContext) -> ToolCallOutcome {
    let state = ToolCallState::Failed {
        error: format!("duplicate call id '{}'", request.id()),
    };
    ToolCallOutcome {
        call_id: request.id().clone(),
        tool_name: request.tool_name().to_string(),
        transitions: vec![TransitionStamp {
            state: state.label().to_string(),
            at: Timestamp::now(),
        }],
        state,
        output: None,
        decision: None,
        confirmation: None,
        checkpoint_id: None,
        context,
    }
}
