//! Turn controller: the glue between model output, the scheduler, and the
//! session record.

use keel_approval::{ApprovalMode, PolicyStore};
use keel_checkpoint::{CheckpointId, CheckpointManager, RestoreOutcome};
use keel_core::{SessionId, ToolCallId, ToolCallRequest, TurnId};
use keel_events::{EventBus, EventMetadata, KeelEvent};
use keel_session::{CheckpointAction, CheckpointEntry, EntryKind, SessionRecorder};
use keel_telemetry::RequestContext;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

use crate::error::RuntimeResult;
use crate::scheduler::{Scheduler, ToolCallOutcome};

const EVENT_SOURCE: &str = "controller";

/// Token accounting for one model response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input: u64,
    /// Completion tokens.
    pub output: u64,
    /// Prompt tokens served from cache.
    pub cached: u64,
    /// Reasoning tokens.
    pub thoughts: u64,
}

/// A reasoning summary emitted by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thought {
    /// Short subject line.
    pub subject: Option<String>,
    /// Thought text.
    pub description: String,
}

/// Everything one model response produced.
#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    /// Visible assistant text.
    pub text: Option<String>,
    /// Reasoning summaries.
    pub thoughts: Vec<Thought>,
    /// Token accounting.
    pub usage: Option<TokenUsage>,
    /// Proposed tool calls, in proposal order.
    pub tool_calls: Vec<ToolCallRequest>,
}

/// A tool result as handed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    /// The call being answered.
    pub call_id: ToolCallId,
    /// Output on success, terminal reason otherwise.
    pub content: String,
    /// Whether the call did not succeed.
    pub is_error: bool,
}

impl From<&ToolCallOutcome> for ToolResultMessage {
    fn from(outcome: &ToolCallOutcome) -> Self {
        Self {
            call_id: outcome.call_id.clone(),
            content: outcome.result_text(),
            is_error: !outcome.is_success(),
        }
    }
}

/// Feeds model output through the scheduler and records the turn.
///
/// Recording failures never stop a turn: the recorder flags the session as
/// incomplete and the controller carries on.
pub struct TurnController {
    session_id: SessionId,
    scheduler: Scheduler,
    policy: Arc<PolicyStore>,
    recorder: Option<Arc<SessionRecorder>>,
    checkpoints: Option<Arc<CheckpointManager>>,
    events: Option<EventBus>,
    root_token: CancellationToken,
    turn_token: Mutex<CancellationToken>,
}

impl std::fmt::Debug for TurnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnController")
            .field("session_id", &self.session_id)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl TurnController {
    /// Wrap a scheduler.
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        let root_token = CancellationToken::new();
        Self {
            session_id: scheduler.session_id().clone(),
            policy: Arc::clone(scheduler.policy()),
            scheduler,
            recorder: None,
            checkpoints: None,
            events: None,
            turn_token: Mutex::new(root_token.child_token()),
            root_token,
        }
    }

    /// Record turn content to `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<SessionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Restore checkpoints through `manager`.
    #[must_use]
    pub fn with_checkpoints(mut self, manager: Arc<CheckpointManager>) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    /// Publish mode changes on `bus`.
    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// The scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Session being driven.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Record a user message that opens `turn_id`.
    pub async fn record_user_message(&self, turn_id: &TurnId, content: impl Into<String>) {
        self.record(EntryKind::UserMessage {
            turn_id: turn_id.clone(),
            content: content.into(),
        })
        .await;
    }

    /// Record one model response and run its tool calls.
    ///
    /// Returns one result per proposed call, in proposal order.
    pub async fn handle_model_output(
        &self,
        turn_id: &TurnId,
        output: ModelOutput,
    ) -> Vec<ToolResultMessage> {
        for thought in output.thoughts {
            self.record(EntryKind::Thought {
                turn_id: turn_id.clone(),
                subject: thought.subject,
                description: thought.description,
            })
            .await;
        }
        if let Some(text) = output.text {
            self.record(EntryKind::AssistantMessage {
                turn_id: turn_id.clone(),
                content: text,
            })
            .await;
        }
        if let Some(usage) = output.usage {
            self.record(EntryKind::TokenUsage {
                turn_id: turn_id.clone(),
                input: usage.input,
                output: usage.output,
                cached: usage.cached,
                thoughts: usage.thoughts,
            })
            .await;
        }

        if output.tool_calls.is_empty() {
            return Vec::new();
        }
        self.run_tool_calls(&output.tool_calls)
            .await
            .iter()
            .map(ToolResultMessage::from)
            .collect()
    }

    /// Run a batch of tool calls under a fresh turn token.
    ///
    /// The batch runs in a new root [`RequestContext`], so every call's
    /// context shares its correlation id.
    pub async fn run_tool_calls(&self, requests: &[ToolCallRequest]) -> Vec<ToolCallOutcome> {
        let token = self.root_token.child_token();
        if let Ok(mut current) = self.turn_token.lock() {
            *current = token.clone();
        }

        let mut turn = RequestContext::new(EVENT_SOURCE)
            .with_session_id(self.session_id.clone())
            .with_operation("run_tool_calls");
        if let Some(first) = requests.first() {
            turn = turn.with_metadata("turn_id", first.turn_id().as_str());
        }
        self.scheduler
            .run_batch_in(requests, &token, &turn)
            .instrument(turn.span())
            .await
    }

    /// Cancel every unfinished call of the current batch.
    pub fn cancel_turn(&self) {
        if let Ok(current) = self.turn_token.lock() {
            current.cancel();
        }
    }

    /// Cancel one in-flight call.
    pub fn cancel_call(&self, call_id: &ToolCallId) -> bool {
        self.scheduler.cancel_call(call_id)
    }

    /// Switch the approval mode mid-session.
    ///
    /// The change applies to every decision made after this returns. A real
    /// change is recorded as a `ModeChange` entry and published.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy store is poisoned.
    pub async fn set_mode(&self, mode: ApprovalMode) -> RuntimeResult<ApprovalMode> {
        let previous = self.policy.set_mode(mode)?;
        if previous == mode {
            return Ok(previous);
        }

        self.record(EntryKind::ModeChange {
            from: previous.to_string(),
            to: mode.to_string(),
        })
        .await;
        if let Some(bus) = &self.events {
            bus.publish(KeelEvent::ModeChanged {
                metadata: EventMetadata::new(self.session_id.clone(), EVENT_SOURCE),
                from: previous.to_string(),
                to: mode.to_string(),
            });
        }
        Ok(previous)
    }

    /// Roll the workspace back to a checkpoint and record the restore.
    ///
    /// # Errors
    ///
    /// Returns an error if no checkpoint manager is attached or the restore
    /// fails. A `PartialRestore` error means the workspace is in a mixed
    /// state.
    pub async fn restore_checkpoint(&self, id: &CheckpointId) -> RuntimeResult<RestoreOutcome> {
        let Some(manager) = &self.checkpoints else {
            return Err(keel_checkpoint::CheckpointError::NotFound(id.to_string()).into());
        };
        let outcome = manager.restore(id).await?;
        info!(
            checkpoint_id = %id,
            restored = outcome.report.restored,
            removed = outcome.report.removed,
            "Workspace restored"
        );
        self.record(EntryKind::Checkpoint(CheckpointEntry {
            action: CheckpointAction::Restored,
            checkpoint_id: outcome.record.id.to_string(),
            backend: outcome.record.backend.clone(),
            position: outcome.record.position,
            call_id: outcome.record.call_id.clone(),
            invalidated: outcome.invalidated.iter().map(ToString::to_string).collect(),
        }))
        .await;
        Ok(outcome)
    }

    /// Wait until everything recorded so far is on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorder's writer has stopped.
    pub async fn flush(&self) -> RuntimeResult<()> {
        if let Some(recorder) = &self.recorder {
            recorder.flush().await?;
        }
        Ok(())
    }

    async fn record(&self, kind: EntryKind) {
        if let Some(recorder) = &self.recorder
            && let Err(e) = recorder.append(kind).await
        {
            warn!(session_id = %self.session_id, error = %e, "Session record write failed");
        }
    }
}
