//! Per-call state tracking.
//!
//! The tracker is the single place a call's [`ToolCallState`] changes. Every
//! applied transition is stamped, logged and published on the event bus.
//! Applying a state the call has already entered is a no-op, so a
//! re-delivered transition never produces a second event.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use keel_core::{SessionId, Timestamp, ToolCallId, ToolCallRequest, ToolCallState, TurnId};
use keel_events::{EventBus, EventMetadata, KeelEvent};
use keel_session::TransitionStamp;
use tracing::{debug, warn};

const EVENT_SOURCE: &str = "scheduler";

/// What happened to a requested transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The call moved to the new state.
    Applied,
    /// The call had already entered that state; nothing changed.
    Duplicate,
    /// The move is not a legal forward transition.
    Rejected {
        /// State the call is in, `None` if the call is unknown.
        current: Option<String>,
    },
}

impl TransitionOutcome {
    /// Whether the state changed.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug)]
struct CallRecord {
    turn_id: TurnId,
    tool_name: String,
    state: ToolCallState,
    transitions: Vec<TransitionStamp>,
}

impl CallRecord {
    fn has_entered(&self, state: &ToolCallState) -> bool {
        self.transitions.iter().any(|t| t.state == state.label())
    }
}

/// Owns the state machine of every call in a session.
#[derive(Debug)]
pub struct CallTracker {
    session_id: SessionId,
    calls: DashMap<ToolCallId, CallRecord>,
    events: Option<EventBus>,
}

impl CallTracker {
    /// Create a tracker for one session.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            calls: DashMap::new(),
            events: None,
        }
    }

    /// Publish transitions on `bus`.
    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Start tracking a call in `Validating`.
    ///
    /// A call id that is already tracked yields
    /// [`TransitionOutcome::Duplicate`].
    pub fn begin(&self, request: &ToolCallRequest) -> TransitionOutcome {
        let stamp = TransitionStamp {
            state: ToolCallState::Validating.label().to_string(),
            at: Timestamp::now(),
        };
        match self.calls.entry(request.id().clone()) {
            Entry::Occupied(_) => return TransitionOutcome::Duplicate,
            Entry::Vacant(slot) => {
                slot.insert(CallRecord {
                    turn_id: request.turn_id().clone(),
                    tool_name: request.tool_name().to_string(),
                    state: ToolCallState::Validating,
                    transitions: vec![stamp],
                });
            },
        }

        self.emit(
            request.id(),
            request.turn_id().clone(),
            request.tool_name().to_string(),
            None,
            ToolCallState::Validating,
        );
        TransitionOutcome::Applied
    }

    /// Move a call to `next`.
    pub fn transition(&self, call_id: &ToolCallId, next: ToolCallState) -> TransitionOutcome {
        let (turn_id, tool_name, from) = {
            let Some(mut record) = self.calls.get_mut(call_id) else {
                warn!(call_id = %call_id, to = %next, "Transition for untracked call");
                return TransitionOutcome::Rejected { current: None };
            };
            if record.has_entered(&next) {
                return TransitionOutcome::Duplicate;
            }
            if !record.state.can_transition_to(&next) {
                warn!(
                    call_id = %call_id,
                    from = %record.state,
                    to = %next,
                    "Illegal call state transition ignored"
                );
                return TransitionOutcome::Rejected {
                    current: Some(record.state.label().to_string()),
                };
            }
            record.transitions.push(TransitionStamp {
                state: next.label().to_string(),
                at: Timestamp::now(),
            });
            let from = std::mem::replace(&mut record.state, next.clone());
            (record.turn_id.clone(), record.tool_name.clone(), from)
        };

        self.emit(call_id, turn_id, tool_name, Some(from), next);
        TransitionOutcome::Applied
    }

    /// Current state of a call.
    #[must_use]
    pub fn state(&self, call_id: &ToolCallId) -> Option<ToolCallState> {
        self.calls.get(call_id).map(|r| r.state.clone())
    }

    /// Every state a call entered, in order.
    #[must_use]
    pub fn transitions(&self, call_id: &ToolCallId) -> Vec<TransitionStamp> {
        self.calls
            .get(call_id)
            .map(|r| r.transitions.clone())
            .unwrap_or_default()
    }

    /// Number of tracked calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no calls are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn emit(
        &self,
        call_id: &ToolCallId,
        turn_id: TurnId,
        tool_name: String,
        from: Option<ToolCallState>,
        to: ToolCallState,
    ) {
        debug!(
            call_id = %call_id,
            tool = %tool_name,
            from = from.as_ref().map_or("-", ToolCallState::label),
            to = %to,
            "Call state changed"
        );
        if let Some(bus) = &self.events {
            bus.publish(KeelEvent::CallStateChanged {
                metadata: EventMetadata::new(self.session_id.clone(), EVENT_SOURCE),
                call_id: call_id.clone(),
                turn_id,
                tool_name,
                from,
                to,
            });
        }
    }
}
