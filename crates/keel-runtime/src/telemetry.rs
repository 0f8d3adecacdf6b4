//! Forwards bus events to `tracing` under the `keel::telemetry` target.
//!
//! Filter with `RUST_LOG=keel::telemetry=info` (or a `logging.directives`
//! entry) to get one structured line per state transition and per checkpoint
//! creation or restoration.

use keel_events::{EventReceiver, KeelEvent};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Log one event.
pub fn log_event(event: &KeelEvent) {
    let meta = event.metadata();
    match event {
        KeelEvent::CallStateChanged {
            call_id,
            turn_id,
            tool_name,
            from,
            to,
            ..
        } => {
            info!(
                target: "keel::telemetry",
                event = event.event_type(),
                session_id = %meta.session_id,
                call_id = %call_id,
                turn_id = %turn_id,
                tool = %tool_name,
                from = from.as_ref().map_or("-", |s| s.label()),
                to = to.label(),
                reason = to.reason().unwrap_or(""),
                at = %meta.timestamp,
            );
        },
        KeelEvent::CheckpointCreated {
            checkpoint_id,
            position,
            call_id,
            backend,
            ..
        } => {
            info!(
                target: "keel::telemetry",
                event = event.event_type(),
                session_id = %meta.session_id,
                checkpoint_id = %checkpoint_id,
                position = *position,
                call_id = call_id.as_ref().map_or("", |c| c.as_str()),
                backend = %backend,
                at = %meta.timestamp,
            );
        },
        KeelEvent::CheckpointRestored {
            checkpoint_id,
            invalidated,
            ..
        } => {
            info!(
                target: "keel::telemetry",
                event = event.event_type(),
                session_id = %meta.session_id,
                checkpoint_id = %checkpoint_id,
                invalidated = invalidated.len(),
                at = %meta.timestamp,
            );
        },
        KeelEvent::ModeChanged { from, to, .. } => {
            info!(
                target: "keel::telemetry",
                event = event.event_type(),
                session_id = %meta.session_id,
                from = %from,
                to = %to,
                at = %meta.timestamp,
            );
        },
        KeelEvent::RecordIncomplete { error, .. } => {
            warn!(
                target: "keel::telemetry",
                event = event.event_type(),
                session_id = %meta.session_id,
                error = %error,
                at = %meta.timestamp,
            );
        },
    }
}

/// Spawn a task that logs every event from `receiver` until the bus closes.
#[must_use]
pub fn spawn_forwarder(mut receiver: EventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            log_event(&event);
        }
    })
}
