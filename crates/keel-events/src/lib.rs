//! Keel Events - Lifecycle event bus for the Keel orchestration core.
//!
//! This crate provides:
//! - Event types for call state transitions, checkpoints and mode changes
//! - A broadcast-based event bus for async subscribers
//!
//! Events are published to an [`EventBus`], which broadcasts them to every
//! [`EventReceiver`]. A receiver may be narrowed to a single session with
//! [`EventBus::subscribe_session`].
//!
//! # Example
//!
//! ```rust
//! use keel_core::SessionId;
//! use keel_events::{EventBus, EventMetadata, KeelEvent};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(KeelEvent::ModeChanged {
//!     metadata: EventMetadata::new(SessionId::from_raw("s1"), "controller"),
//!     from: "default".to_string(),
//!     to: "plan".to_string(),
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "mode_changed");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{EventMetadata, KeelEvent};
