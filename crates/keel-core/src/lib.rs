//! Keel Core - Foundation types for the Keel agent orchestration core.
//!
//! This crate provides:
//! - Identifiers and timestamps shared by every other crate
//! - The [`ToolCallRequest`] and [`MutationClass`] data model
//! - Security error types for path containment
//! - Lexical and filesystem path containment checks
//! - Home and workspace directory layout

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod dirs;
pub mod error;
pub mod paths;
pub mod state;
pub mod tool;
pub mod types;
pub mod utils;

pub use error::{SecurityError, SecurityResult};
pub use state::ToolCallState;
pub use tool::{MutationClass, ToolCallRequest};
pub use types::{SessionId, Timestamp, ToolCallId, TurnId};
pub use utils::{truncate_output, truncate_to_boundary};
