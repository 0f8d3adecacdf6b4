//! Keel Approval - the policy engine that classifies proposed tool calls.
//!
//! A call is classified as allowed, denied, or needing confirmation from:
//! - the active [`ApprovalMode`] (`default`, `auto-edit`, `yolo`, `plan`)
//! - glob allow and deny lists over tool names
//! - tools approved "always" earlier in the session
//! - the tool's declared [`MutationClass`](keel_core::MutationClass)
//! - in plan mode, whether every target path stays inside the scratch scope
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_approval::prelude::*;
//! use keel_core::{MutationClass, ToolCallRequest, TurnId};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scope = PlanScope::new("/work/project", ".keel/tmp/plans")?;
//! let store = PolicyStore::new(ApprovalMode::Plan, scope).with_denied(["shell*"])?;
//!
//! let request = ToolCallRequest::new(
//!     "write_file",
//!     json!({"file_path": ".keel/tmp/plans/login-plan.md"}),
//!     TurnId::new(),
//! );
//! let class = MutationClass::mutates_path(["file_path"]);
//! let decision = decide(
//!     &request,
//!     &*store.snapshot()?,
//!     Some(ToolEntry { mutation_class: &class, preview: None }),
//! );
//! println!("{decision}");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod confirm;
pub mod decision;
pub mod engine;
pub mod error;
pub mod mode;
pub mod scope;
pub mod store;

pub use confirm::{ConfirmationHandler, ConfirmationOutcome, NoConfirmation};
pub use decision::{ApprovalDecision, ConfirmationPrompt, DecisionRule};
pub use engine::{ToolEntry, decide};
pub use error::{ApprovalError, ApprovalResult};
pub use mode::ApprovalMode;
pub use scope::PlanScope;
pub use store::{PolicySnapshot, PolicyStore, ToolPatterns};
