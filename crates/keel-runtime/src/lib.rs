//! Keel Runtime - the tool-call scheduler and turn controller.
//!
//! This crate provides:
//! - The [`Tool`] registration contract and [`ToolRegistry`]
//! - Declared argument schemas and validation
//! - [`CallTracker`]: the per-call state machine with idempotent transitions
//! - Batch partitioning into independent and conflicting sets
//! - [`Scheduler`]: approval, checkpointing, gated concurrent execution,
//!   cancellation and recording for each call
//! - [`TurnController`]: model output in, tool results out
//! - [`SessionRuntime`]: wiring all of the above from configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_runtime::prelude::*;
//! use keel_approval::NoConfirmation;
//! use keel_config::Config;
//! use keel_core::dirs::KeelHome;
//! use keel_core::{SessionId, ToolCallRequest, TurnId};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example(registry: ToolRegistry) -> RuntimeResult<()> {
//! let config = Config::default();
//! let home = KeelHome::from_path("/home/me/.keel");
//! let runtime = SessionRuntime::open(
//!     &config,
//!     &home,
//!     std::path::Path::new("/work/project"),
//!     SessionId::new(),
//! )
//! .await?;
//! let controller = runtime.controller(registry, Arc::new(NoConfirmation))?;
//!
//! let turn = TurnId::new();
//! let outcomes = controller
//!     .run_tool_calls(&[ToolCallRequest::new("read_file", json!({"path": "README.md"}), turn)])
//!     .await;
//! println!("{}", outcomes[0].result_text());
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

pub mod bootstrap;
pub mod controller;
pub mod error;
pub mod partition;
pub mod scheduler;
pub mod schema;
pub mod telemetry;
pub mod tool;
pub mod tracker;

pub use bootstrap::{SessionRuntime, build_policy, checkpoint_store, open_checkpoints};
pub use controller::{ModelOutput, Thought, TokenUsage, ToolResultMessage, TurnController};
pub use error::{RuntimeError, RuntimeResult};
pub use partition::{CallFootprint, Partition, partition};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerConfig, ToolCallOutcome};
pub use schema::{ArgumentSchema, FieldSpec, FieldType, SchemaViolation};
pub use tool::{RegisteredTool, Tool, ToolDefinition, ToolError, ToolRegistry, ToolResult};
pub use tracker::{CallTracker, TransitionOutcome};

pub use tokio_util::sync::CancellationToken;
