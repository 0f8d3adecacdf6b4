//! Keel Telemetry - Logging and tracing for the Keel orchestration core.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats and targets
//! - Request context for correlating a turn, a batch and its calls
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_telemetry::{LogConfig, LogFormat, RequestContext, setup_logging};
//!
//! # fn main() -> Result<(), keel_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("keel_runtime=trace");
//!
//! setup_logging(&config)?;
//!
//! let ctx = RequestContext::new("scheduler").with_operation("run_batch");
//! let span = ctx.span();
//! let _guard = span.enter();
//! tracing::info!("Dispatching batch");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::RequestContext;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
