//! Keel Test - Shared test utilities for the Keel orchestration core.
//!
//! This crate provides mock tools, scripted confirmation handlers and a
//! temporary workspace harness that can be used across Keel crates as a
//! dev-dependency.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! keel-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use keel_test::{MockTool, TestWorkspace};
//!
//! #[tokio::test]
//! async fn test_write_runs() {
//!     let ws = TestWorkspace::new();
//!     let registry = ws.registry([MockTool::writer("write_file")]);
//!     let runtime = ws.open_session("s1").await;
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
