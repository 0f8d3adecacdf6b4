//! Prelude module - commonly used types for convenient import.
//!
//! Use `use keel_config::prelude::*;` to import all essential types.

pub use crate::{
    ApprovalSection, CheckpointsSection, Config, ConfigError, ConfigLayer, ConfigResult,
    LoggingSection, ResolvedConfig, SchedulerSection, SessionsSection,
};
