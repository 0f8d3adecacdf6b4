//! Prelude module - commonly used types for convenient import.
//!
//! Use `use keel_test::prelude::*;` to import all essential types.

pub use crate::{
    ExecutionLog, MockTool, ScriptedConfirmations, TestWorkspace, init_test_logging, test_call,
    test_call_with_id, test_turn_id,
};
