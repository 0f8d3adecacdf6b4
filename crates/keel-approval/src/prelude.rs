//! Prelude module - commonly used types for convenient import.
//!
//! Use `use keel_approval::prelude::*;` to import all essential types.

pub use crate::{ApprovalError, ApprovalResult};

pub use crate::{ApprovalDecision, ApprovalMode, ConfirmationPrompt, DecisionRule};

pub use crate::{PlanScope, PolicySnapshot, PolicyStore, ToolEntry, decide};

pub use crate::{ConfirmationHandler, ConfirmationOutcome, NoConfirmation};
