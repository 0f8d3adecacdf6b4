//! Tool registration contract and the registry the scheduler dispatches
//! through.

use async_trait::async_trait;
use keel_core::MutationClass;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeError, RuntimeResult};
use crate::schema::{ArgumentSchema, FieldType};

/// Errors a tool executor can report.
///
/// The scheduler preserves the message verbatim in the call's `Failed` state.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The arguments passed validation but the tool cannot use them.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("{0}")]
    ExecutionFailed(String),

    /// The tool observed its cancellation token and stopped.
    #[error("cancelled")]
    Cancelled,
}

/// Result type for tool execution.
pub type ToolResult = Result<String, ToolError>;

/// A tool the scheduler can dispatch to.
///
/// Implementations describe their side effects through
/// [`Tool::mutation_class`]; the value is read once at registration.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Human-readable description for the model.
    fn description(&self) -> &str {
        ""
    }

    /// The single class of side effect this tool has.
    fn mutation_class(&self) -> MutationClass;

    /// Declared argument contract.
    fn argument_schema(&self) -> ArgumentSchema;

    /// Optional preview of what a call will do, shown on confirmation.
    fn preview(&self, _arguments: &Value) -> Option<String> {
        None
    }

    /// Run the tool.
    ///
    /// Long-running tools should watch `cancel` and return
    /// [`ToolError::Cancelled`] once it fires.
    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolResult;
}

/// A registered tool with its registration metadata fixed.
#[derive(Clone)]
pub struct RegisteredTool {
    tool: Arc<dyn Tool>,
    mutation_class: MutationClass,
    schema: ArgumentSchema,
}

impl RegisteredTool {
    /// The executor.
    #[must_use]
    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    /// Class declared at registration.
    #[must_use]
    pub fn mutation_class(&self) -> &MutationClass {
        &self.mutation_class
    }

    /// Schema declared at registration.
    #[must_use]
    pub fn schema(&self) -> &ArgumentSchema {
        &self.schema
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.tool.name())
            .field("mutation_class", &self.mutation_class)
            .finish_non_exhaustive()
    }
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Description.
    pub description: String,
    /// JSON Schema of the arguments.
    pub input_schema: Value,
}

/// Name-keyed registry of tools.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::DuplicateTool`] if the name is taken, or
    /// [`RuntimeError::InvalidRegistration`] if the name is empty or a
    /// declared path field is missing from the schema or not path-typed.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> RuntimeResult<()> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(RuntimeError::InvalidRegistration {
                tool: name,
                reason: "tool name is empty".into(),
            });
        }
        if self.tools.contains_key(&name) {
            return Err(RuntimeError::DuplicateTool(name));
        }

        let mutation_class = tool.mutation_class();
        let schema = tool.argument_schema();
        if let MutationClass::MutatesPath { path_fields } = &mutation_class {
            for field in path_fields {
                let Some(spec) = schema.field(field) else {
                    return Err(RuntimeError::InvalidRegistration {
                        tool: name,
                        reason: format!("path field '{field}' is not declared in the schema"),
                    });
                };
                if !matches!(
                    spec.field_type,
                    FieldType::String | FieldType::Array | FieldType::StringOrArray
                ) {
                    return Err(RuntimeError::InvalidRegistration {
                        tool: name,
                        reason: format!("path field '{field}' must be a string or array"),
                    });
                }
            }
        }

        tracing::debug!(tool = %name, class = %mutation_class, "Registered tool");
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                mutation_class,
                schema,
            },
        );
        Ok(())
    }

    /// Get a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Export all tool definitions for the model, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.tool.name().to_string(),
                description: t.tool.description().to_string(),
                input_schema: t.schema.to_json_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}
