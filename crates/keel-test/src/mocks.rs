//! Mock implementations for testing.

use async_trait::async_trait;
use keel_approval::{ConfirmationHandler, ConfirmationOutcome, ConfirmationPrompt};
use keel_core::{MutationClass, ToolCallRequest};
use keel_runtime::{ArgumentSchema, FieldType, Tool, ToolError, ToolResult};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

type Effect = Arc<dyn Fn(&Value) -> ToolResult + Send + Sync>;

/// One completed (or cancelled) execution seen by an [`ExecutionLog`].
#[derive(Debug, Clone)]
pub struct Execution {
    /// Tool name.
    pub tool: String,
    /// Arguments the tool received.
    pub arguments: Value,
    /// When the executor was entered.
    pub started: Instant,
    /// When it returned.
    pub finished: Instant,
}

impl Execution {
    /// Whether this execution's interval overlaps `other`'s.
    #[must_use]
    pub fn overlaps(&self, other: &Execution) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

#[derive(Debug, Default)]
struct LogState {
    running: usize,
    peak: usize,
    executions: Vec<Execution>,
}

/// Shared record of executor activity across mock tools.
///
/// Clone it into several tools to observe concurrency across all of them.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    state: Arc<Mutex<LogState>>,
}

impl ExecutionLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.running = state.running.saturating_add(1);
            state.peak = state.peak.max(state.running);
        }
    }

    fn exit(&self, execution: Execution) {
        if let Ok(mut state) = self.state.lock() {
            state.running = state.running.saturating_sub(1);
            state.executions.push(execution);
        }
    }

    /// Highest number of executors that were running at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.state.lock().map_or(0, |s| s.peak)
    }

    /// Executions in completion order.
    #[must_use]
    pub fn executions(&self) -> Vec<Execution> {
        self.state
            .lock()
            .map(|s| s.executions.clone())
            .unwrap_or_default()
    }

    /// Number of executions of `tool`.
    #[must_use]
    pub fn count(&self, tool: &str) -> usize {
        self.executions().iter().filter(|e| e.tool == tool).count()
    }

    /// Whether any two recorded executions overlapped in time.
    #[must_use]
    pub fn any_overlap(&self) -> bool {
        let executions = self.executions();
        executions.iter().enumerate().any(|(i, a)| {
            executions
                .iter()
                .skip(i.saturating_add(1))
                .any(|b| a.overlaps(b))
        })
    }
}

/// A configurable tool for scheduler tests.
///
/// By default it sleeps for its delay (watching the cancellation token) and
/// returns `"<name> ok"`. Queued results are returned first, one per call;
/// an effect, if set, runs after the delay and supplies the result.
pub struct MockTool {
    name: String,
    class: MutationClass,
    schema: ArgumentSchema,
    delay: Duration,
    results: Mutex<VecDeque<ToolResult>>,
    effect: Option<Effect>,
    preview: Option<String>,
    log: ExecutionLog,
}

impl MockTool {
    /// Create a mock tool with an explicit class and schema.
    #[must_use]
    pub fn new(name: impl Into<String>, class: MutationClass, schema: ArgumentSchema) -> Self {
        Self {
            name: name.into(),
            class,
            schema,
            delay: Duration::ZERO,
            results: Mutex::new(VecDeque::new()),
            effect: None,
            preview: None,
            log: ExecutionLog::new(),
        }
    }

    /// A read-only tool taking an optional `path`.
    #[must_use]
    pub fn reader(name: impl Into<String>) -> Self {
        Self::new(
            name,
            MutationClass::ReadOnly,
            ArgumentSchema::new().optional("path", FieldType::String),
        )
    }

    /// A path-mutating tool targeting `file_path`, with optional `content`.
    #[must_use]
    pub fn writer(name: impl Into<String>) -> Self {
        Self::new(
            name,
            MutationClass::mutates_path(["file_path"]),
            ArgumentSchema::new()
                .required("file_path", FieldType::String)
                .optional("content", FieldType::String),
        )
    }

    /// A shell-state tool taking a `command`.
    #[must_use]
    pub fn shell(name: impl Into<String>) -> Self {
        Self::new(
            name,
            MutationClass::MutatesShellState,
            ArgumentSchema::new().required("command", FieldType::String),
        )
    }

    /// A destructive tool taking a `command`.
    #[must_use]
    pub fn destructive(name: impl Into<String>) -> Self {
        Self::new(
            name,
            MutationClass::Destructive,
            ArgumentSchema::new().required("command", FieldType::String),
        )
    }

    /// Sleep this long inside every execution.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a result for the next unanswered call.
    #[must_use]
    pub fn with_result(self, result: ToolResult) -> Self {
        if let Ok(mut queue) = self.results.lock() {
            queue.push_back(result);
        }
        self
    }

    /// Run `effect` on every call that has no queued result.
    #[must_use]
    pub fn with_effect<F>(mut self, effect: F) -> Self
    where
        F: Fn(&Value) -> ToolResult + Send + Sync + 'static,
    {
        self.effect = Some(Arc::new(effect));
        self
    }

    /// Preview text offered on confirmation.
    #[must_use]
    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    /// Record executions into a shared log.
    #[must_use]
    pub fn with_log(mut self, log: &ExecutionLog) -> Self {
        self.log = log.clone();
        self
    }

    /// This tool's execution log.
    #[must_use]
    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    fn next_result(&self, arguments: &Value) -> ToolResult {
        if let Ok(mut queue) = self.results.lock()
            && let Some(result) = queue.pop_front()
        {
            return result;
        }
        match &self.effect {
            Some(effect) => effect(arguments),
            None => Ok(format!("{} ok", self.name)),
        }
    }
}

impl std::fmt::Debug for MockTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTool")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "mock tool"
    }

    fn mutation_class(&self) -> MutationClass {
        self.class.clone()
    }

    fn argument_schema(&self) -> ArgumentSchema {
        self.schema.clone()
    }

    fn preview(&self, _arguments: &Value) -> Option<String> {
        self.preview.clone()
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolResult {
        let started = Instant::now();
        self.log.enter();
        let completed = tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(self.delay) => true,
        };
        let result = if completed {
            self.next_result(&arguments)
        } else {
            Err(ToolError::Cancelled)
        };
        self.log.exit(Execution {
            tool: self.name.clone(),
            arguments,
            started,
            finished: Instant::now(),
        });
        result
    }
}

/// A confirmation handler that answers from a script.
///
/// Answers are consumed in order; once the script runs out every prompt is
/// rejected. Every prompt it sees is kept for inspection.
#[derive(Debug, Clone)]
pub struct ScriptedConfirmations {
    answers: Arc<Mutex<VecDeque<ConfirmationOutcome>>>,
    prompts: Arc<Mutex<Vec<(String, ConfirmationPrompt)>>>,
    available: bool,
}

impl ScriptedConfirmations {
    /// Create a handler with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            answers: Arc::new(Mutex::new(VecDeque::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            available: true,
        }
    }

    /// A handler that reports no human attached.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Append an answer to the script.
    #[must_use]
    pub fn then(self, outcome: ConfirmationOutcome) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.push_back(outcome);
        }
        self
    }

    /// Shorthand for appending an approval.
    #[must_use]
    pub fn approve(self) -> Self {
        self.then(ConfirmationOutcome::Approve)
    }

    /// Shorthand for appending a rejection.
    #[must_use]
    pub fn reject(self, reason: &str) -> Self {
        self.then(ConfirmationOutcome::reject(reason))
    }

    /// Tool names of every prompt seen, in order.
    #[must_use]
    pub fn prompted_tools(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.iter().map(|(tool, _)| tool.clone()).collect())
            .unwrap_or_default()
    }

    /// Prompts seen, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<ConfirmationPrompt> {
        self.prompts
            .lock()
            .map(|p| p.iter().map(|(_, prompt)| prompt.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for ScriptedConfirmations {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfirmationHandler for ScriptedConfirmations {
    async fn confirm(
        &self,
        request: &ToolCallRequest,
        prompt: &ConfirmationPrompt,
    ) -> ConfirmationOutcome {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((request.tool_name().to_string(), prompt.clone()));
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .unwrap_or_else(|| ConfirmationOutcome::reject("script exhausted"))
    }

    fn is_available(&self) -> bool {
        self.available
    }
}
