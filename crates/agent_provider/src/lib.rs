//! Provider-neutral contract between a session-backed agent loop and the
//! model and tools it drives.
//!
//! This crate defines only history items, tool envelopes and run lifecycle
//! events. It carries no transport, persistence or orchestration logic.

use std::fmt;

/// Identifier for one agent turn.
pub type RunId = u64;

/// Provider-neutral model-facing message history item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMessage {
    UserText {
        text: String,
    },
    AssistantText {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: String,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    /// Condensed stand-in for folded history.
    Summary {
        text: String,
    },
}

/// One tool invocation requested by a model. Tools take a single string argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: String,
}

/// Tool output handed back to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub is_error: bool,
    pub content: String,
}

impl ToolResult {
    /// Constructs a successful tool result.
    #[must_use]
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            is_error: false,
            content: content.into(),
        }
    }

    /// Constructs a tool error result.
    #[must_use]
    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            is_error: true,
            content: content.into(),
        }
    }
}

/// Failure to run a tool at all, as opposed to a tool that ran and reported an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    UnknownTool { name: String },
    Spawn { tool: String, message: String },
    TimedOut { tool: String, seconds: u64 },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { name } => write!(f, "unknown tool '{name}'"),
            Self::Spawn { tool, message } => write!(f, "failed to start tool '{tool}': {message}"),
            Self::TimedOut { tool, seconds } => {
                write!(f, "tool '{tool}' timed out after {seconds}s")
            }
        }
    }
}

impl std::error::Error for ToolError {}

/// Host-side tool execution.
pub trait ToolRegistry {
    fn execute(&mut self, call: &ToolCallRequest) -> Result<ToolResult, ToolError>;
}

/// Next step chosen by a model for the current history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    CallTool(ToolCallRequest),
    Reply(String),
}

/// Immutable metadata describing a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
    pub thinking_level: Option<String>,
}

/// Model interface: look at the history, pick the next step.
pub trait DecisionModel {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    fn decide(&mut self, history: &[RunMessage]) -> Result<Decision, String>;
}

/// Lifecycle event emitted while a turn runs. Observability only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started {
        run_id: RunId,
    },
    ToolCall {
        run_id: RunId,
        call_id: String,
        tool_name: String,
    },
    ToolResult {
        run_id: RunId,
        call_id: String,
        is_error: bool,
    },
    Reply {
        run_id: RunId,
        text: String,
    },
    Compacted {
        run_id: RunId,
        summary_id: String,
    },
    Finished {
        run_id: RunId,
    },
    Failed {
        run_id: RunId,
        error: String,
    },
}

impl RunEvent {
    /// Returns the run identifier associated with this event.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Started { run_id }
            | Self::ToolCall { run_id, .. }
            | Self::ToolResult { run_id, .. }
            | Self::Reply { run_id, .. }
            | Self::Compacted { run_id, .. }
            | Self::Finished { run_id }
            | Self::Failed { run_id, .. } => *run_id,
        }
    }

    /// Returns true when this event terminates the run lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Failed { .. })
    }
}
