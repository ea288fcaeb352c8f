//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! Rules, applied to the last history item:
//! - a user message starting with `!` calls `shell` with the rest of the line;
//! - a user message starting with `echo ` calls `echo` with the rest;
//! - anything else, tool results included, gets a plain reply.

use agent_provider::{Decision, DecisionModel, ProviderProfile, RunMessage, ToolCallRequest};

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

pub const SHELL_TOOL: &str = "shell";
pub const ECHO_TOOL: &str = "echo";

#[derive(Debug, Clone)]
pub struct MockModel {
    model_id: String,
    thinking_level: Option<String>,
    next_call: u64,
}

impl MockModel {
    #[must_use]
    pub fn new(model_id: impl Into<String>, thinking_level: Option<String>) -> Self {
        Self {
            model_id: sanitize_model_id(model_id.into()),
            thinking_level: thinking_level.and_then(sanitize_thinking_level),
            next_call: 1,
        }
    }

    fn call(&mut self, tool_name: &str, arguments: &str) -> Decision {
        let call_id = format!("call-{}", self.next_call);
        self.next_call += 1;
        Decision::CallTool(ToolCallRequest {
            call_id,
            tool_name: tool_name.to_string(),
            arguments: arguments.trim().to_string(),
        })
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new("mock", Some("balanced".to_string()))
    }
}

impl DecisionModel for MockModel {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
            thinking_level: self.thinking_level.clone(),
        }
    }

    fn decide(&mut self, history: &[RunMessage]) -> Result<Decision, String> {
        let Some(last) = history.last() else {
            return Err("mock model needs at least one message to respond to".to_string());
        };

        let decision = match last {
            RunMessage::UserText { text } => {
                if let Some(command) = text.strip_prefix('!') {
                    self.call(SHELL_TOOL, command)
                } else if let Some(argument) = text.strip_prefix("echo ") {
                    self.call(ECHO_TOOL, argument)
                } else {
                    Decision::Reply(format!("You said: {text}"))
                }
            }
            RunMessage::ToolResult {
                tool_name,
                content,
                is_error: false,
                ..
            } => Decision::Reply(format!("{tool_name} returned: {}", content.trim_end())),
            RunMessage::ToolResult {
                tool_name,
                content,
                is_error: true,
                ..
            } => Decision::Reply(format!("{tool_name} failed: {}", content.trim_end())),
            RunMessage::ToolCall { tool_name, .. } => {
                return Err(format!("tool call to {tool_name} has no result yet"));
            }
            RunMessage::AssistantText { .. } | RunMessage::Summary { .. } => {
                Decision::Reply("Nothing new to respond to.".to_string())
            }
        };

        Ok(decision)
    }
}

fn sanitize_model_id(model_id: String) -> String {
    let trimmed = model_id.trim();
    if trimmed.is_empty() {
        "mock".to_string()
    } else {
        trimmed.to_string()
    }
}

fn sanitize_thinking_level(level: String) -> Option<String> {
    let trimmed = level.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
