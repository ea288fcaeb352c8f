use std::collections::VecDeque;

use agent_provider::RunMessage;

use crate::error::SessionStoreError;
use crate::schema::{Entry, Role};
use crate::store::SessionStore;

impl SessionStore {
    /// Business context projected to provider-neutral messages.
    pub fn context_messages(&self) -> Result<Vec<RunMessage>, SessionStoreError> {
        Ok(project_messages(&self.build_context_entries()?))
    }
}

/// Maps business entries to [`RunMessage`]s.
///
/// Tool results are paired with the oldest unanswered call of the same tool
/// and reuse its entry id as `call_id`. Unpaired results fall back to their own id.
#[must_use]
pub fn project_messages(entries: &[Entry]) -> Vec<RunMessage> {
    let mut open_calls: VecDeque<(String, String)> = VecDeque::new();
    let mut messages = Vec::with_capacity(entries.len());

    for entry in entries {
        let own_id = entry.id().unwrap_or_default().to_string();
        let message = match entry {
            Entry::Message(message) => match message.role {
                Role::User => RunMessage::UserText {
                    text: message.content.clone(),
                },
                Role::Assistant => RunMessage::AssistantText {
                    text: message.content.clone(),
                },
                Role::Tool => {
                    let (call_id, tool_name) = open_calls
                        .pop_front()
                        .unwrap_or_else(|| (own_id, "tool".to_string()));
                    RunMessage::ToolResult {
                        call_id,
                        tool_name,
                        content: message.content.clone(),
                        is_error: false,
                    }
                }
            },
            Entry::ToolCall(call) => {
                open_calls.push_back((own_id.clone(), call.tool.clone()));
                RunMessage::ToolCall {
                    call_id: own_id,
                    tool_name: call.tool.clone(),
                    arguments: call.arg.clone(),
                }
            }
            Entry::ToolResult(result) => {
                let call_id = open_calls
                    .iter()
                    .position(|(_, tool)| *tool == result.tool)
                    .and_then(|position| open_calls.remove(position))
                    .map_or(own_id, |(call_id, _)| call_id);
                RunMessage::ToolResult {
                    call_id,
                    tool_name: result.tool.clone(),
                    content: result.content.clone(),
                    is_error: !result.ok,
                }
            }
            Entry::Compaction(compaction) => RunMessage::Summary {
                text: compaction.summary.clone(),
            },
            Entry::BranchSummary(summary) => RunMessage::Summary {
                text: summary.summary.clone(),
            },
            Entry::CustomMessage(custom) => RunMessage::UserText {
                text: custom.content.clone(),
            },
            _ => continue,
        };
        messages.push(message);
    }

    messages
}
