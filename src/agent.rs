//! Session-backed agent loop.
//!
//! Each turn persists everything it does through the store: turn markers, the
//! user prompt, every tool call and result, the reply. The model only ever sees
//! the assembled business context.

use agent_provider::{Decision, DecisionModel, RunEvent, RunId, ToolRegistry, ToolResult};
use anyhow::{anyhow, Context, Result};
use session_store::{
    CompactOptions, Entry, NewMessage, Role, SessionStore, SessionStoreError, TurnMarker,
    DEFAULT_KEEP_LAST,
};
use tracing::{info, warn};

pub const DEFAULT_MAX_STEPS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    /// Decisions allowed per turn before giving up on a reply.
    pub max_steps: usize,
    /// Compact after a turn once the context estimate exceeds this.
    pub compact_threshold: Option<u64>,
    pub keep_last: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            compact_threshold: None,
            keep_last: DEFAULT_KEEP_LAST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub turn: u64,
    /// `None` when the step limit ran out first.
    pub reply: Option<String>,
    pub tool_calls: usize,
    pub compacted_into: Option<String>,
}

pub struct Agent<M, T> {
    store: SessionStore,
    model: M,
    tools: T,
    options: AgentOptions,
}

impl<M: DecisionModel, T: ToolRegistry> Agent<M, T> {
    pub fn new(store: SessionStore, model: M, tools: T, options: AgentOptions) -> Self {
        Self {
            store,
            model,
            tools,
            options,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Runs one user turn to completion.
    pub fn run_turn(
        &mut self,
        prompt: &str,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<TurnOutcome> {
        let turn = self.next_turn_number()?;
        let run_id: RunId = turn;
        emit(RunEvent::Started { run_id });

        match self.drive(turn, prompt, emit) {
            Ok(outcome) => {
                emit(RunEvent::Finished { run_id });
                Ok(outcome)
            }
            Err(error) => {
                emit(RunEvent::Failed {
                    run_id,
                    error: format!("{error:#}"),
                });
                Err(error)
            }
        }
    }

    fn drive(
        &mut self,
        turn: u64,
        prompt: &str,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<TurnOutcome> {
        let run_id: RunId = turn;
        let group_id = format!("turn-{turn}");

        self.store.append_turn_start(TurnMarker {
            turn,
            group_id: Some(group_id.clone()),
            phase: Some("start".to_string()),
            ..TurnMarker::default()
        })?;
        let user_message_id = self.store.append_message(Role::User, prompt)?;

        let mut reply = None;
        let mut tool_calls = 0;
        for _ in 0..self.options.max_steps {
            let history = self.store.context_messages()?;
            let decision = self
                .model
                .decide(&history)
                .map_err(|error| anyhow!(error))
                .context("model failed to decide the next step")?;

            match decision {
                Decision::CallTool(call) => {
                    tool_calls += 1;
                    let call_entry = self
                        .store
                        .append_tool_call(&call.tool_name, &call.arguments)?;
                    emit(RunEvent::ToolCall {
                        run_id,
                        call_id: call_entry.clone(),
                        tool_name: call.tool_name.clone(),
                    });

                    let result = self.tools.execute(&call).unwrap_or_else(|error| {
                        warn!(tool = %call.tool_name, %error, "tool could not run");
                        ToolResult::error(&call.call_id, &call.tool_name, error.to_string())
                    });
                    self.store
                        .append_tool_result(&result.tool_name, !result.is_error, &result.content)?;
                    emit(RunEvent::ToolResult {
                        run_id,
                        call_id: call_entry,
                        is_error: result.is_error,
                    });
                }
                Decision::Reply(text) => {
                    let profile = self.model.profile();
                    let mut message = NewMessage::new(Role::Assistant, text.clone())
                        .model(profile.provider_id, profile.model_id);
                    if let Some(level) = profile.thinking_level {
                        message = message.thinking(level);
                    }
                    self.store.append_message_with(message)?;
                    emit(RunEvent::Reply {
                        run_id,
                        text: text.clone(),
                    });
                    reply = Some(text);
                    break;
                }
            }
        }

        if reply.is_none() {
            warn!(turn, max_steps = self.options.max_steps, "turn ended without a reply");
        }

        self.store.append_turn_end(TurnMarker {
            turn,
            user_message_id: Some(user_message_id),
            group_id: Some(group_id),
            phase: Some(if reply.is_some() { "done" } else { "step_limit" }.to_string()),
        })?;

        let compacted_into = self.maybe_compact()?;
        if let Some(summary_id) = &compacted_into {
            emit(RunEvent::Compacted {
                run_id,
                summary_id: summary_id.clone(),
            });
        }

        Ok(TurnOutcome {
            turn,
            reply,
            tool_calls,
            compacted_into,
        })
    }

    fn next_turn_number(&self) -> Result<u64> {
        let entries = self.store.load_entries()?;
        let last = entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::TurnStart(marker) => Some(marker.turn),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Ok(last + 1)
    }

    fn maybe_compact(&mut self) -> Result<Option<String>> {
        let Some(threshold) = self.options.compact_threshold else {
            return Ok(None);
        };
        if !self.store.should_compact(threshold)? {
            return Ok(None);
        }

        match self.store.compact(CompactOptions {
            keep_last: self.options.keep_last,
            threshold: Some(threshold),
            ..CompactOptions::default()
        }) {
            Ok(outcome) => {
                info!(summary_id = %outcome.summary_id, threshold, "auto-compacted context");
                Ok(Some(outcome.summary_id))
            }
            Err(SessionStoreError::NothingToCompact { .. }) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::RunEvent;
    use agent_provider_mock::MockModel;
    use pretty_assertions::assert_eq;
    use session_store::{Entry, EntryKind, FixedClock, IdSource, SessionStore};
    use tempfile::TempDir;

    use super::{Agent, AgentOptions};
    use crate::tools::BuiltinTools;

    fn agent(options: AgentOptions) -> (TempDir, Agent<MockModel, BuiltinTools>) {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let mut store = SessionStore::open(dir.path().join("session.jsonl"))
            .with_clock(FixedClock::epoch())
            .with_id_source(IdSource::sequential("e"));
        store.ensure(dir.path()).expect("ensure");
        let agent = Agent::new(store, MockModel::default(), BuiltinTools::default(), options);
        (dir, agent)
    }

    #[test]
    fn echo_turn_persists_every_step_in_order() {
        let (_dir, mut agent) = agent(AgentOptions::default());
        let mut events = Vec::new();

        let outcome = agent
            .run_turn("echo hello", &mut |event| events.push(event))
            .expect("turn");

        assert_eq!(outcome.turn, 1);
        assert_eq!(outcome.tool_calls, 1);
        assert_eq!(outcome.reply.as_deref(), Some("echo returned: hello"));

        let kinds = agent
            .store()
            .build_context_entries_verbose()
            .expect("context")
            .iter()
            .map(Entry::kind)
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                EntryKind::TurnStart,
                EntryKind::Message,
                EntryKind::ToolCall,
                EntryKind::ToolResult,
                EntryKind::Message,
                EntryKind::TurnEnd,
            ]
        );
        assert!(matches!(events.first(), Some(RunEvent::Started { run_id: 1 })));
        assert!(matches!(events.last(), Some(RunEvent::Finished { run_id: 1 })));
    }

    #[test]
    fn turns_are_numbered_from_the_log() {
        let (_dir, mut agent) = agent(AgentOptions::default());
        agent.run_turn("hi", &mut |_| {}).expect("first turn");
        let second = agent.run_turn("again", &mut |_| {}).expect("second turn");
        assert_eq!(second.turn, 2);
        assert_eq!(second.reply.as_deref(), Some("You said: again"));
    }

    #[test]
    fn auto_compaction_triggers_past_threshold() {
        let (_dir, mut agent) = agent(AgentOptions {
            compact_threshold: Some(1),
            keep_last: 1,
            ..AgentOptions::default()
        });
        let mut events = Vec::new();

        let outcome = agent
            .run_turn("a prompt long enough to cross the threshold", &mut |event| {
                events.push(event)
            })
            .expect("turn");

        let summary_id = outcome.compacted_into.expect("compacted");
        assert!(events
            .iter()
            .any(|event| matches!(event, RunEvent::Compacted { .. })));
        let context = agent.store().build_context_entries().expect("context");
        assert_eq!(context[0].id(), Some(summary_id.as_str()));
        assert_eq!(context.len(), 2);
    }
}
