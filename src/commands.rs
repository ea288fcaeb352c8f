//! Subcommand execution. Output goes to the supplied writer so tests can
//! capture it.

use std::io::Write;
use std::path::Path;

use agent_provider::RunEvent;
use agent_provider_mock::MockModel;
use anyhow::{Context, Result};
use session_store::{preview, CompactOptions, Entry, LeafState, SessionStore, SessionStoreError};
use tracing::debug;

use crate::agent::{Agent, AgentOptions};
use crate::cli::{Cli, Commands};
use crate::config::EnvConfig;
use crate::tools::BuiltinTools;

pub fn execute(cli: Cli, config: &EnvConfig, cwd: &Path, out: &mut dyn Write) -> Result<()> {
    let mut store = open_session(cli.session.as_deref(), config, cwd)?;
    debug!(path = %store.path().display(), "using session");

    match cli.command {
        Commands::Init => {
            writeln!(out, "{}", store.path().display())?;
        }
        Commands::Append { role, content } => {
            let id = store.append_message(role.into(), content)?;
            writeln!(out, "{id}")?;
        }
        Commands::ToolCall { tool, arg } => {
            let id = store.append_tool_call(tool, arg)?;
            writeln!(out, "{id}")?;
        }
        Commands::ToolResult {
            tool,
            content,
            failed,
        } => {
            let id = store.append_tool_result(tool, !failed, content)?;
            writeln!(out, "{id}")?;
        }
        Commands::Entries => {
            let preview_chars = store.config().preview_chars;
            for entry in store.load_entries()? {
                writeln!(out, "{}", describe_entry(&entry, preview_chars))?;
            }
        }
        Commands::Context { verbose, json } => {
            let entries = if verbose {
                store.build_context_entries_verbose()?
            } else {
                store.build_context_entries()?
            };
            let preview_chars = store.config().preview_chars;
            for entry in &entries {
                if json {
                    let line =
                        serde_json::to_string(entry).context("failed to serialize entry")?;
                    writeln!(out, "{line}")?;
                } else {
                    writeln!(out, "{}", describe_entry(entry, preview_chars))?;
                }
            }
        }
        Commands::Branch { id, root } => {
            let target = if root { None } else { id.as_deref() };
            store.branch_to(target)?;
            writeln!(out, "{}", target.unwrap_or("(root)"))?;
        }
        Commands::Label { id, label, clear } => {
            let label = if clear { None } else { label.as_deref() };
            store.set_label(&id, label)?;
        }
        Commands::Labels => {
            for (id, label) in store.labels()? {
                writeln!(out, "{id}\t{label}")?;
            }
        }
        Commands::Compact {
            keep_last,
            format,
            label,
            merge,
        } => {
            let outcome = store.compact(CompactOptions {
                keep_last: keep_last.unwrap_or(config.compact_keep_last),
                format: format.into(),
                label,
                merge,
                threshold: None,
            })?;
            writeln!(
                out,
                "{} summarized={} kept={} tokens_before={}{}",
                outcome.summary_id,
                outcome.summarized,
                outcome.kept,
                outcome.tokens_before,
                if outcome.merged { " merged" } else { "" }
            )?;
        }
        Commands::Run { prompt, max_steps } => {
            let tools = BuiltinTools::new(config.shell_timeout_sec).with_cwd(cwd);
            let options = AgentOptions {
                max_steps,
                compact_threshold: config.compact_threshold_tokens,
                keep_last: config.compact_keep_last,
            };
            let mut agent = Agent::new(store, MockModel::default(), tools, options);
            let mut events = Vec::new();
            let outcome = agent.run_turn(&prompt, &mut |event| events.push(event))?;
            for event in &events {
                if let Some(line) = describe_event(event) {
                    writeln!(out, "{line}")?;
                }
            }
            if outcome.reply.is_none() {
                writeln!(out, "no reply after {max_steps} steps")?;
            }
        }
        Commands::Leaf => {
            let line = match store.leaf()? {
                LeafState::Implicit { head } => {
                    format!("implicit head={}", head.as_deref().unwrap_or("-"))
                }
                LeafState::Root => "root".to_string(),
                LeafState::Pointer {
                    target,
                    head,
                    dangling,
                } => format!(
                    "pointer target={target} head={}{}",
                    head.as_deref().unwrap_or("-"),
                    if dangling { " dangling" } else { "" }
                ),
            };
            writeln!(out, "{line}")?;
        }
    }

    Ok(())
}

/// Explicit path first, then the newest session under `cwd`, then a new one.
fn open_session(
    explicit: Option<&Path>,
    config: &EnvConfig,
    cwd: &Path,
) -> Result<SessionStore> {
    let store = match explicit {
        Some(path) => SessionStore::open(path),
        None => match SessionStore::latest_session_path(cwd) {
            Ok(path) => SessionStore::open(path),
            Err(SessionStoreError::NoSessionsFound { .. }) => SessionStore::create_new(cwd)?,
            Err(error) => return Err(error.into()),
        },
    };

    let mut store = store.with_config(config.store_config());
    store
        .ensure(cwd)
        .with_context(|| format!("failed to prepare session {}", store.path().display()))?;
    Ok(store)
}

fn describe_entry(entry: &Entry, preview_chars: usize) -> String {
    let id = entry.id().unwrap_or("-");
    let tag = entry.kind().tag();
    let detail = match entry {
        Entry::Header(header) => format!("v{} cwd={}", header.version, header.cwd),
        Entry::Message(message) => format!(
            "{}: {}",
            message.role.as_str(),
            preview(&message.content, preview_chars)
        ),
        Entry::ToolCall(call) => format!("{} {}", call.tool, preview(&call.arg, preview_chars)),
        Entry::ToolResult(result) => format!(
            "{} {}: {}",
            result.tool,
            if result.ok { "ok" } else { "failed" },
            preview(&result.content, preview_chars)
        ),
        Entry::Leaf(leaf) => format!("-> {}", leaf.target_id.as_deref().unwrap_or("(root)")),
        Entry::Label(label) => format!(
            "{} = {}",
            label.target_id,
            label.label.as_deref().unwrap_or("(cleared)")
        ),
        Entry::TurnStart(marker) | Entry::TurnEnd(marker) => format!("turn {}", marker.turn),
        other => other
            .content()
            .map(|text| preview(text, preview_chars))
            .unwrap_or_default(),
    };
    format!("{id}\t{tag}\t{detail}")
}

fn describe_event(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::ToolCall {
            call_id, tool_name, ..
        } => Some(format!("tool_call {tool_name} ({call_id})")),
        RunEvent::ToolResult {
            call_id, is_error, ..
        } => Some(format!(
            "tool_result {call_id} {}",
            if *is_error { "failed" } else { "ok" }
        )),
        RunEvent::Reply { text, .. } => Some(format!("reply: {text}")),
        RunEvent::Compacted { summary_id, .. } => Some(format!("compacted into {summary_id}")),
        RunEvent::Started { .. } | RunEvent::Finished { .. } | RunEvent::Failed { .. } => None,
    }
}
