//! Folding a prefix of the active context into one summary record.
//!
//! The log is never rewritten. Compaction appends a summary whose
//! `firstKeptEntryId` marks where the verbatim tail starts, then a leaf record
//! pointing at it; context assembly does the rest.

use serde_json::{json, Value};
use tracing::info;

use crate::content::preview;
use crate::error::SessionStoreError;
use crate::schema::{CompactionEntry, Entry, Role, SummaryFormat};
use crate::store::{NewCompaction, SessionStore};

pub const DEFAULT_KEEP_LAST: usize = 4;

const NONE_LINE: &str = "- (none)";
const NEXT_STEP_PLACEHOLDER: &str = "1. Continue from the most recent retained entry.";

const GOAL: &str = "## Goal";
const CONSTRAINTS: &str = "## Constraints & Preferences";
const PROGRESS: &str = "## Progress";
const KEY_DECISIONS: &str = "## Key Decisions";
const NEXT_STEPS: &str = "## Next Steps";
const CRITICAL_CONTEXT: &str = "## Critical Context";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactOptions {
    /// Most recent business entries kept verbatim after the summary.
    pub keep_last: usize,
    pub format: SummaryFormat,
    /// Label applied to the new summary record.
    pub label: Option<String>,
    /// Patch the previous markdown summary on the path instead of starting over.
    pub merge: bool,
    /// Threshold that triggered an automatic compaction, if any.
    pub threshold: Option<u64>,
}

impl Default for CompactOptions {
    fn default() -> Self {
        Self {
            keep_last: DEFAULT_KEEP_LAST,
            format: SummaryFormat::Text,
            label: None,
            merge: false,
            threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutcome {
    pub summary_id: String,
    pub first_kept_entry_id: Option<String>,
    /// Business entries folded into the summary.
    pub summarized: usize,
    /// Business entries retained verbatim.
    pub kept: usize,
    pub tokens_before: u64,
    /// True when an earlier markdown summary was patched.
    pub merged: bool,
}

impl SessionStore {
    /// Summarizes everything but the last `keep_last` business entries.
    ///
    /// Fails with [`SessionStoreError::NothingToCompact`] when no entry would
    /// be folded.
    pub fn compact(
        &mut self,
        options: CompactOptions,
    ) -> Result<CompactionOutcome, SessionStoreError> {
        let context = self.build_context_entries()?;
        let split = context.len().saturating_sub(options.keep_last);
        if split == 0 {
            return Err(SessionStoreError::NothingToCompact {
                path: self.path().to_path_buf(),
            });
        }

        let (folded, kept) = context.split_at(split);
        let first_kept_entry_id = kept.first().and_then(Entry::id).map(str::to_owned);
        let tokens_before = estimate_entries(&context);
        let preview_chars = self.config().preview_chars;

        let previous = options
            .merge
            .then(|| previous_markdown_summary(folded))
            .flatten();
        let (summary, format) = match previous {
            Some(previous) => {
                let fresh = folded
                    .iter()
                    .filter(|entry| entry.id() != Some(previous.meta.id.as_str()))
                    .collect::<Vec<_>>();
                (
                    merge_markdown(&previous.summary, &fresh, preview_chars),
                    SummaryFormat::Md,
                )
            }
            None => {
                let folded = folded.iter().collect::<Vec<_>>();
                (render(options.format, &folded, preview_chars), options.format)
            }
        };
        let merged = previous.is_some();

        let summary_id = self.append_compaction_with(NewCompaction {
            summary,
            reason: if options.threshold.is_some() {
                "threshold".to_string()
            } else {
                "manual".to_string()
            },
            format,
            first_kept_entry_id: first_kept_entry_id.clone(),
            tokens_before,
            context_size: Some(tokens_before),
            threshold: options.threshold,
            ..NewCompaction::default()
        })?;

        if let Some(label) = options.label.as_deref() {
            self.set_label(&summary_id, Some(label))?;
        }

        info!(
            summary_id = %summary_id,
            summarized = folded.len(),
            kept = kept.len(),
            tokens_before,
            merged,
            "compacted session context"
        );

        Ok(CompactionOutcome {
            summary_id,
            first_kept_entry_id,
            summarized: folded.len(),
            kept: kept.len(),
            tokens_before,
            merged,
        })
    }

    /// Token estimate of the business context.
    ///
    /// The latest assistant usage total counts for everything up to that
    /// message; later entries are estimated from their text.
    pub fn estimate_context_tokens(&self) -> Result<u64, SessionStoreError> {
        Ok(estimate_entries(&self.build_context_entries()?))
    }

    /// True when the context estimate exceeds `threshold`. Zero disables it.
    pub fn should_compact(&self, threshold: u64) -> Result<bool, SessionStoreError> {
        if threshold == 0 {
            return Ok(false);
        }
        Ok(self.estimate_context_tokens()? > threshold)
    }
}

fn estimate_entries(entries: &[Entry]) -> u64 {
    let last_usage = entries
        .iter()
        .enumerate()
        .rev()
        .find_map(|(position, entry)| match entry {
            Entry::Message(message) if message.role == Role::Assistant => {
                message.usage_total.map(|total| (position, total))
            }
            _ => None,
        });

    match last_usage {
        Some((position, total)) => {
            total
                + entries[position + 1..]
                    .iter()
                    .map(Entry::token_estimate)
                    .sum::<u64>()
        }
        None => entries.iter().map(Entry::token_estimate).sum(),
    }
}

fn previous_markdown_summary(folded: &[Entry]) -> Option<&CompactionEntry> {
    folded.iter().rev().find_map(|entry| match entry {
        Entry::Compaction(compaction) if compaction.format == SummaryFormat::Md => {
            Some(compaction)
        }
        _ => None,
    })
}

fn describe(entry: &Entry) -> String {
    match entry {
        Entry::Message(message) => match &message.origin {
            Some(origin) => format!("{} ({origin})", message.role.as_str()),
            None => message.role.as_str().to_string(),
        },
        Entry::ToolCall(call) => format!("tool call {}", call.tool),
        Entry::ToolResult(result) if result.ok => format!("tool result {}", result.tool),
        Entry::ToolResult(result) => format!("tool result {} (failed)", result.tool),
        Entry::Compaction(_) => "earlier summary".to_string(),
        Entry::BranchSummary(summary) => format!("branch summary from {}", summary.from_id),
        Entry::CustomMessage(message) => format!("custom {}", message.custom_type),
        other => other.kind().tag().to_string(),
    }
}

fn preview_line(entry: &Entry, preview_chars: usize) -> String {
    let body = preview(entry.content().unwrap_or_default(), preview_chars);
    format!("- {}: {body}", describe(entry))
}

fn render(format: SummaryFormat, folded: &[&Entry], preview_chars: usize) -> String {
    match format {
        SummaryFormat::Text => render_text(folded, preview_chars),
        SummaryFormat::Json => render_json(folded, preview_chars),
        SummaryFormat::Md => render_markdown(folded, preview_chars),
    }
}

fn render_text(folded: &[&Entry], preview_chars: usize) -> String {
    let mut lines = vec![format!("Summary of {} earlier entries:", folded.len())];
    lines.extend(folded.iter().map(|entry| preview_line(entry, preview_chars)));
    lines.join("\n")
}

fn render_json(folded: &[&Entry], preview_chars: usize) -> String {
    let items = folded
        .iter()
        .map(|entry| {
            let mut item = json!({
                "id": entry.id(),
                "type": entry.kind().tag(),
                "preview": preview(entry.content().unwrap_or_default(), preview_chars),
            });
            if let (Some(role), Value::Object(fields)) = (entry.role(), &mut item) {
                fields.insert("role".to_string(), Value::from(role.as_str()));
            }
            item
        })
        .collect::<Vec<_>>();

    json!({
        "summarized": folded.len(),
        "goal": null,
        "decisions": [],
        "nextSteps": [],
        "entries": items,
    })
    .to_string()
}

fn render_markdown(folded: &[&Entry], preview_chars: usize) -> String {
    let user_previews = folded
        .iter()
        .filter(|entry| entry.role() == Some(Role::User))
        .map(|entry| preview(entry.content().unwrap_or_default(), preview_chars))
        .collect::<Vec<_>>();

    let mut done = Vec::new();
    let mut blocked = Vec::new();
    for entry in folded {
        if let Entry::ToolResult(result) = entry {
            let line = format!("{}: {}", result.tool, preview(&result.content, preview_chars));
            if result.ok {
                done.push(format!("- [x] {line}"));
            } else {
                blocked.push(format!("- {line}"));
            }
        }
    }

    let goal = user_previews
        .first()
        .cloned()
        .unwrap_or_else(|| "(unknown)".to_string());
    let in_progress = user_previews
        .last()
        .filter(|_| user_previews.len() > 1)
        .map_or_else(|| "- [ ] (none)".to_string(), |last| format!("- [ ] {last}"));
    let critical = folded
        .iter()
        .map(|entry| preview_line(entry, preview_chars))
        .collect::<Vec<_>>();

    let mut progress = vec!["### Done".to_string()];
    progress.extend(or_none(done, "- [x] (none)"));
    progress.push("### In Progress".to_string());
    progress.push(in_progress);
    progress.push("### Blocked".to_string());
    progress.extend(or_none(blocked, NONE_LINE));

    let sections = vec![
        Section::new(GOAL, vec![goal]),
        Section::new(CONSTRAINTS, vec![NONE_LINE.to_string()]),
        Section::new(PROGRESS, progress),
        Section::new(KEY_DECISIONS, vec![NONE_LINE.to_string()]),
        Section::new(NEXT_STEPS, Vec::new()),
        Section::new(CRITICAL_CONTEXT, or_none(critical, NONE_LINE)),
    ];
    render_sections(&[], &sections)
}

fn or_none(lines: Vec<String>, none: &str) -> Vec<String> {
    if lines.is_empty() {
        vec![none.to_string()]
    } else {
        lines
    }
}

/// Patches a previous markdown summary in place of rebuilding it.
///
/// An empty "Next Steps" list gets a placeholder step and the previews of
/// `fresh` are appended to "Critical Context". Other sections are untouched.
fn merge_markdown(previous: &str, fresh: &[&Entry], preview_chars: usize) -> String {
    let (preamble, mut sections) = split_sections(previous);

    match sections.iter_mut().find(|section| section.heading == NEXT_STEPS) {
        Some(next_steps) if next_steps.is_blank() => {
            next_steps.body = vec![NEXT_STEP_PLACEHOLDER.to_string()];
        }
        Some(_) => {}
        None => sections.push(Section::new(
            NEXT_STEPS,
            vec![NEXT_STEP_PLACEHOLDER.to_string()],
        )),
    }

    let additions = fresh
        .iter()
        .map(|entry| preview_line(entry, preview_chars))
        .collect::<Vec<_>>();
    match sections
        .iter_mut()
        .find(|section| section.heading == CRITICAL_CONTEXT)
    {
        Some(critical) => {
            if !additions.is_empty() {
                critical.body.retain(|line| line.trim() != NONE_LINE);
            }
            critical.body.extend(additions);
            if critical.is_blank() {
                critical.body.push(NONE_LINE.to_string());
            }
        }
        None => sections.push(Section::new(CRITICAL_CONTEXT, or_none(additions, NONE_LINE))),
    }

    render_sections(&preamble, &sections)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    heading: String,
    body: Vec<String>,
}

impl Section {
    fn new(heading: &str, body: Vec<String>) -> Self {
        Self {
            heading: heading.to_string(),
            body,
        }
    }

    fn is_blank(&self) -> bool {
        self.body.iter().all(|line| line.trim().is_empty())
    }

    fn trim_trailing_blank(&mut self) {
        while self.body.last().is_some_and(|line| line.trim().is_empty()) {
            self.body.pop();
        }
    }
}

/// Splits on level-two headings. Lines before the first heading are returned separately.
fn split_sections(text: &str) -> (Vec<String>, Vec<Section>) {
    let mut preamble = Vec::new();
    let mut sections: Vec<Section> = Vec::new();

    for line in text.lines() {
        if line.starts_with("## ") {
            sections.push(Section::new(line.trim_end(), Vec::new()));
        } else if let Some(section) = sections.last_mut() {
            section.body.push(line.to_string());
        } else {
            preamble.push(line.to_string());
        }
    }
    for section in &mut sections {
        section.trim_trailing_blank();
    }

    (preamble, sections)
}

fn render_sections(preamble: &[String], sections: &[Section]) -> String {
    let mut blocks = Vec::new();

    let preamble = preamble.join("\n");
    if !preamble.trim().is_empty() {
        blocks.push(preamble.trim_end().to_string());
    }

    for section in sections {
        let mut section = section.clone();
        section.trim_trailing_blank();
        while section.body.first().is_some_and(|line| line.trim().is_empty()) {
            section.body.remove(0);
        }

        let mut block = section.heading;
        for line in section.body {
            block.push('\n');
            block.push_str(&line);
        }
        blocks.push(block);
    }

    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{merge_markdown, render_markdown, split_sections, NEXT_STEP_PLACEHOLDER};
    use crate::schema::{Entry, EntryMeta, MessageEntry, Role, ToolResultEntry};

    fn meta(id: &str) -> EntryMeta {
        EntryMeta {
            id: id.to_string(),
            parent_id: None,
            timestamp: String::new(),
        }
    }

    fn message(id: &str, role: Role, content: &str) -> Entry {
        Entry::Message(MessageEntry {
            meta: meta(id),
            role,
            content: content.to_string(),
            origin: None,
            tokens: None,
            usage_total: None,
            provider: None,
            model: None,
            thinking: None,
            message: None,
        })
    }

    #[test]
    fn fresh_markdown_has_fixed_sections_and_empty_next_steps() {
        let entries = [
            message("m1", Role::User, "refactor the parser"),
            Entry::ToolResult(ToolResultEntry {
                meta: meta("r1"),
                tool: "shell".to_string(),
                ok: false,
                content: "exit 2".to_string(),
                tokens: None,
            }),
        ];
        let refs = entries.iter().collect::<Vec<_>>();
        let summary = render_markdown(&refs, 80);

        let (_, sections) = split_sections(&summary);
        let headings = sections
            .iter()
            .map(|section| section.heading.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            headings,
            vec![
                "## Goal",
                "## Constraints & Preferences",
                "## Progress",
                "## Key Decisions",
                "## Next Steps",
                "## Critical Context",
            ]
        );
        assert_eq!(sections[0].body, vec!["refactor the parser".to_string()]);
        assert!(sections[4].is_blank());
        assert!(summary.contains("### Blocked\n- shell: exit 2"));
    }

    #[test]
    fn merge_fills_next_steps_and_appends_critical_context() {
        let previous = "## Goal\nship it\n\n## Next Steps\n\n## Critical Context\n- (none)";
        let fresh = message("m9", Role::Assistant, "tests pass now");
        let merged = merge_markdown(previous, &[&fresh], 80);

        assert_eq!(
            merged,
            format!(
                "## Goal\nship it\n\n## Next Steps\n{NEXT_STEP_PLACEHOLDER}\n\n## Critical Context\n- assistant: tests pass now"
            )
        );
    }

    #[test]
    fn merge_keeps_existing_next_steps() {
        let previous = "## Next Steps\n1. Write docs\n\n## Critical Context\n- user: old";
        let fresh = message("m2", Role::User, "new");
        let merged = merge_markdown(previous, &[&fresh], 80);
        assert_eq!(
            merged,
            "## Next Steps\n1. Write docs\n\n## Critical Context\n- user: old\n- user: new"
        );
    }
}
