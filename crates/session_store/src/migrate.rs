//! Version-aware replay of a session document into typed entries.
//!
//! The header's `version` is fixed once the first line is read and decides how
//! every later record is linked:
//!
//! - v1 records carry no `id`/`parentId`. Ids are synthesized as `legacy-<n>`
//!   (position among id-bearing records) and each parent is the previous
//!   id-bearing record. Compactions name their retained tail with a numeric
//!   `firstKeptEntryIndex`, patched to an id once the whole file is known.
//! - v2 records link explicitly; roles are taken at face value, with any
//!   non-plain role kept as the message origin.
//! - v3 adds legacy role folding and keeps the nested `message` mirror in sync.
//!
//! Snake-case field spellings from older writers are accepted for v1 and v2.
//! Records that cannot be decoded are skipped; loading never fails on content.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::codec::parse_line;
use crate::content::{extract_text, normalize_role};
use crate::schema::{Entry, EntryKind, SessionHeader, CURRENT_VERSION};

const LEGACY_FIELD_NAMES: [(&str, &str); 11] = [
    ("parent_id", "parentId"),
    ("first_kept_entry_id", "firstKeptEntryId"),
    ("first_kept_entry_index", "firstKeptEntryIndex"),
    ("tokens_before", "tokensBefore"),
    ("from_hook", "fromHook"),
    ("from_id", "fromId"),
    ("target_id", "targetId"),
    ("custom_type", "customType"),
    ("thinking_level", "thinkingLevel"),
    ("model_id", "modelId"),
    ("user_message_id", "userMessageId"),
];

/// Result of replaying one session file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    pub header: Option<SessionHeader>,
    /// Schema version the file was interpreted with.
    pub version: u32,
    /// Every decoded record in file order, header included.
    pub entries: Vec<Entry>,
}

impl LoadedSession {
    #[must_use]
    pub fn id_set(&self) -> HashSet<&str> {
        self.entries.iter().filter_map(Entry::id).collect()
    }

    #[must_use]
    pub fn contains_id(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id() == Some(id))
    }

    /// True when the file holds nothing beyond an optional header.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| matches!(entry, Entry::Header(_)))
    }
}

struct PendingPatch {
    slot: usize,
    position: usize,
    line: usize,
}

struct Resolver {
    header: Option<SessionHeader>,
    version: u32,
    saw_first_line: bool,
    entries: Vec<Entry>,
    id_slots: Vec<usize>,
    seen_ids: HashSet<String>,
    last_id: Option<String>,
    pending: Vec<PendingPatch>,
}

/// Replays a whole session document. Never fails: bad lines are skipped.
#[must_use]
pub fn resolve_document(text: &str) -> LoadedSession {
    let mut resolver = Resolver::new();
    for (index, raw) in text.split('\n').enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        resolver.accept(index + 1, line);
    }
    resolver.finish()
}

impl Resolver {
    fn new() -> Self {
        Self {
            header: None,
            version: CURRENT_VERSION,
            saw_first_line: false,
            entries: Vec::new(),
            id_slots: Vec::new(),
            seen_ids: HashSet::new(),
            last_id: None,
            pending: Vec::new(),
        }
    }

    fn accept(&mut self, line: usize, text: &str) {
        let first = !self.saw_first_line;
        self.saw_first_line = true;

        let Some(mut fields) = parse_line(text) else {
            debug!(line, "skipping line that is not a JSON object");
            return;
        };
        let Some(kind) = fields
            .get("type")
            .and_then(Value::as_str)
            .and_then(EntryKind::from_tag)
        else {
            debug!(line, "skipping record with a missing or unknown type");
            return;
        };

        if kind == EntryKind::Header {
            if first {
                self.accept_header(line, fields);
            } else {
                debug!(line, "ignoring session header that is not the first line");
            }
            return;
        }
        if first {
            debug!(line, "session file has no header; reading it with current rules");
        }

        fields.insert("type".to_string(), Value::String(kind.tag().to_string()));
        if self.version < 3 {
            rename_legacy_fields(kind, &mut fields);
        }

        if kind.carries_id() && !self.link(&mut fields) {
            debug!(line, kind = kind.tag(), "skipping record without an id");
            return;
        }

        let patch_position = if kind == EntryKind::Compaction {
            self.take_index_patch(&mut fields)
        } else {
            None
        };

        if let Err(reason) = normalize_payload(kind, &mut fields, self.version) {
            debug!(line, kind = kind.tag(), reason, "skipping record");
            return;
        }

        let mut entry = match serde_json::from_value::<Entry>(Value::Object(fields)) {
            Ok(entry) => entry,
            Err(error) => {
                debug!(line, kind = kind.tag(), %error, "skipping record with missing required fields");
                return;
            }
        };

        if let Entry::Message(message) = &mut entry {
            if self.version >= 3 {
                message.sync_mirror();
            } else {
                message.message = None;
            }
        }

        self.push(line, entry, patch_position);
    }

    fn accept_header(&mut self, line: usize, fields: Map<String, Value>) {
        match serde_json::from_value::<SessionHeader>(Value::Object(fields)) {
            Ok(header) => {
                if header.version > CURRENT_VERSION {
                    warn!(
                        line,
                        version = header.version,
                        "session file is newer than this reader; using current rules"
                    );
                }
                self.version = header.version.clamp(1, CURRENT_VERSION);
                self.entries.push(Entry::Header(header.clone()));
                self.header = Some(header);
            }
            Err(error) => debug!(line, %error, "skipping malformed session header"),
        }
    }

    /// Fills in `id`/`parentId` per the file's version. Returns false when the
    /// record cannot be linked.
    fn link(&self, fields: &mut Map<String, Value>) -> bool {
        let has_id = fields
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty());

        if self.version > 1 {
            return has_id;
        }

        if !has_id {
            fields.insert("id".to_string(), Value::String(self.synthesized_id()));
        }
        if !fields.contains_key("parentId") {
            let parent = self.last_id.clone().map_or(Value::Null, Value::String);
            fields.insert("parentId".to_string(), parent);
        }
        true
    }

    fn synthesized_id(&self) -> String {
        let position = self.id_slots.len();
        let base = format!("legacy-{position}");
        if !self.seen_ids.contains(&base) {
            return base;
        }
        (1..)
            .map(|suffix| format!("{base}-{suffix}"))
            .find(|candidate| !self.seen_ids.contains(candidate))
            .unwrap_or(base)
    }

    fn take_index_patch(&self, fields: &mut Map<String, Value>) -> Option<usize> {
        if self.version > 1 {
            return None;
        }
        let index = fields.remove("firstKeptEntryIndex")?.as_u64()?;
        if fields
            .get("firstKeptEntryId")
            .is_some_and(|value| !value.is_null())
        {
            return None;
        }
        usize::try_from(index).ok()
    }

    fn push(&mut self, line: usize, entry: Entry, patch_position: Option<usize>) {
        let slot = self.entries.len();
        if let Some(id) = entry.id() {
            if !self.seen_ids.insert(id.to_string()) {
                debug!(line, id, "duplicate entry id; the first occurrence wins lookups");
            }
            self.id_slots.push(slot);
            self.last_id = Some(id.to_string());
        }
        if let Some(position) = patch_position {
            self.pending.push(PendingPatch {
                slot,
                position,
                line,
            });
        }
        self.entries.push(entry);
    }

    fn finish(mut self) -> LoadedSession {
        for patch in std::mem::take(&mut self.pending) {
            let target = self
                .id_slots
                .get(patch.position)
                .and_then(|&slot| self.entries[slot].id())
                .map(str::to_owned);

            match (target, self.entries.get_mut(patch.slot)) {
                (Some(target), Some(Entry::Compaction(compaction))) => {
                    compaction.first_kept_entry_id = Some(target);
                }
                _ => warn!(
                    line = patch.line,
                    position = patch.position,
                    "legacy compaction index names no entry; it keeps no retained tail"
                ),
            }
        }

        LoadedSession {
            header: self.header,
            version: self.version,
            entries: self.entries,
        }
    }
}

fn rename_field(fields: &mut Map<String, Value>, from: &str, to: &str) {
    if fields.contains_key(to) {
        return;
    }
    if let Some(value) = fields.remove(from) {
        fields.insert(to.to_string(), value);
    }
}

fn rename_legacy_fields(kind: EntryKind, fields: &mut Map<String, Value>) {
    for (from, to) in LEGACY_FIELD_NAMES {
        rename_field(fields, from, to);
    }

    match kind {
        EntryKind::ToolCall | EntryKind::ToolResult => {
            for from in ["toolName", "tool_name", "name"] {
                rename_field(fields, from, "tool");
            }
            if kind == EntryKind::ToolCall {
                for from in ["args", "input", "arguments"] {
                    rename_field(fields, from, "arg");
                }
            } else {
                rename_field(fields, "is_error", "isError");
            }
        }
        EntryKind::Message => rename_field(fields, "text", "content"),
        _ => {}
    }
}

fn normalize_payload(
    kind: EntryKind,
    fields: &mut Map<String, Value>,
    version: u32,
) -> Result<(), &'static str> {
    match kind {
        EntryKind::Message => normalize_message(fields, version),
        EntryKind::ToolCall => {
            let arg = match fields.get("arg") {
                None | Some(Value::Null) => return Err("tool call has no arg"),
                Some(Value::String(arg)) => arg.clone(),
                Some(other) => other.to_string(),
            };
            fields.insert("arg".to_string(), Value::String(arg));
            Ok(())
        }
        EntryKind::ToolResult => {
            if !fields.contains_key("ok") {
                let is_error = fields
                    .get("isError")
                    .and_then(Value::as_bool)
                    .ok_or("tool result has no ok flag")?;
                fields.insert("ok".to_string(), Value::Bool(!is_error));
            }
            replace_with_text(fields, "content").ok_or("tool result has no content")
        }
        EntryKind::Compaction => {
            let known_format = fields
                .get("format")
                .and_then(Value::as_str)
                .map_or(true, |format| {
                    matches!(format, "text" | "plain" | "md" | "markdown" | "json")
                });
            if !known_format {
                fields.remove("format");
            }
            replace_with_text(fields, "summary").ok_or("compaction has no summary")
        }
        EntryKind::BranchSummary => {
            replace_with_text(fields, "summary").ok_or("branch summary has no summary")
        }
        EntryKind::CustomMessage => {
            replace_with_text(fields, "content").ok_or("custom message has no content")
        }
        _ => Ok(()),
    }
}

fn replace_with_text(fields: &mut Map<String, Value>, key: &str) -> Option<()> {
    let text = fields.get(key).and_then(extract_text)?;
    fields.insert(key.to_string(), Value::String(text));
    Some(())
}

fn normalize_message(fields: &mut Map<String, Value>, version: u32) -> Result<(), &'static str> {
    if let Some(Value::Object(mirror)) = fields.remove("message") {
        for key in ["role", "content", "provider", "model"] {
            if fields.get(key).map_or(true, Value::is_null) {
                if let Some(value) = mirror.get(key).filter(|value| !value.is_null()) {
                    fields.insert(key.to_string(), value.clone());
                }
            }
        }
        if !fields.contains_key("usageTotal") {
            let total = mirror.get("usage").and_then(|usage| {
                usage
                    .get("totalTokens")
                    .or_else(|| usage.get("total_tokens"))
                    .and_then(Value::as_u64)
            });
            if let Some(total) = total {
                fields.insert("usageTotal".to_string(), Value::from(total));
            }
        }
    }

    let raw_role = fields
        .get("role")
        .and_then(Value::as_str)
        .ok_or("message has no role")?;
    let (role, origin) = normalize_role(raw_role, version).ok_or("message has an unsupported role")?;
    fields.insert("role".to_string(), Value::String(role.as_str().to_string()));
    if let Some(origin) = origin {
        fields
            .entry("origin".to_string())
            .or_insert_with(|| Value::String(origin));
    }

    replace_with_text(fields, "content").ok_or("message has no content")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::resolve_document;
    use crate::schema::{Entry, Role};

    fn document(lines: &[serde_json::Value]) -> String {
        lines
            .iter()
            .map(serde_json::Value::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn v1_ids_and_parents_follow_file_order() {
        let text = document(&[
            json!({"type": "session", "version": 1, "id": "s", "cwd": "/tmp"}),
            json!({"type": "message", "role": "user", "content": "a"}),
            json!({"type": "message", "role": "assistant", "text": "b"}),
        ]);

        let loaded = resolve_document(&text);
        assert_eq!(loaded.version, 1);
        let ids = loaded
            .entries
            .iter()
            .filter_map(|entry| entry.id().map(|id| (id, entry.parent_id())))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![("legacy-0", None), ("legacy-1", Some("legacy-0"))]);
    }

    #[test]
    fn v1_compaction_index_is_patched_after_full_scan() {
        let text = document(&[
            json!({"type": "session", "version": 1}),
            json!({"type": "message", "role": "user", "content": "a"}),
            json!({"type": "compaction", "summary": "s", "firstKeptEntryIndex": 2}),
            json!({"type": "message", "role": "user", "content": "c"}),
        ]);

        let loaded = resolve_document(&text);
        let Some(Entry::Compaction(compaction)) = loaded.entries.get(2) else {
            panic!("compaction should decode");
        };
        assert_eq!(compaction.first_kept_entry_id.as_deref(), Some("legacy-2"));
    }

    #[test]
    fn v1_out_of_range_index_leaves_legacy_compaction() {
        let text = document(&[
            json!({"type": "session", "version": 1}),
            json!({"type": "compaction", "summary": "s", "firstKeptEntryIndex": 9}),
        ]);

        let loaded = resolve_document(&text);
        let Some(Entry::Compaction(compaction)) = loaded.entries.get(1) else {
            panic!("compaction should decode");
        };
        assert_eq!(compaction.first_kept_entry_id, None);
    }

    #[test]
    fn v2_records_without_ids_are_skipped() {
        let text = document(&[
            json!({"type": "session", "version": 2}),
            json!({"type": "message", "role": "user", "content": "orphan"}),
            json!({"type": "message", "id": "m1", "parentId": null, "role": "user", "content": "kept"}),
        ]);

        let loaded = resolve_document(&text);
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.entries[1].id(), Some("m1"));
    }

    #[test]
    fn v2_takes_roles_at_face_value() {
        let text = document(&[
            json!({"type": "session", "version": 2}),
            json!({"type": "message", "id": "m1", "parentId": null, "role": "hookMessage", "content": "x"}),
            json!({"type": "message", "id": "m2", "parentId": "m1", "role": "toolResult", "content": "y"}),
        ]);

        let loaded = resolve_document(&text);
        assert_eq!(loaded.entries.len(), 3);
        let Entry::Message(hook) = &loaded.entries[1] else {
            panic!("expected a message, got {:?}", loaded.entries[1]);
        };
        assert_eq!(hook.role, Role::User);
        assert_eq!(hook.origin.as_deref(), Some("hookMessage"));
        let Entry::Message(result) = &loaded.entries[2] else {
            panic!("expected a message, got {:?}", loaded.entries[2]);
        };
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.content, "y");
    }

    #[test]
    fn v3_folds_roles_and_rebuilds_mirror() {
        let text = document(&[
            json!({"type": "session", "version": 3}),
            json!({
                "type": "message",
                "id": "m1",
                "parentId": null,
                "message": {
                    "role": "hookMessage",
                    "content": [{"type": "text", "text": "from hook"}],
                    "provider": "mock",
                    "usage": {"totalTokens": 12}
                }
            }),
        ]);

        let loaded = resolve_document(&text);
        let Some(Entry::Message(message)) = loaded.entries.get(1) else {
            panic!("message should decode");
        };
        assert_eq!(message.role, Role::User);
        assert_eq!(message.origin.as_deref(), Some("custom"));
        assert_eq!(message.content, "from hook");
        assert_eq!(message.usage_total, Some(12));
        let mirror = message.message.as_ref().expect("mirror should be rebuilt");
        assert_eq!(mirror.role, Role::User);
        assert_eq!(mirror.content, "from hook");
        assert_eq!(mirror.provider.as_deref(), Some("mock"));
    }

    #[test]
    fn summary_tag_and_unknown_kinds() {
        let text = document(&[
            json!({"type": "session", "version": 3}),
            json!({"type": "summary", "id": "s1", "summary": "folded"}),
            json!({"type": "telemetry", "id": "t1"}),
            json!({"type": "tool_result", "id": "r1", "tool": "shell", "isError": true, "content": "boom"}),
        ]);

        let loaded = resolve_document(&text);
        assert_eq!(loaded.entries.len(), 3);
        assert!(matches!(loaded.entries[1], Entry::Compaction(_)));
        let Entry::ToolResult(result) = &loaded.entries[2] else {
            panic!("tool result should decode");
        };
        assert!(!result.ok);
    }

    #[test]
    fn headerless_files_read_as_current_version() {
        let text = document(&[json!({"type": "message", "id": "m1", "role": "toolResult", "content": "x"})]);
        let loaded = resolve_document(&text);
        assert_eq!(loaded.header, None);
        assert_eq!(loaded.entries[0].role(), Some(Role::Tool));
    }
}
