use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::estimate_tokens;

/// Schema version written into the header of every newly created session file.
pub const CURRENT_VERSION: u32 = 3;

fn legacy_version() -> u32 {
    1
}

fn default_reason() -> String {
    "manual".to_string()
}

/// Normalized message author. Synthetic legacy roles are folded into these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Rendering used for a compaction summary body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    #[default]
    #[serde(alias = "plain")]
    Text,
    #[serde(alias = "markdown")]
    Md,
    Json,
}

impl SummaryFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Md => "md",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "branchedFrom"
    )]
    pub parent_session: Option<String>,
}

impl SessionHeader {
    #[must_use]
    pub fn current(
        id: impl Into<String>,
        timestamp: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            version: CURRENT_VERSION,
            id: id.into(),
            timestamp: timestamp.into(),
            cwd: cwd.into(),
            parent_session: None,
        }
    }
}

/// Linkage shared by every id-bearing record.
///
/// `parent_id` is serialized as an explicit `null` for roots so readers can tell
/// "attach to nothing" apart from a legacy record that never carried the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorUsage {
    pub total_tokens: u64,
}

/// Nested provider-shaped copy of a message, kept in sync with the top-level fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMirror {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<MirrorUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub role: Role,
    pub content: String,
    /// Legacy role tag this message was normalized from, e.g. `custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageMirror>,
}

impl MessageEntry {
    /// Rebuilds the nested mirror from the top-level fields.
    pub fn sync_mirror(&mut self) {
        self.message = Some(MessageMirror {
            role: self.role,
            content: self.content.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            usage: self.usage_total.map(|total_tokens| MirrorUsage { total_tokens }),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub tool: String,
    pub arg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub tool: String,
    pub ok: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingLevelChangeEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub thinking_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelChangeEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub provider: String,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub summary: String,
    #[serde(default = "default_reason")]
    pub reason: String,
    #[serde(default)]
    pub format: SummaryFormat,
    /// First entry of the retained tail. `None` marks a legacy record that keeps nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_kept_entry_id: Option<String>,
    #[serde(default)]
    pub tokens_before: u64,
    #[serde(default)]
    pub from_hook: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSummaryEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub from_id: String,
    pub summary: String,
    #[serde(default)]
    pub from_hook: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub custom_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMessageEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub custom_type: String,
    pub content: String,
    #[serde(default)]
    pub display: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub turn: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Head pointer update. A `None` target navigates back to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafEntry {
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

/// Label upsert. A `None` label deletes the label of `target_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelEntry {
    pub target_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

/// One persisted line of a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    #[serde(rename = "session")]
    Header(SessionHeader),
    Message(MessageEntry),
    ToolCall(ToolCallEntry),
    ToolResult(ToolResultEntry),
    ThinkingLevelChange(ThinkingLevelChangeEntry),
    ModelChange(ModelChangeEntry),
    SessionInfo(SessionInfoEntry),
    Compaction(CompactionEntry),
    BranchSummary(BranchSummaryEntry),
    Custom(CustomEntry),
    CustomMessage(CustomMessageEntry),
    TurnStart(TurnEntry),
    TurnEnd(TurnEntry),
    Leaf(LeafEntry),
    Label(LabelEntry),
}

/// Fieldless mirror of [`Entry`] used for tag lookups and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Header,
    Message,
    ToolCall,
    ToolResult,
    ThinkingLevelChange,
    ModelChange,
    SessionInfo,
    Compaction,
    BranchSummary,
    Custom,
    CustomMessage,
    TurnStart,
    TurnEnd,
    Leaf,
    Label,
}

impl EntryKind {
    /// Maps a `type` tag to a kind. `summary` is the older spelling of `compaction`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "session" => Self::Header,
            "message" => Self::Message,
            "tool_call" => Self::ToolCall,
            "tool_result" => Self::ToolResult,
            "thinking_level_change" => Self::ThinkingLevelChange,
            "model_change" => Self::ModelChange,
            "session_info" => Self::SessionInfo,
            "compaction" | "summary" => Self::Compaction,
            "branch_summary" => Self::BranchSummary,
            "custom" => Self::Custom,
            "custom_message" => Self::CustomMessage,
            "turn_start" => Self::TurnStart,
            "turn_end" => Self::TurnEnd,
            "leaf" => Self::Leaf,
            "label" => Self::Label,
            _ => return None,
        };
        Some(kind)
    }

    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Header => "session",
            Self::Message => "message",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::ThinkingLevelChange => "thinking_level_change",
            Self::ModelChange => "model_change",
            Self::SessionInfo => "session_info",
            Self::Compaction => "compaction",
            Self::BranchSummary => "branch_summary",
            Self::Custom => "custom",
            Self::CustomMessage => "custom_message",
            Self::TurnStart => "turn_start",
            Self::TurnEnd => "turn_end",
            Self::Leaf => "leaf",
            Self::Label => "label",
        }
    }

    #[must_use]
    pub fn carries_id(self) -> bool {
        !matches!(self, Self::Header | Self::Leaf | Self::Label)
    }

    /// Kinds that feed model-facing context.
    #[must_use]
    pub fn is_business(self) -> bool {
        matches!(
            self,
            Self::Message
                | Self::ToolCall
                | Self::ToolResult
                | Self::Compaction
                | Self::BranchSummary
                | Self::CustomMessage
        )
    }
}

impl Entry {
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Header(_) => EntryKind::Header,
            Self::Message(_) => EntryKind::Message,
            Self::ToolCall(_) => EntryKind::ToolCall,
            Self::ToolResult(_) => EntryKind::ToolResult,
            Self::ThinkingLevelChange(_) => EntryKind::ThinkingLevelChange,
            Self::ModelChange(_) => EntryKind::ModelChange,
            Self::SessionInfo(_) => EntryKind::SessionInfo,
            Self::Compaction(_) => EntryKind::Compaction,
            Self::BranchSummary(_) => EntryKind::BranchSummary,
            Self::Custom(_) => EntryKind::Custom,
            Self::CustomMessage(_) => EntryKind::CustomMessage,
            Self::TurnStart(_) => EntryKind::TurnStart,
            Self::TurnEnd(_) => EntryKind::TurnEnd,
            Self::Leaf(_) => EntryKind::Leaf,
            Self::Label(_) => EntryKind::Label,
        }
    }

    #[must_use]
    pub fn meta(&self) -> Option<&EntryMeta> {
        match self {
            Self::Header(_) | Self::Leaf(_) | Self::Label(_) => None,
            Self::Message(entry) => Some(&entry.meta),
            Self::ToolCall(entry) => Some(&entry.meta),
            Self::ToolResult(entry) => Some(&entry.meta),
            Self::ThinkingLevelChange(entry) => Some(&entry.meta),
            Self::ModelChange(entry) => Some(&entry.meta),
            Self::SessionInfo(entry) => Some(&entry.meta),
            Self::Compaction(entry) => Some(&entry.meta),
            Self::BranchSummary(entry) => Some(&entry.meta),
            Self::Custom(entry) => Some(&entry.meta),
            Self::CustomMessage(entry) => Some(&entry.meta),
            Self::TurnStart(entry) | Self::TurnEnd(entry) => Some(&entry.meta),
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.meta().map(|meta| meta.id.as_str())
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.meta().and_then(|meta| meta.parent_id.as_deref())
    }

    #[must_use]
    pub fn timestamp(&self) -> &str {
        match self {
            Self::Header(header) => &header.timestamp,
            Self::Leaf(leaf) => &leaf.timestamp,
            Self::Label(label) => &label.timestamp,
            other => other.meta().map_or("", |meta| meta.timestamp.as_str()),
        }
    }

    /// Role as seen by context consumers; only messages carry one.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Message(message) => Some(message.role),
            _ => None,
        }
    }

    /// Displayable text body of the record, if it has one.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Message(entry) => Some(&entry.content),
            Self::ToolCall(entry) => Some(&entry.arg),
            Self::ToolResult(entry) => Some(&entry.content),
            Self::Compaction(entry) => Some(&entry.summary),
            Self::BranchSummary(entry) => Some(&entry.summary),
            Self::CustomMessage(entry) => Some(&entry.content),
            Self::Header(_)
            | Self::ThinkingLevelChange(_)
            | Self::ModelChange(_)
            | Self::SessionInfo(_)
            | Self::Custom(_)
            | Self::TurnStart(_)
            | Self::TurnEnd(_)
            | Self::Leaf(_)
            | Self::Label(_) => None,
        }
    }

    /// Recorded token estimate, falling back to a character-based guess.
    #[must_use]
    pub fn token_estimate(&self) -> u64 {
        let recorded = match self {
            Self::Message(entry) => entry.tokens,
            Self::ToolCall(entry) => entry.tokens,
            Self::ToolResult(entry) => entry.tokens,
            _ => None,
        };
        recorded.unwrap_or_else(|| self.content().map_or(0, estimate_tokens))
    }

    #[must_use]
    pub fn is_business(&self) -> bool {
        self.kind().is_business()
    }
}
