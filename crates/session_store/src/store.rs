use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::clock::{Clock, IdSource, SystemClock};
use crate::codec::{append_record, read_document, write_header};
use crate::config::StoreConfig;
use crate::context::{assemble, ContextMode};
use crate::error::SessionStoreError;
use crate::leaf::{resolve_leaf, LeafState};
use crate::migrate::{resolve_document, LoadedSession};
use crate::paths::{latest_session_file, session_file_name, session_root};
use crate::schema::{
    BranchSummaryEntry, CompactionEntry, CustomEntry, CustomMessageEntry, Entry, EntryMeta,
    LabelEntry, LeafEntry, MessageEntry, ModelChangeEntry, Role, SessionHeader, SessionInfoEntry,
    SummaryFormat, ThinkingLevelChangeEntry, ToolCallEntry, ToolResultEntry, TurnEntry,
};

/// Message payload for [`SessionStore::append_message_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub origin: Option<String>,
    pub tokens: Option<u64>,
    pub usage_total: Option<u64>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub thinking: Option<String>,
}

impl NewMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            origin: None,
            tokens: None,
            usage_total: None,
            provider: None,
            model: None,
            thinking: None,
        }
    }

    #[must_use]
    pub fn tokens(mut self, tokens: u64) -> Self {
        self.tokens = Some(tokens);
        self
    }

    #[must_use]
    pub fn usage_total(mut self, total: u64) -> Self {
        self.usage_total = Some(total);
        self
    }

    #[must_use]
    pub fn model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }
}

/// Compaction payload for [`SessionStore::append_compaction_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCompaction {
    pub summary: String,
    pub reason: String,
    pub format: SummaryFormat,
    pub first_kept_entry_id: Option<String>,
    pub tokens_before: u64,
    pub from_hook: bool,
    pub read_files: Option<Vec<String>>,
    pub modified_files: Option<Vec<String>>,
    pub context_size: Option<u64>,
    pub threshold: Option<u64>,
}

/// Turn boundary payload shared by `turn_start` and `turn_end`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnMarker {
    pub turn: u64,
    pub user_message_id: Option<String>,
    pub group_id: Option<String>,
    pub phase: Option<String>,
}

/// Handle on one append-only session log.
///
/// The store keeps no cached view of the file: every query and every append
/// re-reads the log so results depend only on file contents. A single writer
/// is assumed; concurrent writers can interleave lines.
pub struct SessionStore {
    path: PathBuf,
    config: StoreConfig,
    clock: Box<dyn Clock>,
    ids: IdSource,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Binds a store to `path`. Nothing is read or written until first use.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: StoreConfig::default(),
            clock: Box::new(SystemClock),
            ids: IdSource::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[must_use]
    pub fn with_id_source(mut self, ids: IdSource) -> Self {
        self.ids = ids;
        self
    }

    /// Creates a fresh session file under `<cwd>/.agent/sessions`.
    pub fn create_new(cwd: &Path) -> Result<Self, SessionStoreError> {
        let root = session_root(cwd);
        fs::create_dir_all(&root)
            .map_err(|source| SessionStoreError::io("creating session directory", &root, source))?;

        let created_at = SystemClock.now()?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let path = root.join(session_file_name(&created_at, &session_id));
        let header = SessionHeader::current(session_id, created_at, cwd.display().to_string());
        write_header(&path, &header)?;
        info!(path = %path.display(), "created session file");

        Ok(Self::open(path))
    }

    /// Newest session file under `<cwd>/.agent/sessions`.
    pub fn latest_session_path(cwd: &Path) -> Result<PathBuf, SessionStoreError> {
        latest_session_file(&session_root(cwd))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Writes a header when the file is missing or empty. Returns true when it did.
    pub fn ensure(&mut self, cwd: &Path) -> Result<bool, SessionStoreError> {
        let blank = match read_document(&self.path, self.config.max_file_bytes) {
            Ok(text) => text.trim().is_empty(),
            Err(error) if error.is_not_found() => true,
            Err(error) => return Err(error),
        };
        if !blank {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| {
                SessionStoreError::io("creating session directory", parent, source)
            })?;
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let header = SessionHeader::current(session_id, self.clock.now()?, cwd.display().to_string());
        write_header(&self.path, &header)?;
        info!(path = %self.path.display(), "initialized session file");
        Ok(true)
    }

    /// Reads and replays the whole file.
    pub fn load(&self) -> Result<LoadedSession, SessionStoreError> {
        let text = read_document(&self.path, self.config.max_file_bytes)?;
        Ok(resolve_document(&text))
    }

    /// Every decoded record in file order, header, leaf and label records included.
    pub fn load_entries(&self) -> Result<Vec<Entry>, SessionStoreError> {
        Ok(self.load()?.entries)
    }

    pub fn leaf(&self) -> Result<LeafState, SessionStoreError> {
        Ok(resolve_leaf(&self.load()?.entries))
    }

    /// Business-only view of the active branch, as fed to a model.
    pub fn build_context_entries(&self) -> Result<Vec<Entry>, SessionStoreError> {
        Ok(assemble(&self.load()?.entries, ContextMode::Business))
    }

    /// Every record on the active branch, bookkeeping included.
    pub fn build_context_entries_verbose(&self) -> Result<Vec<Entry>, SessionStoreError> {
        Ok(assemble(&self.load()?.entries, ContextMode::Structural))
    }

    pub fn append_message(
        &mut self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<String, SessionStoreError> {
        self.append_message_with(NewMessage::new(role, content))
    }

    pub fn append_message_with(&mut self, message: NewMessage) -> Result<String, SessionStoreError> {
        self.append_entry(|meta| {
            let mut entry = MessageEntry {
                meta,
                role: message.role,
                content: message.content,
                origin: message.origin,
                tokens: message.tokens,
                usage_total: message.usage_total,
                provider: message.provider,
                model: message.model,
                thinking: message.thinking,
                message: None,
            };
            entry.sync_mirror();
            Entry::Message(entry)
        })
    }

    pub fn append_tool_call(
        &mut self,
        tool: impl Into<String>,
        arg: impl Into<String>,
    ) -> Result<String, SessionStoreError> {
        let (tool, arg) = (tool.into(), arg.into());
        self.append_entry(|meta| {
            Entry::ToolCall(ToolCallEntry {
                meta,
                tool,
                arg,
                tokens: None,
            })
        })
    }

    pub fn append_tool_result(
        &mut self,
        tool: impl Into<String>,
        ok: bool,
        content: impl Into<String>,
    ) -> Result<String, SessionStoreError> {
        let (tool, content) = (tool.into(), content.into());
        self.append_entry(|meta| {
            Entry::ToolResult(ToolResultEntry {
                meta,
                tool,
                ok,
                content,
                tokens: None,
            })
        })
    }

    pub fn append_turn_start(&mut self, marker: TurnMarker) -> Result<String, SessionStoreError> {
        self.append_entry(|meta| Entry::TurnStart(turn_entry(meta, marker)))
    }

    pub fn append_turn_end(&mut self, marker: TurnMarker) -> Result<String, SessionStoreError> {
        self.append_entry(|meta| Entry::TurnEnd(turn_entry(meta, marker)))
    }

    pub fn append_thinking_level_change(
        &mut self,
        thinking_level: impl Into<String>,
    ) -> Result<String, SessionStoreError> {
        let thinking_level = thinking_level.into();
        self.append_entry(|meta| {
            Entry::ThinkingLevelChange(ThinkingLevelChangeEntry {
                meta,
                thinking_level,
            })
        })
    }

    pub fn append_model_change(
        &mut self,
        provider: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Result<String, SessionStoreError> {
        let (provider, model_id) = (provider.into(), model_id.into());
        self.append_entry(|meta| {
            Entry::ModelChange(ModelChangeEntry {
                meta,
                provider,
                model_id,
            })
        })
    }

    pub fn append_session_info(
        &mut self,
        name: Option<String>,
    ) -> Result<String, SessionStoreError> {
        self.append_entry(|meta| Entry::SessionInfo(SessionInfoEntry { meta, name }))
    }

    pub fn append_custom(
        &mut self,
        custom_type: impl Into<String>,
        data: Option<Value>,
    ) -> Result<String, SessionStoreError> {
        let custom_type = custom_type.into();
        self.append_entry(|meta| {
            Entry::Custom(CustomEntry {
                meta,
                custom_type,
                data,
            })
        })
    }

    pub fn append_custom_message(
        &mut self,
        custom_type: impl Into<String>,
        content: impl Into<String>,
        display: bool,
    ) -> Result<String, SessionStoreError> {
        let (custom_type, content) = (custom_type.into(), content.into());
        self.append_entry(|meta| {
            Entry::CustomMessage(CustomMessageEntry {
                meta,
                custom_type,
                content,
                display,
            })
        })
    }

    /// Records that the branch rooted at `from_id` was summarized.
    pub fn append_branch_summary(
        &mut self,
        from_id: &str,
        summary: impl Into<String>,
        from_hook: bool,
    ) -> Result<String, SessionStoreError> {
        if !self.load()?.contains_id(from_id) {
            return Err(SessionStoreError::entry_not_found(&self.path, from_id));
        }

        let summary = summary.into();
        self.append_entry(|meta| {
            Entry::BranchSummary(BranchSummaryEntry {
                meta,
                from_id: from_id.to_string(),
                summary,
                from_hook,
            })
        })
    }

    pub fn append_compaction(
        &mut self,
        summary: impl Into<String>,
        first_kept_entry_id: Option<String>,
        tokens_before: u64,
    ) -> Result<String, SessionStoreError> {
        self.append_compaction_with(NewCompaction {
            summary: summary.into(),
            first_kept_entry_id,
            tokens_before,
            ..NewCompaction::default()
        })
    }

    pub fn append_compaction_with(
        &mut self,
        compaction: NewCompaction,
    ) -> Result<String, SessionStoreError> {
        self.append_entry(|meta| {
            Entry::Compaction(CompactionEntry {
                meta,
                summary: compaction.summary,
                reason: if compaction.reason.is_empty() {
                    "manual".to_string()
                } else {
                    compaction.reason
                },
                format: compaction.format,
                first_kept_entry_id: compaction.first_kept_entry_id,
                tokens_before: compaction.tokens_before,
                from_hook: compaction.from_hook,
                read_files: compaction.read_files,
                modified_files: compaction.modified_files,
                context_size: compaction.context_size,
                threshold: compaction.threshold,
            })
        })
    }

    /// Moves the head to `target`, or to the root when `None`.
    pub fn branch_to(&mut self, target: Option<&str>) -> Result<(), SessionStoreError> {
        if let Some(id) = target {
            if !self.load()?.contains_id(id) {
                return Err(SessionStoreError::entry_not_found(&self.path, id));
            }
        }

        let timestamp = self.clock.now()?;
        append_record(
            &self.path,
            &Entry::Leaf(LeafEntry {
                target_id: target.map(str::to_owned),
                timestamp,
            }),
        )?;
        debug!(target_id = ?target, "moved session head");
        Ok(())
    }

    /// Sets the label of `target_id`, or clears it when `label` is `None`.
    pub fn set_label(
        &mut self,
        target_id: &str,
        label: Option<&str>,
    ) -> Result<(), SessionStoreError> {
        if !self.load()?.contains_id(target_id) {
            return Err(SessionStoreError::entry_not_found(&self.path, target_id));
        }

        let timestamp = self.clock.now()?;
        append_record(
            &self.path,
            &Entry::Label(LabelEntry {
                target_id: target_id.to_string(),
                label: label.map(str::to_owned),
                timestamp,
            }),
        )
    }

    /// Effective label per entry id.
    pub fn labels(&self) -> Result<BTreeMap<String, String>, SessionStoreError> {
        Ok(effective_labels(&self.load()?.entries))
    }

    pub fn label_of(&self, id: &str) -> Result<Option<String>, SessionStoreError> {
        Ok(self.labels()?.remove(id))
    }

    /// Appends the record built by `build`, then a leaf record pointing at it.
    ///
    /// The parent is the head before this call. A crash between the two writes
    /// leaves an orphaned entry that later appends never attach to.
    fn append_entry(
        &mut self,
        build: impl FnOnce(EntryMeta) -> Entry,
    ) -> Result<String, SessionStoreError> {
        let loaded = self.load()?;
        let parent_id = resolve_leaf(&loaded.entries).head().map(str::to_owned);
        let id = self.ids.next_id(&loaded.id_set());
        let timestamp = self.clock.now()?;

        let entry = build(EntryMeta {
            id: id.clone(),
            parent_id,
            timestamp: timestamp.clone(),
        });
        let kind = entry.kind();
        append_record(&self.path, &entry)?;
        append_record(
            &self.path,
            &Entry::Leaf(LeafEntry {
                target_id: Some(id.clone()),
                timestamp,
            }),
        )?;

        debug!(id = %id, kind = kind.tag(), "appended session entry");
        Ok(id)
    }
}

fn turn_entry(meta: EntryMeta, marker: TurnMarker) -> TurnEntry {
    TurnEntry {
        meta,
        turn: marker.turn,
        user_message_id: marker.user_message_id,
        group_id: marker.group_id,
        phase: marker.phase,
    }
}

fn effective_labels(entries: &[Entry]) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for entry in entries {
        if let Entry::Label(record) = entry {
            match &record.label {
                Some(label) => {
                    labels.insert(record.target_id.clone(), label.clone());
                }
                None => {
                    labels.remove(&record.target_id);
                }
            }
        }
    }
    labels
}
