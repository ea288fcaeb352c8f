//! Append-only JSONL session log with branch heads, compaction and
//! schema migration.

mod clock;
mod codec;
mod compaction;
mod config;
mod content;
mod context;
mod error;
mod leaf;
mod migrate;
mod paths;
mod replay;
mod schema;
mod store;

pub use clock::{Clock, FixedClock, IdSource, SystemClock};
pub use compaction::{CompactOptions, CompactionOutcome, DEFAULT_KEEP_LAST};
pub use config::{StoreConfig, DEFAULT_MAX_FILE_BYTES, DEFAULT_PREVIEW_CHARS};
pub use content::{estimate_tokens, extract_text, normalize_role, preview, NON_TEXT_PLACEHOLDER};
pub use context::{assemble, path_to, ContextMode};
pub use error::SessionStoreError;
pub use leaf::{resolve_leaf, LeafState};
pub use migrate::{resolve_document, LoadedSession};
pub use paths::{latest_session_file, session_file_name, session_root};
pub use replay::project_messages;
pub use schema::{
    BranchSummaryEntry, CompactionEntry, CustomEntry, CustomMessageEntry, Entry, EntryKind,
    EntryMeta, LabelEntry, LeafEntry, MessageEntry, MessageMirror, MirrorUsage, ModelChangeEntry,
    Role, SessionHeader, SessionInfoEntry, SummaryFormat, ThinkingLevelChangeEntry, ToolCallEntry,
    ToolResultEntry, TurnEntry, CURRENT_VERSION,
};
pub use store::{NewCompaction, NewMessage, SessionStore, TurnMarker};
