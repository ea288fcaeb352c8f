//! Environment configuration.
//!
//! `TAPE_SESSION_PATH` is read by the CLI parser since it doubles as `--session`.

use std::env;
use std::str::FromStr;

use session_store::{StoreConfig, DEFAULT_KEEP_LAST};

pub const DEFAULT_LOG_FILTER: &str = "warn";
pub const DEFAULT_SHELL_TIMEOUT_SEC: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub max_file_bytes: Option<u64>,
    pub preview_chars: Option<usize>,
    pub log_filter: String,
    pub log_json: bool,
    pub compact_threshold_tokens: Option<u64>,
    pub compact_keep_last: usize,
    pub shell_timeout_sec: u64,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            max_file_bytes: env_parse_opt("TAPE_SESSION_MAX_BYTES"),
            preview_chars: env_parse_opt("TAPE_SESSION_PREVIEW_CHARS"),
            log_filter: env_string_opt("TAPE_LOG")
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_json: env_flag("TAPE_LOG_JSON"),
            compact_threshold_tokens: env_parse_opt::<u64>("TAPE_COMPACT_THRESHOLD_TOKENS")
                .filter(|threshold| *threshold > 0),
            compact_keep_last: env_parse_opt("TAPE_COMPACT_KEEP_LAST")
                .unwrap_or(DEFAULT_KEEP_LAST),
            shell_timeout_sec: env_parse_opt("TAPE_SHELL_TIMEOUT_SEC")
                .unwrap_or(DEFAULT_SHELL_TIMEOUT_SEC),
        }
    }

    /// Store limits with environment overrides applied.
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        let defaults = StoreConfig::default();
        StoreConfig {
            max_file_bytes: self.max_file_bytes.unwrap_or(defaults.max_file_bytes),
            preview_chars: self.preview_chars.unwrap_or(defaults.preview_chars),
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

/// Unparseable values are treated as unset.
fn env_parse_opt<T: FromStr>(key: &str) -> Option<T> {
    env_string_opt(key).and_then(|value| value.trim().parse().ok())
}
