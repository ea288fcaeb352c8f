/// Largest session file `load` will read into memory.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 64 * 1024 * 1024;

/// Characters kept per entry when rendering summary previews.
pub const DEFAULT_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub max_file_bytes: u64,
    pub preview_chars: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}
