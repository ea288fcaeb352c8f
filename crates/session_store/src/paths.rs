use std::path::{Path, PathBuf};

use crate::error::SessionStoreError;

pub const SESSION_DIR: [&str; 2] = [".agent", "sessions"];
pub const SESSION_EXTENSION: &str = "jsonl";

#[must_use]
pub fn session_root(cwd: &Path) -> PathBuf {
    cwd.join(SESSION_DIR[0]).join(SESSION_DIR[1])
}

#[must_use]
pub fn sanitize_timestamp_for_filename(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn session_file_name(created_at: &str, session_id: &str) -> String {
    format!(
        "{}_{}.{SESSION_EXTENSION}",
        sanitize_timestamp_for_filename(created_at),
        session_id
    )
}

/// Newest session file under `root`. File names start with the creation
/// timestamp, so lexical order is creation order.
pub fn latest_session_file(root: &Path) -> Result<PathBuf, SessionStoreError> {
    let no_sessions = || SessionStoreError::NoSessionsFound {
        root: root.to_path_buf(),
    };

    let read_dir = match std::fs::read_dir(root) {
        Ok(read_dir) => read_dir,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Err(no_sessions());
        }
        Err(source) => {
            return Err(SessionStoreError::io(
                "listing session directory",
                root,
                source,
            ));
        }
    };

    let mut candidates = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = dir_entry
            .map_err(|source| SessionStoreError::io("listing session directory", root, source))?;
        let path = dir_entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == SESSION_EXTENSION) {
            candidates.push(path);
        }
    }

    candidates.sort();
    candidates.pop().ok_or_else(no_sessions)
}
