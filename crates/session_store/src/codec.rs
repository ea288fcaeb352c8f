//! One JSON object per line, newline terminated.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::SessionStoreError;
use crate::schema::{Entry, SessionHeader};

pub(crate) fn encode_line(path: &Path, entry: &Entry) -> Result<String, SessionStoreError> {
    let mut line =
        serde_json::to_string(entry).map_err(|source| SessionStoreError::json_serialize(path, source))?;
    line.push('\n');
    Ok(line)
}

/// Truncates `path` and writes the header as its only line.
pub(crate) fn write_header(path: &Path, header: &SessionHeader) -> Result<(), SessionStoreError> {
    let line = encode_line(path, &Entry::Header(header.clone()))?;
    let mut file = File::create(path)
        .map_err(|source| SessionStoreError::io("creating session file", path, source))?;
    file.write_all(line.as_bytes())
        .map_err(|source| SessionStoreError::io("writing session header", path, source))?;
    file.flush()
        .map_err(|source| SessionStoreError::io("flushing session header", path, source))
}

/// Appends one record and flushes before returning.
///
/// A torn final line left by an interrupted writer is terminated first so the
/// new record always starts on its own line.
pub(crate) fn append_record(path: &Path, entry: &Entry) -> Result<(), SessionStoreError> {
    let line = encode_line(path, entry)?;
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| SessionStoreError::io("opening session file for append", path, source))?;

    let end = file
        .seek(SeekFrom::End(0))
        .map_err(|source| SessionStoreError::io("seeking session file", path, source))?;

    let mut payload = Vec::with_capacity(line.len() + 1);
    if end > 0 && !ends_with_newline(&mut file, end, path)? {
        payload.push(b'\n');
    }
    payload.extend_from_slice(line.as_bytes());

    file.write_all(&payload)
        .map_err(|source| SessionStoreError::io("appending session line", path, source))?;
    file.flush()
        .map_err(|source| SessionStoreError::io("flushing session file", path, source))
}

fn ends_with_newline(file: &mut File, end: u64, path: &Path) -> Result<bool, SessionStoreError> {
    let inspect = |file: &mut File| -> std::io::Result<bool> {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(end - 1))?;
        file.read_exact(&mut last)?;
        file.seek(SeekFrom::End(0))?;
        Ok(last[0] == b'\n')
    };
    inspect(file)
        .map_err(|source| SessionStoreError::io("inspecting session file tail", path, source))
}

/// Reads the whole file, refusing files larger than `max_bytes`.
pub(crate) fn read_document(path: &Path, max_bytes: u64) -> Result<String, SessionStoreError> {
    let metadata = std::fs::metadata(path)
        .map_err(|source| SessionStoreError::io("reading session metadata", path, source))?;
    if metadata.len() > max_bytes {
        return Err(SessionStoreError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: max_bytes,
        });
    }

    let bytes = std::fs::read(path)
        .map_err(|source| SessionStoreError::io("reading session file", path, source))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parses one line into a generic document. Anything but a JSON object is `None`.
pub(crate) fn parse_line(line: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => Some(fields),
        _ => None,
    }
}
