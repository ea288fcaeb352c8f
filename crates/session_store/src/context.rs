//! Builds the active linear view of a branching log.
//!
//! The path runs root to leaf along parent links. When a compaction record
//! sits on that path, the latest one replaces everything before its retained
//! tail: the output is the summary, then the tail from `firstKeptEntryId` up to
//! the summary, then everything after it. Older summaries inside that tail are
//! left out. A summary without a retained tail drops the whole prefix.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::leaf::resolve_leaf;
use crate::schema::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Messages, tool calls/results, summaries and displayable custom messages.
    Business,
    /// Every record on the path, bookkeeping included.
    Structural,
}

impl ContextMode {
    fn admits(self, entry: &Entry) -> bool {
        match self {
            Self::Business => entry.is_business(),
            Self::Structural => true,
        }
    }
}

/// Entries from the root down to `head`, following parent links.
///
/// An unresolvable parent or a cycle ends the walk without error.
#[must_use]
pub fn path_to<'a>(entries: &'a [Entry], head: &str) -> Vec<&'a Entry> {
    let mut index_by_id: HashMap<&str, usize> = HashMap::new();
    for (position, entry) in entries.iter().enumerate() {
        if let Some(id) = entry.id() {
            index_by_id.entry(id).or_insert(position);
        }
    }

    let mut path = Vec::new();
    let mut visited = HashSet::new();
    let mut cursor = index_by_id.get(head).copied();
    while let Some(position) = cursor {
        if !visited.insert(position) {
            warn!(head, "parent links form a cycle; truncating the path");
            break;
        }

        let entry = &entries[position];
        path.push(entry);
        cursor = entry.parent_id().and_then(|parent| {
            let found = index_by_id.get(parent).copied();
            if found.is_none() {
                debug!(parent, "parent link does not resolve; path starts here");
            }
            found
        });
    }

    path.reverse();
    path
}

/// Resolves the leaf and assembles the visible context for `mode`.
#[must_use]
pub fn assemble(entries: &[Entry], mode: ContextMode) -> Vec<Entry> {
    let leaf = resolve_leaf(entries);
    let Some(head) = leaf.head() else {
        return Vec::new();
    };

    window(&path_to(entries, head), mode)
}

fn window(path: &[&Entry], mode: ContextMode) -> Vec<Entry> {
    let admitted = |entry: &&&Entry| mode.admits(entry);

    let latest_compaction = path
        .iter()
        .enumerate()
        .rev()
        .find_map(|(position, entry)| match entry {
            Entry::Compaction(compaction) => Some((position, compaction)),
            _ => None,
        });

    let Some((summary_at, compaction)) = latest_compaction else {
        return path.iter().filter(admitted).map(|entry| (*entry).clone()).collect();
    };

    let mut context = vec![path[summary_at].clone()];

    if let Some(first_kept) = compaction.first_kept_entry_id.as_deref() {
        let prefix = &path[..summary_at];
        match prefix.iter().position(|entry| entry.id() == Some(first_kept)) {
            // Earlier summaries lead the context they came from, so the latest
            // compaction has already folded them.
            Some(start) => context.extend(
                prefix[start..]
                    .iter()
                    .filter(admitted)
                    .filter(|entry| !matches!(entry, Entry::Compaction(_)))
                    .map(|entry| (*entry).clone()),
            ),
            None => debug!(
                first_kept,
                "retained tail start is not on the active path; keeping only the summary"
            ),
        }
    }

    context.extend(
        path[summary_at + 1..]
            .iter()
            .filter(admitted)
            .map(|entry| (*entry).clone()),
    );
    context
}
