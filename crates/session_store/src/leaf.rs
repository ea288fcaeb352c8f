use tracing::warn;

use crate::schema::Entry;

/// Branch head as determined by the leaf records of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafState {
    /// No leaf record exists; the head is the last id-bearing entry, if any.
    Implicit { head: Option<String> },
    /// The latest leaf record navigated to the root. Context is empty.
    Root,
    /// The latest leaf record names `target`. When the target is missing from
    /// the log the head falls back to the last id-bearing entry.
    Pointer {
        target: String,
        head: Option<String>,
        dangling: bool,
    },
}

impl LeafState {
    /// Entry id new appends attach to and context is built from.
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        match self {
            Self::Implicit { head } | Self::Pointer { head, .. } => head.as_deref(),
            Self::Root => None,
        }
    }

    #[must_use]
    pub fn has_leaf_record(&self) -> bool {
        !matches!(self, Self::Implicit { .. })
    }

    /// Raw target of the latest leaf record: `Some(None)` for root navigation.
    #[must_use]
    pub fn target(&self) -> Option<Option<&str>> {
        match self {
            Self::Implicit { .. } => None,
            Self::Root => Some(None),
            Self::Pointer { target, .. } => Some(Some(target.as_str())),
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }
}

/// Scans the log once and resolves the current head.
#[must_use]
pub fn resolve_leaf(entries: &[Entry]) -> LeafState {
    let mut last_leaf: Option<Option<&str>> = None;
    let mut last_id: Option<&str> = None;

    for entry in entries {
        if let Entry::Leaf(leaf) = entry {
            last_leaf = Some(leaf.target_id.as_deref());
        } else if let Some(id) = entry.id() {
            last_id = Some(id);
        }
    }

    match last_leaf {
        None => LeafState::Implicit {
            head: last_id.map(str::to_owned),
        },
        Some(None) => LeafState::Root,
        Some(Some(target)) => {
            let found = entries.iter().any(|entry| entry.id() == Some(target));
            if !found {
                warn!(
                    leaf_target = target,
                    fallback = ?last_id,
                    "leaf target is missing from the log; falling back to the last entry"
                );
            }
            let head = if found { Some(target) } else { last_id };
            LeafState::Pointer {
                target: target.to_string(),
                head: head.map(str::to_owned),
                dangling: !found,
            }
        }
    }
}
