//! Time and id sources owned by a store instance.

use std::collections::HashSet;

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::error::SessionStoreError;

pub trait Clock {
    /// Current time as an RFC3339 string.
    fn now(&mut self) -> Result<String, SessionStoreError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&mut self) -> Result<String, SessionStoreError> {
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(SessionStoreError::ClockFormat)
    }
}

/// Deterministic clock that advances by a fixed step on every reading.
#[derive(Debug, Clone)]
pub struct FixedClock {
    next: OffsetDateTime,
    step: Duration,
}

impl FixedClock {
    #[must_use]
    pub fn new(start: OffsetDateTime, step: Duration) -> Self {
        Self { next: start, step }
    }

    /// Starts at the Unix epoch and ticks one second per reading.
    #[must_use]
    pub fn epoch() -> Self {
        Self::new(OffsetDateTime::UNIX_EPOCH, Duration::seconds(1))
    }
}

impl Clock for FixedClock {
    fn now(&mut self) -> Result<String, SessionStoreError> {
        let current = self.next;
        self.next = current.saturating_add(self.step);
        current.format(&Rfc3339).map_err(SessionStoreError::ClockFormat)
    }
}

/// Strategy for assigning entry ids at append time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdSource {
    /// Eight hex characters from a v4 UUID, re-rolled on collision.
    #[default]
    Random,
    /// `<prefix><n>` with a counter, skipping ids already present in the log.
    Sequential { prefix: String, next: u64 },
}

impl IdSource {
    #[must_use]
    pub fn sequential(prefix: impl Into<String>) -> Self {
        Self::Sequential {
            prefix: prefix.into(),
            next: 1,
        }
    }

    pub(crate) fn next_id(&mut self, existing: &HashSet<&str>) -> String {
        match self {
            Self::Random => {
                for _ in 0..100 {
                    let candidate = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
                    if !existing.contains(candidate.as_str()) {
                        return candidate;
                    }
                }
                uuid::Uuid::new_v4().to_string()
            }
            Self::Sequential { prefix, next } => loop {
                let candidate = format!("{prefix}{next}");
                *next += 1;
                if !existing.contains(candidate.as_str()) {
                    return candidate;
                }
            },
        }
    }
}
