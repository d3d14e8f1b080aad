use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Version marker for optimistic cache validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token(pub u64);

/// Mints strictly increasing tokens from the wall clock (microseconds).
///
/// Tokens survive restarts when persisted, so the clock is seeded from
/// wall time rather than a process-local counter; [`TokenClock::observe`]
/// keeps it ahead of every token restored from disk.
#[derive(Debug, Default)]
pub struct TokenClock {
    last: AtomicU64,
}

impl TokenClock {
    /// A clock that has minted nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next token, strictly greater than every token minted or observed.
    pub fn mint(&self) -> Token {
        let now = now_us();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Token(next),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Moves the clock past `token`.
    pub fn observe(&self, token: Token) {
        self.last.fetch_max(token.0, Ordering::AcqRel);
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Validity of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// `build_ver == data_ver`; the value is authoritative.
    Fresh,
    /// Data changed since the last build.
    Stale,
    /// No data version yet.
    Missing,
    /// Built ahead of its data version; never produced by this crate, only
    /// by damaged persisted state.
    Corrupt,
}

/// `{data_ver, build_ver, value}` for one scope slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsCacheEntry<T> {
    /// Version of the underlying data.
    pub data_ver: Option<Token>,
    /// Version the stored value was built from.
    pub build_ver: Option<Token>,
    /// Last committed value; `None` also encodes "no data" when fresh.
    pub value: Option<T>,
}

impl<T> Default for ResultsCacheEntry<T> {
    fn default() -> Self {
        Self {
            data_ver: None,
            build_ver: None,
            value: None,
        }
    }
}

impl<T: Clone> ResultsCacheEntry<T> {
    /// Classifies the token pair.
    pub fn status(&self) -> EntryStatus {
        match (self.data_ver, self.build_ver) {
            (None, _) => EntryStatus::Missing,
            (Some(data), Some(build)) if build == data => EntryStatus::Fresh,
            (Some(data), Some(build)) if build > data => EntryStatus::Corrupt,
            (Some(_), _) => EntryStatus::Stale,
        }
    }

    /// The value when fresh. `Some(None)` means fresh with no data.
    pub fn fresh_value(&self) -> Option<Option<T>> {
        (self.status() == EntryStatus::Fresh).then(|| self.value.clone())
    }

    /// Demotes the entry. The stored data version always increases, even
    /// when `token` is not ahead of it. Returns the version now in force.
    pub fn invalidate(&mut self, token: Token) -> Token {
        let next = match self.data_ver {
            Some(current) if token <= current => Token(current.0 + 1),
            _ => token,
        };
        self.data_ver = Some(next);
        next
    }

    /// Writes `value` built from `token` if the data version still equals
    /// it. Returns whether the write happened.
    pub fn try_commit(&mut self, token: Token, value: Option<T>) -> bool {
        if self.data_ver != Some(token) {
            return false;
        }
        self.build_ver = Some(token);
        self.value = value;
        true
    }

    /// Forces anything not fresh back to a plain stale entry so the next
    /// reader rebuilds under a new token.
    pub fn normalize(&mut self, token: Token) -> bool {
        match self.status() {
            EntryStatus::Fresh => false,
            EntryStatus::Stale | EntryStatus::Missing | EntryStatus::Corrupt => {
                self.build_ver = None;
                self.invalidate(token);
                true
            }
        }
    }
}
