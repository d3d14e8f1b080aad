/// SQLite cache sink.
pub mod sqlite;

use thiserror::Error;

use crate::{
    cache::{SlotEntry, Token},
    types::Scope,
};

/// Cache persistence failure.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload (de)serialization error.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else, such as an unknown payload version.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable home for cache entries.
pub trait CacheSink: Send {
    /// Upserts one slot of one scope.
    fn store_entry(&mut self, scope: Scope, entry: &SlotEntry) -> PersistResult<()>;
    /// Upserts a batch; returns how many were written.
    fn store_entries(&mut self, entries: &[(Scope, SlotEntry)]) -> PersistResult<usize> {
        for (scope, entry) in entries {
            self.store_entry(*scope, entry)?;
        }
        Ok(entries.len())
    }
    /// Every stored slot.
    fn load_entries(&mut self) -> PersistResult<Vec<(Scope, SlotEntry)>>;
    /// Makes written entries durable.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}

/// Demotes every entry that is not fresh, minting `token` as its new data
/// version. Returns how many were demoted.
pub fn normalize_entries(entries: &mut [(Scope, SlotEntry)], token: Token) -> usize {
    entries
        .iter_mut()
        .filter_map(|(_, entry)| entry.normalize(token).then_some(()))
        .count()
}
