//! Result cache: version tokens, single-flight builds and roll-up reads.

/// Tokens and cache entries.
pub mod entry;
/// Single-flight build guards.
pub mod flight;
/// The cache manager.
pub mod manager;

pub use entry::{EntryStatus, ResultsCacheEntry, Token, TokenClock};
pub use manager::{ResultsCache, Slot, SlotEntry};
