//! Records, live race state and the results source over both.

/// Live race state.
pub mod race;
/// Results source over the record store and live race.
pub mod source;
/// In-memory event records.
pub mod store;
