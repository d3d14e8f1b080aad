//! SQLite-backed cache entry sink.

use std::path::Path;

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::{cache::SlotEntry, core::store::now_ms, types::Scope};

use super::{CacheSink, PersistError, PersistResult};

/// Version number for serialized [`EntryEnvelope`] payloads.
pub const ENTRY_FORMAT_VERSION: u16 = 1;

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped entry.
    pub entry: SlotEntry,
}

impl EntryEnvelope {
    /// Constructs an envelope using [`ENTRY_FORMAT_VERSION`].
    pub fn new(entry: SlotEntry) -> Self {
        Self {
            format_version: ENTRY_FORMAT_VERSION,
            entry,
        }
    }
}

/// SQLite implementation of [`crate::persist::CacheSink`].
pub struct SqliteCacheSink {
    conn: Connection,
}

impl SqliteCacheSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Number of stored slots.
    pub fn len(&self) -> PersistResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> PersistResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drops every stored slot.
    pub fn clear(&mut self) -> PersistResult<usize> {
        Ok(self.conn.execute("DELETE FROM cache_entries", [])?)
    }
}

impl CacheSink for SqliteCacheSink {
    fn store_entry(&mut self, scope: Scope, entry: &SlotEntry) -> PersistResult<()> {
        upsert_entry(&self.conn, scope, entry)
    }

    fn store_entries(&mut self, entries: &[(Scope, SlotEntry)]) -> PersistResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        for (scope, entry) in entries {
            upsert_entry(&tx, *scope, entry)?;
        }
        tx.commit()?;
        Ok(entries.len())
    }

    fn load_entries(&mut self) -> PersistResult<Vec<(Scope, SlotEntry)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT scope, payload FROM cache_entries ORDER BY scope, slot")?;
        let rows = stmt.query_map([], |row| {
            let scope: String = row.get(0)?;
            let payload: Vec<u8> = row.get(1)?;
            Ok((scope, payload))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (scope, payload) = row?;
            let scope: Scope = scope.parse().map_err(PersistError::Message)?;
            out.push((scope, decode_entry_payload(&payload)?));
        }
        Ok(out)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

fn upsert_entry(conn: &Connection, scope: Scope, entry: &SlotEntry) -> PersistResult<()> {
    let (data_ver, build_ver) = entry.tokens();
    let payload = serde_json::to_vec(&EntryEnvelope::new(entry.clone()))?;
    conn.execute(
        "INSERT INTO cache_entries(scope, slot, data_ver, build_ver, ts_ms, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(scope, slot) DO UPDATE SET
            data_ver = excluded.data_ver,
            build_ver = excluded.build_ver,
            ts_ms = excluded.ts_ms,
            payload = excluded.payload",
        params![
            scope.to_string(),
            entry.slot().as_str(),
            data_ver.map(|t| t.0 as i64),
            build_ver.map(|t| t.0 as i64),
            now_ms() as i64,
            payload,
        ],
    )?;
    Ok(())
}

fn decode_entry_payload(payload: &[u8]) -> PersistResult<SlotEntry> {
    let envelope: EntryEnvelope = serde_json::from_slice(payload)?;
    if envelope.format_version != ENTRY_FORMAT_VERSION {
        return Err(PersistError::Message(format!(
            "unsupported cache entry format version: {}",
            envelope.format_version
        )));
    }
    Ok(envelope.entry)
}
