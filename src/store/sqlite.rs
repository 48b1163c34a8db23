//! `SQLite`-backed message storage.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::MessageStore;
use crate::error::StoreError;
use crate::model::record::{FlatFields, ParsedMessage, RawMessage};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS raw_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        raw_content TEXT NOT NULL,
        raw_bytes BLOB NOT NULL,
        parsed_message_id INTEGER
            REFERENCES parsed_messages(id) ON DELETE SET NULL,
        received_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    );

    CREATE TABLE IF NOT EXISTS parsed_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_address TEXT NOT NULL,
        to_address TEXT NOT NULL,
        subject TEXT NOT NULL,
        date TEXT NOT NULL,
        source_ip TEXT NOT NULL,
        verdict_json TEXT NOT NULL,
        raw_message_id INTEGER NOT NULL UNIQUE
            REFERENCES raw_messages(id)
    );

    CREATE INDEX IF NOT EXISTS idx_raw_parsed ON raw_messages(parsed_message_id);
    CREATE INDEX IF NOT EXISTS idx_parsed_date ON parsed_messages(date);
";

const RAW_COLUMNS: &str = "id, raw_content, raw_bytes, parsed_message_id";
const PARSED_COLUMNS: &str =
    "id, from_address, to_address, subject, date, source_ip, verdict_json, raw_message_id";

/// `SQLite` store holding one connection behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database file, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened message database");
        Self::with_connection(conn)
    }

    /// Private in-memory database (tests and dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        id: row.get(0)?,
        raw_content: row.get(1)?,
        raw_bytes: row.get(2)?,
        parsed_message_id: row.get(3)?,
    })
}

fn row_to_parsed(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParsedMessage> {
    let date: String = row.get(4)?;
    let date = DateTime::parse_from_rfc3339(&date)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    Ok(ParsedMessage {
        id: row.get(0)?,
        from_address: row.get(1)?,
        to_address: row.get(2)?,
        subject: row.get(3)?,
        date,
        source_ip: row.get(5)?,
        verdict_json: row.get(6)?,
        raw_message_id: row.get(7)?,
    })
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl MessageStore for SqliteStore {
    fn insert_raw_message(&self, text: &str, bytes: &[u8]) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO raw_messages (raw_content, raw_bytes) VALUES (?1, ?2)",
            params![text, bytes],
        )?;
        let id = conn.last_insert_rowid();
        debug!(raw_message_id = id, bytes = bytes.len(), "Inserted raw message");
        Ok(id)
    }

    fn insert_parsed_message(
        &self,
        fields: &FlatFields,
        verdict_json: &str,
        raw_message_id: i64,
    ) -> Result<i64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO parsed_messages
                (from_address, to_address, subject, date, source_ip, verdict_json, raw_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                fields.from_address,
                fields.to_address,
                fields.subject,
                format_date(&fields.date),
                fields.source_ip,
                verdict_json,
                raw_message_id,
            ],
        )?;
        let id = tx.last_insert_rowid();

        let linked = tx.execute(
            "UPDATE raw_messages SET parsed_message_id = ?1 WHERE id = ?2",
            params![id, raw_message_id],
        )?;
        if linked == 0 {
            // tx rolls back on drop
            return Err(StoreError::NotFound {
                table: "raw_messages",
                id: raw_message_id,
            });
        }

        tx.commit()?;
        debug!(parsed_message_id = id, raw_message_id, "Linked parsed message");
        Ok(id)
    }

    fn delete_parsed_message_cascade(&self, id: i64) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let raw_id: Option<i64> = tx
            .query_row(
                "SELECT raw_message_id FROM parsed_messages WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw_id) = raw_id else {
            return Ok(false);
        };

        tx.execute(
            "UPDATE raw_messages SET parsed_message_id = NULL WHERE id = ?1",
            params![raw_id],
        )?;
        tx.execute("DELETE FROM parsed_messages WHERE id = ?1", params![id])?;
        tx.execute("DELETE FROM raw_messages WHERE id = ?1", params![raw_id])?;
        tx.commit()?;

        info!(parsed_message_id = id, raw_message_id = raw_id, "Purged message");
        Ok(true)
    }

    fn list_parsed_messages(&self) -> Result<Vec<ParsedMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {PARSED_COLUMNS} FROM parsed_messages ORDER BY id"))?;
        let rows = stmt
            .query_map([], row_to_parsed)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn list_raw_messages(&self, only_linked: bool) -> Result<Vec<RawMessage>, StoreError> {
        let conn = self.lock()?;
        let filter = if only_linked {
            " WHERE parsed_message_id IS NOT NULL"
        } else {
            ""
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {RAW_COLUMNS} FROM raw_messages{filter} ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], row_to_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn get_raw_message(&self, id: i64) -> Result<Option<RawMessage>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {RAW_COLUMNS} FROM raw_messages WHERE id = ?1"),
                params![id],
                row_to_raw,
            )
            .optional()?;
        Ok(row)
    }

    fn get_parsed_message(&self, id: i64) -> Result<Option<ParsedMessage>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {PARSED_COLUMNS} FROM parsed_messages WHERE id = ?1"),
                params![id],
                row_to_parsed,
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fields() -> FlatFields {
        FlatFields {
            from_address: "a@example.com".to_string(),
            to_address: "b@example.com".to_string(),
            subject: "Hello".to_string(),
            date: Utc.with_ymd_and_hms(2025, 10, 2, 10, 0, 0).unwrap(),
            source_ip: "203.0.113.7".to_string(),
        }
    }

    #[test]
    fn test_raw_insert_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert_raw_message("Subject: x", b"Subject: x\0").unwrap();
        let raw = store.get_raw_message(id).unwrap().unwrap();
        assert_eq!(raw.raw_content, "Subject: x");
        assert_eq!(raw.raw_bytes, b"Subject: x\0");
        assert_eq!(raw.parsed_message_id, None);
        assert!(store.get_raw_message(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_parsed_insert_links_both_ways() {
        let store = SqliteStore::open_in_memory().unwrap();
        let raw_id = store.insert_raw_message("r", b"r").unwrap();
        let parsed_id = store
            .insert_parsed_message(&fields(), r#"{"error":"e","details":"d"}"#, raw_id)
            .unwrap();

        let raw = store.get_raw_message(raw_id).unwrap().unwrap();
        assert_eq!(raw.parsed_message_id, Some(parsed_id));
        let parsed = store.get_parsed_message(parsed_id).unwrap().unwrap();
        assert_eq!(parsed.raw_message_id, raw_id);
        assert_eq!(parsed.fields(), fields());
    }

    #[test]
    fn test_parsed_insert_for_missing_raw_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.insert_parsed_message(&fields(), "{}", 42).unwrap_err();
        assert!(matches!(err, StoreError::Database(_) | StoreError::NotFound { .. }));
        assert!(store.list_parsed_messages().unwrap().is_empty());
    }

    #[test]
    fn test_cascade_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let orphan = store.insert_raw_message("orphan", b"orphan").unwrap();
        let raw_id = store.insert_raw_message("r", b"r").unwrap();
        let parsed_id = store.insert_parsed_message(&fields(), "{}", raw_id).unwrap();

        assert_eq!(store.list_raw_messages(true).unwrap().len(), 1);
        assert!(store.delete_parsed_message_cascade(parsed_id).unwrap());
        assert!(!store.delete_parsed_message_cascade(parsed_id).unwrap());

        assert!(store.get_raw_message(raw_id).unwrap().is_none());
        assert!(store.list_raw_messages(true).unwrap().is_empty());
        let remaining = store.list_raw_messages(false).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, orphan);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mailverdict.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_raw_message("keep", b"keep").unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_raw_messages(false).unwrap().len(), 1);
    }
}
