//! SMS inbox storage and retrieval using SQLite.
//!
//! Stands in for the device message provider: rows carry the sender address,
//! the body and the delivery time in epoch milliseconds.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, Result};
use std::path::Path;

/// One captured text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    pub address: String,
    pub body: String,
    /// Epoch milliseconds.
    pub date: i64,
}

impl SmsMessage {
    pub fn new(address: impl Into<String>, body: impl Into<String>, date: i64) -> Self {
        Self {
            address: address.into(),
            body: body.into(),
            date,
        }
    }

    /// Delivery time, if `date` is a representable instant.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.date).single()
    }
}

/// SQLite-backed inbox.
pub struct InboxStore {
    conn: Connection,
}

impl InboxStore {
    /// Open an inbox database, creating the table if needed.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_connection(Connection::open(db_path)?)
    }

    /// Open an inbox database that must already exist. The schema is not
    /// created, so a database without an inbox table fails on first query.
    pub fn open_existing<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Self {
            conn: Connection::open_with_flags(db_path, flags)?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS inbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT,
                body TEXT,
                date INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS inbox_date ON inbox (date)", [])?;
        Ok(Self { conn })
    }

    pub fn insert(&self, message: &SmsMessage) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO inbox (address, body, date) VALUES (?1, ?2, ?3)",
            params![message.address, message.body, message.date],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a row whose address or body may be missing.
    pub fn insert_raw(&self, address: Option<&str>, body: Option<&str>, date: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO inbox (address, body, date) VALUES (?1, ?2, ?3)",
            params![address, body, date],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Messages dated at or after `start_date`, newest first.
    ///
    /// Missing addresses and bodies read back as empty strings.
    pub fn query_since(&self, start_date: i64) -> Result<Vec<SmsMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT address, body, date
             FROM inbox
             WHERE date >= ?1
             ORDER BY date DESC",
        )?;

        let rows = stmt.query_map([start_date], |row| {
            Ok(SmsMessage {
                address: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                body: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                date: row.get(2)?,
            })
        })?;

        let messages = rows.collect::<Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM inbox", [], |row| row.get(0))
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM inbox", [])?;
        Ok(())
    }
}
