//! Read access to the app's key-value database.
//!
//! The store is a SQLite file mirroring what the web app keeps in the
//! browser: the `keyval` object store, where chats live under `CHAT_<id>`,
//! and the page's local storage, which holds the folder and tag lists.
//! Values are JSON, stored as TEXT or BLOB.
//!
//! The source file is never opened for writing. [`Store::open`] snapshots it
//! through the online-backup API first, so a running app holding the file
//! does not get in the way and every read sees the same state.
use crate::importer::{CHAT_KEY_PREFIX, Directory, FOLDER_LIST_KEY, TAG_LIST_KEY};
use eyre::{Context, Result, eyre};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, OptionalExtension, backup::Backup};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Tables the store reads from.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS keyval (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS local_storage (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

pub struct Store {
    conn: Connection,
    // Keeps the snapshot file alive for as long as the connection uses it.
    _snapshot: NamedTempFile,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        let snapshot = backup_database(db_path)?;
        let conn = Connection::open_with_flags(
            snapshot.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .wrap_err("Failed to open database snapshot")?;
        tracing::debug!(source = %db_path.display(), snapshot = %snapshot.path().display(), "opened store");
        Ok(Self {
            conn,
            _snapshot: snapshot,
        })
    }

    /// Every chat record, in key order. The key is returned alongside.
    pub fn chats(&self) -> Result<Vec<(String, Value)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM keyval WHERE key GLOB ?1 ORDER BY key")
            .wrap_err("Failed to prepare chat query")?;
        let rows = stmt
            .query_map([format!("{}*", CHAT_KEY_PREFIX)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, SqlValue>(1)?))
            })
            .wrap_err("Failed to query chats")?;

        let mut chats = Vec::new();
        for row in rows {
            let (key, raw) = row.wrap_err("Failed to read chat row")?;
            let value = parse_json(&key, raw)?;
            chats.push((key, value));
        }
        tracing::debug!(count = chats.len(), "loaded chats");
        Ok(chats)
    }

    pub fn chat_by_id(&self, chat_id: &str) -> Result<Value> {
        let key = format!("{}{}", CHAT_KEY_PREFIX, chat_id);
        let raw = self
            .conn
            .query_row("SELECT value FROM keyval WHERE key = ?1", [&key], |row| {
                row.get::<_, SqlValue>(0)
            })
            .optional()
            .wrap_err_with(|| format!("Failed to look up {}", key))?
            .ok_or_else(|| eyre!("Chat not found: {}", chat_id))?;
        parse_json(&key, raw)
    }

    /// A local-storage entry, or `None` when it was never written.
    pub fn local_item(&self, key: &str) -> Result<Option<String>> {
        if !self.has_table("local_storage")? {
            return Ok(None);
        }
        let raw = self
            .conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                [key],
                |row| row.get::<_, SqlValue>(0),
            )
            .optional()
            .wrap_err_with(|| format!("Failed to read local storage item {}", key))?;

        match raw {
            None => Ok(None),
            Some(SqlValue::Text(text)) => Ok(Some(text)),
            Some(SqlValue::Blob(bytes)) => String::from_utf8(bytes)
                .map(Some)
                .wrap_err_with(|| format!("Local storage item {} is not UTF-8", key)),
            Some(SqlValue::Null) => Ok(None),
            Some(other) => Err(eyre!(
                "Local storage item {} has unexpected type {:?}",
                key,
                other.data_type()
            )),
        }
    }

    /// Folder and tag lookups from local storage. Missing lists count as empty.
    pub fn directory(&self) -> Result<Directory> {
        let folders = self.local_json(FOLDER_LIST_KEY)?;
        let tags = self.local_json(TAG_LIST_KEY)?;
        let directory = Directory::from_lists(&folders, &tags);
        tracing::debug!(
            folders = directory.folder_count(),
            tags = directory.tag_count(),
            "loaded directory"
        );
        Ok(directory)
    }

    fn local_json(&self, key: &str) -> Result<Value> {
        match self.local_item(key)? {
            None => Ok(Value::Array(Vec::new())),
            Some(text) => serde_json::from_str(&text)
                .wrap_err_with(|| format!("Malformed JSON in local storage item {}", key)),
        }
    }

    fn has_table(&self, name: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .wrap_err("Failed to inspect database schema")
    }
}

fn parse_json(key: &str, raw: SqlValue) -> Result<Value> {
    let parsed = match raw {
        SqlValue::Text(text) => serde_json::from_str(&text),
        SqlValue::Blob(bytes) => serde_json::from_slice(&bytes),
        other => {
            return Err(eyre!(
                "Value of {} has unexpected type {:?}",
                key,
                other.data_type()
            ));
        }
    };
    parsed.wrap_err_with(|| format!("Malformed JSON in {}", key))
}

/// Copy the database into a temporary file with the online-backup API.
fn backup_database(db_path: &Path) -> Result<NamedTempFile> {
    if !db_path.exists() {
        return Err(eyre!("Database not found at: {}", db_path.display()));
    }
    let src = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .wrap_err_with(|| format!("Failed to open source database: {}", db_path.display()))?;

    let tmp = NamedTempFile::new().wrap_err("Failed to create temporary file")?;
    let mut dst =
        Connection::open(tmp.path()).wrap_err("Failed to open snapshot database connection")?;

    {
        let backup = Backup::new(&src, &mut dst).wrap_err("Failed to initialize backup")?;
        backup
            .run_to_completion(1000, Duration::from_millis(5), None)
            .wrap_err("Backup did not complete successfully")?;
    }

    drop(src);
    Ok(tmp)
}
