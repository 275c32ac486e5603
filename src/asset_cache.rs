//! Persistent title -> poster URL cache backed by SQLite.

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure to reach or use the poster store.
#[derive(Debug)]
pub enum CacheStoreError {
    Io(std::io::Error),
    Sqlite(rusqlite::Error),
}

impl fmt::Display for CacheStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cache directory error: {err}"),
            Self::Sqlite(err) => write!(f, "cache database error: {err}"),
        }
    }
}

impl std::error::Error for CacheStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Sqlite(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for CacheStoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<rusqlite::Error> for CacheStoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }
}

pub struct AssetCache {
    conn: Mutex<Connection>,
}

impl AssetCache {
    /// Opens (or creates) the cache at `path`, creating missing parent
    /// directories. Existing rows are kept.
    pub fn open(path: &Path) -> Result<Self, CacheStoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets readers proceed while a write is in progress.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.initialize_schema()?;
        Ok(cache)
    }

    /// Non-persistent store used when the on-disk cache cannot be opened.
    pub fn open_in_memory() -> Result<Self, CacheStoreError> {
        let cache = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        cache.initialize_schema()?;
        Ok(cache)
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn initialize_schema(&self) -> Result<(), CacheStoreError> {
        self.connection().execute(
            "CREATE TABLE IF NOT EXISTS posters (
                title TEXT PRIMARY KEY,
                poster_url TEXT NOT NULL,
                updated_unix_ms INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn now_unix_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0)
    }

    pub fn get(&self, title: &str) -> Result<Option<String>, CacheStoreError> {
        let url = self
            .connection()
            .query_row(
                "SELECT poster_url FROM posters WHERE title = ?1",
                params![title],
                |row| row.get(0),
            )
            .optional()?;
        Ok(url)
    }

    /// Inserts or replaces the poster URL for `title` in one statement.
    pub fn put(&self, title: &str, poster_url: &str) -> Result<(), CacheStoreError> {
        self.connection().execute(
            "INSERT INTO posters (title, poster_url, updated_unix_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(title) DO UPDATE SET
                poster_url = excluded.poster_url,
                updated_unix_ms = excluded.updated_unix_ms",
            params![title, poster_url, Self::now_unix_ms()],
        )?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize, CacheStoreError> {
        let count: i64 =
            self.connection()
                .query_row("SELECT COUNT(*) FROM posters", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    /// Drops every cached poster. Returns the number of rows removed.
    pub fn clear(&self) -> Result<usize, CacheStoreError> {
        let removed = self.connection().execute("DELETE FROM posters", [])?;
        Ok(removed)
    }

    /// Drops the backing table so every read and write fails.
    #[cfg(test)]
    pub(crate) fn break_store_for_test(&self) {
        self.connection()
            .execute("DROP TABLE posters", [])
            .expect("drop posters table");
    }
}
