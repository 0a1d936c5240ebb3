// Persistent client-side storage backed by SQLite

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// A stored cookie record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub secure: bool,
    pub same_site: String,
    /// Unix timestamp (seconds) after which the cookie is gone
    pub expires_at: i64,
}

impl StoredCookie {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Key/value and cookie storage shared by the token store and endpoint cache
pub struct ClientStorage {
    conn: Mutex<Connection>,
}

impl ClientStorage {
    /// Open (or create) the storage database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create storage directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn)
    }

    /// Storage that lives only as long as this process
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS client_kv (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS client_cookies (
                 name       TEXT PRIMARY KEY,
                 value      TEXT NOT NULL,
                 secure     INTEGER NOT NULL DEFAULT 0,
                 same_site  TEXT NOT NULL DEFAULT 'Strict',
                 expires_at INTEGER NOT NULL
             );",
        )
        .context("Failed to initialize storage schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Storage connection lock poisoned"))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM client_kv WHERE key = ?",
            [key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read storage key: {}", key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO client_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .with_context(|| format!("Failed to write storage key: {}", key))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM client_kv WHERE key = ?", [key])
            .with_context(|| format!("Failed to remove storage key: {}", key))?;
        Ok(())
    }

    pub fn put_cookie(&self, cookie: &StoredCookie) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO client_cookies (name, value, secure, same_site, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                 value = excluded.value,
                 secure = excluded.secure,
                 same_site = excluded.same_site,
                 expires_at = excluded.expires_at",
            params![
                cookie.name,
                cookie.value,
                cookie.secure,
                cookie.same_site,
                cookie.expires_at
            ],
        )
        .with_context(|| format!("Failed to write cookie: {}", cookie.name))?;
        Ok(())
    }

    pub fn cookie(&self, name: &str) -> Result<Option<StoredCookie>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT name, value, secure, same_site, expires_at
             FROM client_cookies WHERE name = ?",
            [name],
            row_to_cookie,
        )
        .optional()
        .with_context(|| format!("Failed to read cookie: {}", name))
    }

    pub fn remove_cookie(&self, name: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM client_cookies WHERE name = ?", [name])
            .with_context(|| format!("Failed to remove cookie: {}", name))?;
        Ok(())
    }

    /// All stored cookies, ordered by name
    pub fn cookies(&self) -> Result<Vec<StoredCookie>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT name, value, secure, same_site, expires_at
                 FROM client_cookies ORDER BY name",
            )
            .context("Failed to prepare cookie query")?;
        let rows = stmt
            .query_map([], row_to_cookie)
            .context("Failed to query cookies")?;

        let mut cookies = Vec::new();
        for row in rows {
            cookies.push(row.context("Failed to read cookie row")?);
        }
        Ok(cookies)
    }
}

fn row_to_cookie(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredCookie> {
    Ok(StoredCookie {
        name: row.get(0)?,
        value: row.get(1)?,
        secure: row.get(2)?,
        same_site: row.get(3)?,
        expires_at: row.get(4)?,
    })
}
