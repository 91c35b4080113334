use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

/// A server-side record of a successful login, used to restore browser
/// cookies without re-authenticating.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
    pub company_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires_at: DateTime<Utc>,
    pub http_only: bool,
    pub secure: bool,
}

/// SQLite-backed store for sessions, their cookie jars, and a generic
/// expiring key-value cache. All writes are serialized through the
/// connection mutex; multi-row operations run inside a transaction.
pub struct Storage {
    db: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Connection::open(path)?;
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=10000;
             PRAGMA temp_store=MEMORY;",
        )?;
        Self::initialize(&db)?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn initialize(db: &Connection) -> rusqlite::Result<()> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                expires_at TIMESTAMP,
                user_id TEXT,
                company_id TEXT
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS cookies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                domain TEXT,
                path TEXT,
                expires_at TIMESTAMP,
                http_only BOOLEAN DEFAULT 0,
                secure BOOLEAN DEFAULT 0,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                ttl INTEGER
            )",
            [],
        )?;

        Ok(())
    }

    // --- Sessions ---

    /// Fails if the session id already exists; ids are never reused.
    pub async fn create_session(&self, session: &Session) -> rusqlite::Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sessions (id, created_at, updated_at, expires_at, user_id, company_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                session.created_at,
                session.updated_at,
                session.expires_at,
                session.user_id,
                session.company_id,
            ],
        )?;
        Ok(())
    }

    /// Returns `None` both when no row exists and when the row has expired.
    pub async fn get_session(&self, session_id: &str) -> rusqlite::Result<Option<Session>> {
        let db = self.db.lock().await;
        db.query_row(
            "SELECT id, created_at, updated_at, expires_at, user_id, company_id
             FROM sessions
             WHERE id = ?1 AND expires_at > ?2",
            params![session_id, Utc::now()],
            |row| {
                Ok(Session {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    updated_at: row.get(2)?,
                    expires_at: row.get(3)?,
                    user_id: row.get(4)?,
                    company_id: row.get(5)?,
                })
            },
        )
        .optional()
    }

    /// Removes the session and all its cookies as one unit. Deleting a
    /// session that does not exist is not an error.
    pub async fn delete_session(&self, session_id: &str) -> rusqlite::Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM cookies WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        tx.commit()
    }

    // --- Cookies ---

    /// Atomically replaces the full cookie set for a session:
    /// delete-then-insert under one transaction, never a merge.
    pub async fn save_cookies(
        &self,
        session_id: &str,
        cookies: &[Cookie],
    ) -> rusqlite::Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM cookies WHERE session_id = ?1",
            params![session_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cookies
                 (session_id, name, value, domain, path, expires_at, http_only, secure)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for cookie in cookies {
                stmt.execute(params![
                    session_id,
                    cookie.name,
                    cookie.value,
                    cookie.domain,
                    cookie.path,
                    cookie.expires_at,
                    cookie.http_only,
                    cookie.secure,
                ])?;
            }
        }
        tx.commit()
    }

    pub async fn get_cookies(&self, session_id: &str) -> rusqlite::Result<Vec<Cookie>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT name, value, domain, path, expires_at, http_only, secure
             FROM cookies
             WHERE session_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(Cookie {
                name: row.get(0)?,
                value: row.get(1)?,
                domain: row.get(2)?,
                path: row.get(3)?,
                expires_at: row.get(4)?,
                http_only: row.get(5)?,
                secure: row.get(6)?,
            })
        })?;

        let mut cookies = Vec::new();
        for row in rows {
            cookies.push(row?);
        }
        Ok(cookies)
    }

    // --- Record cache (generic expiring KV) ---

    pub async fn cache_record(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> rusqlite::Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO kv_store (key, value, updated_at, ttl)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at,
                 ttl = excluded.ttl",
            params![key, value.to_string(), Utc::now(), ttl.as_secs() as i64],
        )?;
        Ok(())
    }

    /// Absent and expired are indistinguishable to the caller.
    pub async fn get_cached_record(&self, key: &str) -> rusqlite::Result<Option<serde_json::Value>> {
        let db = self.db.lock().await;
        let row: Option<(String, DateTime<Utc>, i64)> = db
            .query_row(
                "SELECT value, updated_at, ttl FROM kv_store WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((value, updated_at, ttl)) => {
                let expires_at = updated_at + chrono::Duration::seconds(ttl);
                if Utc::now() >= expires_at {
                    return Ok(None);
                }
                Ok(serde_json::from_str(&value).ok())
            }
            None => Ok(None),
        }
    }

    // --- Cleanup ---

    /// Batch-deletes expired sessions, cookies, and cache entries.
    /// Returns the number of rows removed; idempotent across repeated runs.
    pub async fn cleanup_expired(&self) -> rusqlite::Result<usize> {
        let now = Utc::now();
        let db = self.db.lock().await;
        let mut removed = 0;
        removed += db.execute(
            "DELETE FROM cookies WHERE session_id IN
                 (SELECT id FROM sessions WHERE expires_at < ?1)",
            params![now],
        )?;
        removed += db.execute("DELETE FROM sessions WHERE expires_at < ?1", params![now])?;
        removed += db.execute("DELETE FROM cookies WHERE expires_at < ?1", params![now])?;
        // datetime() truncates to whole seconds, so boundary entries need <=
        // to match the read path's `now >= expires_at` rule.
        removed += db.execute(
            "DELETE FROM kv_store
             WHERE datetime(updated_at, '+' || ttl || ' seconds') <= datetime(?1)",
            params![now],
        )?;
        Ok(removed)
    }
}

/// Create a temp-dir backed Storage for testing.
#[cfg(test)]
pub fn test_storage() -> (Storage, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let storage = Storage::open(dir.path().join("test.db")).expect("open test db");
    (storage, dir)
}

#[cfg(test)]
impl Storage {
    /// Direct statement execution for test setup (schema sabotage and the
    /// like).
    pub(crate) async fn execute_raw(&self, sql: &str) -> rusqlite::Result<usize> {
        let db = self.db.lock().await;
        db.execute(sql, [])
    }
}
