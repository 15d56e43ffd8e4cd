// SQLite persistence layer for watchlists and login sessions.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::watchlist::Watchlist;

/// A login session issued to a user.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// SQLite-backed persistence for watchlists and sessions.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS watchlists (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL DEFAULT '',
                name        TEXT NOT NULL,
                description TEXT,
                symbols     TEXT NOT NULL DEFAULT '[]',
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token      TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Self::migrate_watchlists_add_user_id(&conn)?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_watchlists_user_id ON watchlists(user_id);",
        )
        .context("failed to create user_id index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Watchlist tables created before per-user ownership have no `user_id`
    /// column. Legacy rows get `user_id = ''` and stay invisible to every
    /// signed-in user; `inspect watchlists` still lists them.
    fn migrate_watchlists_add_user_id(conn: &Connection) -> Result<()> {
        let has_user_id = conn
            .prepare("SELECT user_id FROM watchlists LIMIT 0")
            .is_ok();
        if has_user_id {
            return Ok(());
        }

        conn.execute_batch("ALTER TABLE watchlists ADD COLUMN user_id TEXT NOT NULL DEFAULT '';")
            .context("failed to add user_id to watchlists")?;
        Ok(())
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Watchlists
    // ------------------------------------------------------------------

    /// Insert a new watchlist and return it. `symbols` must already be
    /// normalized.
    pub fn create_watchlist(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
        symbols: &[String],
    ) -> Result<Watchlist> {
        let conn = self.conn();
        let symbols_json =
            serde_json::to_string(symbols).context("failed to serialize symbols")?;
        let created_at = Utc::now();

        let id: i64 = conn
            .query_row(
                "INSERT INTO watchlists (user_id, name, description, symbols, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id",
                params![
                    user_id,
                    name,
                    description,
                    symbols_json,
                    format_timestamp(&created_at)
                ],
                |row| row.get(0),
            )
            .context("failed to insert watchlist")?;

        Ok(Watchlist {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            symbols: symbols.to_vec(),
            created_at: parse_timestamp(&format_timestamp(&created_at))?,
        })
    }

    /// All watchlists owned by `user_id`, newest first.
    pub fn list_watchlists(&self, user_id: &str) -> Result<Vec<Watchlist>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, name, description, symbols, created_at
                 FROM watchlists WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )
            .context("failed to prepare list_watchlists query")?;

        let rows = stmt
            .query_map(params![user_id], watchlist_from_row)
            .context("failed to query watchlists")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map watchlist rows")?;
        Ok(rows)
    }

    /// Every watchlist in the database, ordered by id. Used by the
    /// inspection commands.
    pub fn list_all_watchlists(&self) -> Result<Vec<Watchlist>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, name, description, symbols, created_at
                 FROM watchlists ORDER BY id",
            )
            .context("failed to prepare list_all_watchlists query")?;

        let rows = stmt
            .query_map([], watchlist_from_row)
            .context("failed to query watchlists")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map watchlist rows")?;
        Ok(rows)
    }

    /// Load one watchlist if it exists and belongs to `user_id`.
    pub fn get_watchlist(&self, user_id: &str, id: i64) -> Result<Option<Watchlist>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, user_id, name, description, symbols, created_at
             FROM watchlists WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            watchlist_from_row,
        )
        .optional()
        .context("failed to load watchlist")
    }

    /// Replace name, description and symbols. Returns `None` if no watchlist
    /// with `id` belongs to `user_id`.
    pub fn update_watchlist(
        &self,
        user_id: &str,
        id: i64,
        name: &str,
        description: Option<&str>,
        symbols: &[String],
    ) -> Result<Option<Watchlist>> {
        let symbols_json =
            serde_json::to_string(symbols).context("failed to serialize symbols")?;
        let changed = {
            let conn = self.conn();
            conn.execute(
                "UPDATE watchlists SET name = ?1, description = ?2, symbols = ?3
                 WHERE id = ?4 AND user_id = ?5",
                params![name, description, symbols_json, id, user_id],
            )
            .context("failed to update watchlist")?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get_watchlist(user_id, id)
    }

    /// Delete a watchlist. Returns `false` if nothing matched.
    pub fn delete_watchlist(&self, user_id: &str, id: i64) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn
            .execute(
                "DELETE FROM watchlists WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("failed to delete watchlist")?;
        Ok(deleted > 0)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Issue a new session token for `user_id`, valid for `ttl`.
    pub fn create_session(&self, user_id: &str, ttl: Duration) -> Result<Session> {
        let token = generate_token();
        let now = parse_timestamp(&format_timestamp(&Utc::now()))?;
        let expires_at = now
            .checked_add_signed(ttl)
            .with_context(|| format!("session lifetime of {} days is too long", ttl.num_days()))?;
        let session = Session {
            token,
            user_id: user_id.to_string(),
            created_at: now,
            expires_at,
        };

        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.token,
                session.user_id,
                format_timestamp(&session.created_at),
                format_timestamp(&session.expires_at),
            ],
        )
        .context("failed to insert session")?;
        Ok(session)
    }

    /// Resolve a token to its user, ignoring sessions that expired before
    /// `now`.
    pub fn session_user(&self, token: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > ?2",
            params![token, format_timestamp(&now)],
            |row| row.get(0),
        )
        .optional()
        .context("failed to look up session")
    }

    /// Delete a session. Returns `false` if the token was unknown.
    pub fn revoke_session(&self, token: &str) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("failed to revoke session")?;
        Ok(deleted > 0)
    }

    /// Remove sessions that expired at or before `now`.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let purged = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![format_timestamp(&now)],
            )
            .context("failed to purge expired sessions")?;
        Ok(purged)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Row count for each application table, in a fixed order.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let conn = self.conn();
        let mut counts = Vec::new();
        for table in ["watchlists", "sessions"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .with_context(|| format!("failed to count {table}"))?;
            counts.push((table, count));
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Row mapping and helpers
// ---------------------------------------------------------------------------

fn watchlist_from_row(row: &Row<'_>) -> rusqlite::Result<Watchlist> {
    let symbols_json: String = row.get(4)?;
    let symbols = serde_json::from_str::<Vec<String>>(&symbols_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let created_at_text: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(Watchlist {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        symbols,
        created_at,
    })
}

/// Fixed-width RFC 3339 (millisecond precision, `Z` suffix) so that text
/// comparison in SQL matches chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("invalid timestamp {text}"))?;
    Ok(dt.with_timezone(&Utc))
}

/// 32 random bytes, hex encoded.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}
