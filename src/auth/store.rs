// Durable credential storage

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::types::CredentialPair;

/// Storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Storage key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Keyed storage holding the current credential pair
///
/// Outlives any single client. Implementations must make `set` and `clear`
/// atomic: readers see either the old pair, the new pair, or nothing.
pub trait CredentialStore: Send + Sync {
    /// Current pair, if both tokens are stored
    fn get(&self) -> Result<Option<CredentialPair>>;

    /// Replace both tokens at once
    fn set(&self, pair: &CredentialPair) -> Result<()>;

    /// Remove both tokens
    fn clear(&self) -> Result<()>;
}

/// Process-local store, used by tests and short-lived tools
#[derive(Default)]
pub struct MemoryCredentialStore {
    pair: Mutex<Option<CredentialPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: Mutex::new(Some(pair)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<CredentialPair>> {
        let pair = self
            .pair
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        Ok(pair.clone())
    }

    fn set(&self, new_pair: &CredentialPair) -> Result<()> {
        let mut pair = self
            .pair
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        *pair = Some(new_pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut pair = self
            .pair
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        *pair = None;
        Ok(())
    }
}

/// SQLite-backed store; survives process restarts
///
/// Tokens live in an `auth_kv` table under the `access_token` and
/// `refresh_token` keys.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (and create if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create credentials directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS auth_kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))
    }

    /// When the stored pair was last written
    pub fn updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM auth_kv WHERE key = ?",
                [ACCESS_TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read credential timestamp")?;

        value
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .with_context(|| format!("Failed to parse datetime: {}", s))
            })
            .transpose()
    }
}

fn read_key(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
    .with_context(|| format!("Failed to load {} from SQLite", key))
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self) -> Result<Option<CredentialPair>> {
        let conn = self.lock()?;
        let access_token = read_key(&conn, ACCESS_TOKEN_KEY)?;
        let refresh_token = read_key(&conn, REFRESH_TOKEN_KEY)?;

        match (access_token, refresh_token) {
            (Some(access_token), Some(refresh_token)) => Ok(Some(CredentialPair {
                access_token,
                refresh_token,
            })),
            (None, None) => Ok(None),
            _ => {
                tracing::warn!("Credential store holds only one token, treating as empty");
                Ok(None)
            }
        }
    }

    fn set(&self, pair: &CredentialPair) -> Result<()> {
        let mut conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .context("Failed to start credential transaction")?;
        for (key, value) in [
            (ACCESS_TOKEN_KEY, &pair.access_token),
            (REFRESH_TOKEN_KEY, &pair.refresh_token),
        ] {
            tx.execute(
                "INSERT INTO auth_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .with_context(|| format!("Failed to store {}", key))?;
        }
        tx.commit().context("Failed to commit credentials")?;

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM auth_kv WHERE key IN (?1, ?2)",
            params![ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY],
        )
        .context("Failed to clear credentials")?;
        Ok(())
    }
}
