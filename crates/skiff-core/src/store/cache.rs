use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Name of the shared cache database under the data root.
pub const CACHE_DB_FILENAME: &str = "cache.sqlite3";

// `INSERT ... ON CONFLICT DO UPDATE` arrived in SQLite 3.24.0.
const UPSERT_MIN_VERSION: i32 = 3_024_000;

/// Persistent key → JSON value map stored as one SQLite table.
///
/// Each write for a key replaces its value and timestamp; a key never has more
/// than one row.
#[derive(Clone, Debug)]
pub struct KeyValueCache {
    db_path: PathBuf,
    table: String,
}

impl KeyValueCache {
    /// Open (creating if needed) the table `name` in the database at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>, name: &str) -> Result<Self> {
        if name.is_empty()
            || name.starts_with(|ch: char| ch.is_ascii_digit())
            || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            bail!("invalid cache table name {name:?}");
        }
        let cache = Self {
            db_path: db_path.into(),
            table: name.to_string(),
        };
        let conn = cache.connection()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT, ts INTEGER)",
            cache.table
        ))
        .with_context(|| format!("failed to initialize cache table {}", cache.table))?;
        Ok(cache)
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Upsert every entry in one transaction.
    pub fn set_many<K, V, I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: Serialize,
    {
        let rows = entries
            .into_iter()
            .map(|(key, value)| Ok((key.to_string(), encode(&value)?)))
            .collect::<Result<Vec<_>>>()?;
        let query = if rusqlite::version_number() >= UPSERT_MIN_VERSION {
            format!(
                "INSERT INTO {} (key, value, ts) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (key) DO UPDATE SET value=excluded.value, ts=excluded.ts",
                self.table
            )
        } else {
            format!(
                "INSERT OR REPLACE INTO {} (key, value, ts) VALUES (?1, ?2, ?3)",
                self.table
            )
        };
        let now = timestamp_secs();
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start cache transaction")?;
        {
            let mut stmt = tx.prepare_cached(&query)?;
            for (key, value) in &rows {
                stmt.execute(params![key, value, now])?;
            }
        }
        tx.commit().context("failed to commit cache transaction")?;
        debug!(table = %self.table, entries = rows.len(), "cache updated");
        Ok(rows.len())
    }

    pub fn set<V: Serialize>(&self, key: impl ToString, value: &V) -> Result<()> {
        self.set_many([(key.to_string(), value)])?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.connection()?;
        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1 LIMIT 1", self.table),
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read cache key {key:?}"))?;
        raw.map(|raw| {
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to decode cache value for {key:?}"))
        })
        .transpose()
    }

    /// Value for `key`, or `default` when absent.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("failed to open cache at {}", self.db_path.display()))?;
        conn.busy_timeout(Duration::from_secs(10))
            .context("failed to set busy timeout for cache")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL for cache")?;
        Ok(conn)
    }
}

// UUIDs, timestamps and other domain types flatten through their serde
// representation.
fn encode<V: Serialize>(value: &V) -> Result<String> {
    serde_json::to_string(value).context("failed to encode cache value")
}

fn timestamp_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
