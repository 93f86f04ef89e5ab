//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// A cached response with its timing metadata.
///
/// Lookups return the entry even when it has logically expired; deciding
/// whether an expired entry is still acceptable is the caller's call.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// The cached response body
  pub value: Value,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
  /// When the entry stops being fresh
  pub expires_at: DateTime<Utc>,
}

impl CachedEntry {
  /// Past its time-to-live. Expired entries are still served as a last
  /// resort when the network is unavailable.
  pub fn is_expired(&self) -> bool {
    Utc::now() >= self.expires_at
  }
}

/// Trait for cache storage backends.
pub trait CacheStore: Send + Sync {
  /// Store a response under the given key, overwriting any prior entry.
  fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<()>;

  /// Get the entry for a key, expired or not. None if never stored.
  fn get(&self, key: &str) -> Result<Option<CachedEntry>>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStore;

impl CacheStore for NoopStore {
  fn put(&self, _key: &str, _value: &Value, _ttl: Duration) -> Result<()> {
    Ok(()) // Discard
  }

  fn get(&self, _key: &str) -> Result<Option<CachedEntry>> {
    Ok(None) // Always miss
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the cache database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Run database migrations for the cache table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
-- Response cache keyed by request path + query (stores serialized JSON)
CREATE TABLE IF NOT EXISTS api_cache (
    cache_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    expires_at TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl CacheStore for SqliteStore {
  fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;
    let expires_at = format_datetime(Utc::now() + ttl);

    conn
      .execute(
        "INSERT OR REPLACE INTO api_cache (cache_key, data, expires_at, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![key, data, expires_at],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT data, expires_at, cached_at FROM api_cache WHERE cache_key = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(Vec<u8>, String, String)> = stmt
      .query_row(params![key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    match row {
      Some((data, expires_at_str, cached_at_str)) => {
        let value: Value = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cache entry: {}", e))?;
        Ok(Some(CachedEntry {
          value,
          cached_at: parse_datetime(&cached_at_str)?,
          expires_at: parse_datetime(&expires_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Format a datetime the same way SQLite's datetime('now') does.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn open_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("offline.db")).unwrap();
    (dir, store)
  }

  #[test]
  fn test_put_then_get_returns_identical_value() {
    let (_dir, store) = open_store();
    let value = json!({"count": 2, "results": [{"id": 1}, {"id": 2}]});

    store
      .put("/banco_sangre/unidades/?page=1", &value, Duration::minutes(30))
      .unwrap();

    let entry = store.get("/banco_sangre/unidades/?page=1").unwrap().unwrap();
    assert_eq!(entry.value, value);
    assert!(!entry.is_expired());
  }

  #[test]
  fn test_missing_key_is_none() {
    let (_dir, store) = open_store();
    assert!(store.get("/pacientes/").unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_prior_entry() {
    let (_dir, store) = open_store();

    store
      .put("/medicos/", &json!({"v": 1}), Duration::minutes(5))
      .unwrap();
    store
      .put("/medicos/", &json!({"v": 2}), Duration::minutes(5))
      .unwrap();

    let entry = store.get("/medicos/").unwrap().unwrap();
    assert_eq!(entry.value, json!({"v": 2}));
  }

  #[test]
  fn test_expired_entry_is_still_returned() {
    let (_dir, store) = open_store();

    store
      .put("/examenes/", &json!([1, 2, 3]), Duration::minutes(-1))
      .unwrap();

    let entry = store.get("/examenes/").unwrap().unwrap();
    assert!(entry.is_expired());
    assert_eq!(entry.value, json!([1, 2, 3]));
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      store
        .put("/roles/", &json!({"count": 0}), Duration::minutes(10))
        .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let entry = store.get("/roles/").unwrap().unwrap();
    assert_eq!(entry.value, json!({"count": 0}));
  }

  #[test]
  fn test_noop_store_never_hits() {
    let store = NoopStore;
    store
      .put("/pacientes/", &json!({}), Duration::minutes(5))
      .unwrap();
    assert!(store.get("/pacientes/").unwrap().is_none());
  }
}
