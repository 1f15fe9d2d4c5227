//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::key::QueryKey;

/// A query result as written to persistent storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedQuery {
  pub key: QueryKey,
  pub data: Value,
  /// When the data was fetched or written
  pub updated_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Store (or replace) one query result.
  fn save(&self, query: &PersistedQuery) -> Result<()>;

  /// Load every stored result not older than `max_age`.
  fn load(&self, max_age: Duration) -> Result<Vec<PersistedQuery>>;

  /// Drop one stored result.
  fn remove(&self, key: &QueryKey) -> Result<()>;

  /// Drop everything.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn save(&self, _query: &PersistedQuery) -> Result<()> {
    Ok(())
  }

  fn load(&self, _max_age: Duration) -> Result<Vec<PersistedQuery>> {
    Ok(Vec::new())
  }

  fn remove(&self, _key: &QueryKey) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Store that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("crm-sync").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock();

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    key_hash TEXT PRIMARY KEY,
    query_key TEXT NOT NULL,
    namespace TEXT NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_query_cache_namespace
    ON query_cache(namespace);
"#;

impl CacheStorage for SqliteStorage {
  fn save(&self, query: &PersistedQuery) -> Result<()> {
    let conn = self.conn.lock();

    let key_json =
      serde_json::to_string(&query.key).map_err(|e| eyre!("Failed to serialize key: {}", e))?;
    let data =
      serde_json::to_vec(&query.data).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (key_hash, query_key, namespace, data, updated_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          query.key.cache_hash(),
          key_json,
          query.key.namespace().unwrap_or_default(),
          data,
          query.updated_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store query result: {}", e))?;

    Ok(())
  }

  fn load(&self, max_age: Duration) -> Result<Vec<PersistedQuery>> {
    let conn = self.conn.lock();

    let oldest = chrono::Duration::from_std(max_age)
      .ok()
      .and_then(|age| Utc::now().checked_sub_signed(age))
      .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut stmt = conn
      .prepare("SELECT query_key, data, updated_at FROM query_cache")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query cache: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    // Rows that no longer decode are skipped rather than failing the load
    let queries = rows
      .into_iter()
      .filter_map(|(key_json, data, updated_at)| {
        let key: QueryKey = serde_json::from_str(&key_json).ok()?;
        let data: Value = serde_json::from_slice(&data).ok()?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
          .ok()?
          .with_timezone(&Utc);
        Some(PersistedQuery {
          key,
          data,
          updated_at,
        })
      })
      .filter(|q| q.updated_at >= oldest)
      .collect();

    Ok(queries)
  }

  fn remove(&self, key: &QueryKey) -> Result<()> {
    let conn = self.conn.lock();

    conn
      .execute(
        "DELETE FROM query_cache WHERE key_hash = ?",
        params![key.cache_hash()],
      )
      .map_err(|e| eyre!("Failed to delete query result: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self.conn.lock();

    conn
      .execute("DELETE FROM query_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn persisted(key: QueryKey, data: Value, age_secs: i64) -> PersistedQuery {
    PersistedQuery {
      key,
      data,
      updated_at: Utc::now() - chrono::Duration::seconds(age_secs),
    }
  }

  #[test]
  fn test_save_and_load() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let key = QueryKey::new("contacts")
      .with("list")
      .with_value(&json!({ "page": 1 }));

    storage
      .save(&persisted(key.clone(), json!({ "items": [] }), 0))
      .unwrap();

    let loaded = storage.load(Duration::from_secs(60)).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].key, key);
    assert_eq!(loaded[0].data, json!({ "items": [] }));
  }

  #[test]
  fn test_shared_across_threads() {
    let storage = std::sync::Arc::new(SqliteStorage::open_in_memory().unwrap());

    let handles: Vec<_> = (0..4)
      .map(|i| {
        let storage = storage.clone();
        std::thread::spawn(move || {
          let key = QueryKey::new("contacts").with("detail").with(format!("c-{}", i));
          storage.save(&persisted(key, json!({ "id": i }), 0)).unwrap();
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(storage.load(Duration::from_secs(60)).unwrap().len(), 4);
  }

  #[test]
  fn test_save_replaces_existing_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let key = QueryKey::new("dashboard").with("stats");

    storage
      .save(&persisted(key.clone(), json!({ "total_contacts": 1 }), 0))
      .unwrap();
    storage
      .save(&persisted(key.clone(), json!({ "total_contacts": 2 }), 0))
      .unwrap();

    let loaded = storage.load(Duration::from_secs(60)).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].data["total_contacts"], 2);
  }

  #[test]
  fn test_load_skips_entries_older_than_max_age() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .save(&persisted(QueryKey::new("fresh"), json!(1), 10))
      .unwrap();
    storage
      .save(&persisted(QueryKey::new("old"), json!(2), 7200))
      .unwrap();

    let loaded = storage.load(Duration::from_secs(3600)).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].key, QueryKey::new("fresh"));
  }

  #[test]
  fn test_remove_and_clear() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .save(&persisted(QueryKey::new("a"), json!(1), 0))
      .unwrap();
    storage
      .save(&persisted(QueryKey::new("b"), json!(2), 0))
      .unwrap();

    storage.remove(&QueryKey::new("a")).unwrap();
    assert_eq!(storage.load(Duration::from_secs(60)).unwrap().len(), 1);

    storage.clear().unwrap();
    assert!(storage.load(Duration::from_secs(60)).unwrap().is_empty());
  }

  #[test]
  fn test_open_file_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    let storage = SqliteStorage::open(Some(&path)).unwrap();
    storage
      .save(&persisted(QueryKey::new("contacts"), json!([]), 0))
      .unwrap();
    drop(storage);

    let reopened = SqliteStorage::open(Some(&path)).unwrap();
    assert_eq!(reopened.load(Duration::from_secs(60)).unwrap().len(), 1);
  }
}
