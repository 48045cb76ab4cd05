//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::traits::{request_key, CachedResponse};
use crate::http::{Request, Response};

/// Trait for cache bucket storage backends.
///
/// Each call is atomic on its own; callers need no extra locking.
pub trait CacheStorage: Send + Sync {
  /// Create the bucket if it does not exist yet.
  fn open(&self, bucket: &str) -> Result<()>;

  /// Bucket names in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a bucket and all its entries. Returns whether it existed.
  fn delete(&self, bucket: &str) -> Result<bool>;

  /// Look up a request across all buckets, oldest bucket first.
  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>>;

  /// Look up a request in a single bucket.
  #[cfg(test)]
  fn match_in(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Store a response under a request, replacing any previous entry.
  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store every entry or none of them.
  fn put_all(&self, bucket: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Number of entries in a bucket.
  fn entry_count(&self, bucket: &str) -> Result<usize>;
}

impl<T: CacheStorage + ?Sized> CacheStorage for Arc<T> {
  fn open(&self, bucket: &str) -> Result<()> {
    (**self).open(bucket)
  }

  fn keys(&self) -> Result<Vec<String>> {
    (**self).keys()
  }

  fn delete(&self, bucket: &str) -> Result<bool> {
    (**self).delete(bucket)
  }

  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    (**self).match_request(request)
  }

  #[cfg(test)]
  fn match_in(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>> {
    (**self).match_in(bucket, request)
  }

  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<()> {
    (**self).put(bucket, request, response)
  }

  fn put_all(&self, bucket: &str, entries: &[(Request, Response)]) -> Result<()> {
    (**self).put_all(bucket, entries)
  }

  fn entry_count(&self, bucket: &str) -> Result<usize> {
    (**self).entry_count(bucket)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at `path`, or at the default location.
  pub fn open_at(path: Option<&Path>) -> Result<Self> {
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

  /// Storage that lives only as long as the process.
  #[cfg(test)]
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
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
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

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named buckets; id preserves creation order
CREATE TABLE IF NOT EXISTS buckets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One response per (bucket, request identity)
CREATE TABLE IF NOT EXISTS entries (
    bucket TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, request_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(request_key);
"#;

/// Identity and storage key for a request that may be stored.
fn storable_key(request: &Request, response: &Response) -> Result<(String, String)> {
  let identity = request
    .cache_identity()
    .ok_or_else(|| eyre!("Refusing to cache {} request for {}", request.method, request.url))?;
  if response.status == 206 {
    return Err(eyre!("Refusing to cache partial response for {}", request.url));
  }
  let key = request_key(&identity);
  Ok((identity, key))
}

fn insert_bucket(conn: &Connection, bucket: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
      params![bucket],
    )
    .map_err(|e| eyre!("Failed to open cache '{}': {}", bucket, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  bucket: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let (identity, key) = storable_key(request, response)?;
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (bucket, request_key, url, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        bucket,
        key,
        identity,
        response.status,
        response.status_text,
        headers,
        response.body.as_ref()
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", identity, e))?;

  Ok(())
}

type EntryRow = (u16, String, String, Vec<u8>, String);

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_cached(row: EntryRow) -> Result<CachedResponse> {
  let (status, status_text, headers, body, cached_at) = row;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
  Ok(CachedResponse {
    response: Response {
      status,
      status_text,
      headers,
      body: body.into(),
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn open(&self, bucket: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    insert_bucket(&conn, bucket)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM buckets ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, bucket: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE bucket = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete entries of '{}': {}", bucket, e))?;
    let removed = tx
      .execute("DELETE FROM buckets WHERE name = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete cache '{}': {}", bucket, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let Some(identity) = request.cache_identity() else {
      return Ok(None);
    };
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row = conn
      .query_row(
        "SELECT e.status, e.status_text, e.headers, e.body, e.cached_at FROM entries e
         INNER JOIN buckets b ON b.name = e.bucket
         WHERE e.request_key = ?
         ORDER BY b.id
         LIMIT 1",
        params![request_key(&identity)],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", identity, e))?;

    row.map(into_cached).transpose()
  }

  #[cfg(test)]
  fn match_in(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let Some(identity) = request.cache_identity() else {
      return Ok(None);
    };
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row = conn
      .query_row(
        "SELECT status, status_text, headers, body, cached_at FROM entries
         WHERE bucket = ? AND request_key = ?",
        params![bucket, request_key(&identity)],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in '{}': {}", identity, bucket, e))?;

    row.map(into_cached).transpose()
  }

  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<()> {
    self.put_all(bucket, &[(request.clone(), response.clone())])
  }

  fn put_all(&self, bucket: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Dropping the transaction on error rolls it back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    insert_bucket(&tx, bucket)?;
    for (request, response) in entries {
      insert_entry(&tx, bucket, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, bucket: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE bucket = ?",
        params![bucket],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of '{}': {}", bucket, e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(path: &str) -> Request {
    let origin = Url::parse("http://localhost:5000").unwrap();
    Request::get_path(&origin, path).unwrap()
  }

  #[test]
  fn test_open_is_idempotent_and_ordered() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("v1").unwrap();
    storage.open("v2").unwrap();
    storage.open("v1").unwrap();

    assert_eq!(storage.keys().unwrap(), vec!["v1", "v2"]);
  }

  #[test]
  fn test_put_then_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let resp = Response::new(200, "<html>").with_header("content-type", "text/html");
    storage.put("v1", &request("/"), &resp).unwrap();

    let cached = storage.match_in("v1", &request("/")).unwrap().unwrap();
    assert_eq!(cached.response, resp);
    assert!(storage.match_in("v1", &request("/other")).unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("v1", &request("/"), &Response::new(200, "old")).unwrap();
    storage.put("v1", &request("/"), &Response::new(200, "new")).unwrap();

    let cached = storage.match_request(&request("/")).unwrap().unwrap();
    assert_eq!(&cached.response.body[..], b"new");
    assert_eq!(storage.entry_count("v1").unwrap(), 1);
  }

  #[test]
  fn test_match_ignores_fragment() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("v1", &request("/page"), &Response::new(200, "x")).unwrap();
    assert!(storage.match_request(&request("/page#section")).unwrap().is_some());
  }

  #[test]
  fn test_match_request_prefers_oldest_bucket() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("old", &request("/"), &Response::new(200, "old")).unwrap();
    storage.put("new", &request("/"), &Response::new(200, "new")).unwrap();

    let cached = storage.match_request(&request("/")).unwrap().unwrap();
    assert_eq!(&cached.response.body[..], b"old");
  }

  #[test]
  fn test_non_get_is_never_stored_or_matched() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("v1", &request("/"), &Response::new(200, "x")).unwrap();

    let mut post = request("/");
    post.method = "POST".to_string();
    assert!(storage.match_request(&post).unwrap().is_none());
    assert!(storage.put("v1", &post, &Response::new(200, "y")).is_err());
  }

  #[test]
  fn test_partial_response_refused() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage
      .put("v1", &request("/video"), &Response::new(206, "part"))
      .is_err());
    assert_eq!(storage.entry_count("v1").unwrap(), 0);
  }

  #[test]
  fn test_put_all_is_atomic() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut bad = request("/b");
    bad.method = "PUT".to_string();

    let entries = vec![
      (request("/a"), Response::new(200, "a")),
      (bad, Response::new(200, "b")),
    ];
    assert!(storage.put_all("v1", &entries).is_err());

    assert_eq!(storage.entry_count("v1").unwrap(), 0);
    assert!(storage.keys().unwrap().is_empty());
  }

  #[test]
  fn test_delete_removes_bucket_and_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("v1", &request("/"), &Response::new(200, "x")).unwrap();

    assert!(storage.delete("v1").unwrap());
    assert!(!storage.delete("v1").unwrap());
    assert!(storage.keys().unwrap().is_empty());
    assert!(storage.match_request(&request("/")).unwrap().is_none());
  }

  #[test]
  fn test_open_at_creates_parent_directory() {
    let dir = std::env::temp_dir().join(format!("shellcache-test-{}", std::process::id()));
    let path = dir.join("nested").join("cache.db");

    let storage = SqliteStorage::open_at(Some(&path)).unwrap();
    storage.open("v1").unwrap();
    assert!(path.exists());

    drop(storage);
    let _ = std::fs::remove_dir_all(&dir);
  }
}
