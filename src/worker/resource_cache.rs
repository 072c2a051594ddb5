//! Durable, versioned cache of request/response pairs owned by the worker.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::http::{Request, Response};
use crate::db::{schema, Database, StoreError};
use crate::model::{format_timestamp, parse_timestamp};
use crate::store::rows::{conversion_error, InvalidValue};

/// Identity of one cached request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
  pub request_key: String,
  pub method: String,
  pub url: String,
  pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CachedResource {
  pub key: CacheKey,
  pub request_body: Option<Vec<u8>>,
  pub response: Response,
}

/// Stable key for a request: sha256 over method and URL, plus an optional
/// discriminator for entries that must never replace each other.
pub fn request_key(method: &str, url: &str, discriminator: Option<&str>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_bytes());
  if let Some(extra) = discriminator {
    hasher.update(b"#");
    hasher.update(extra.as_bytes());
  }
  hex::encode(hasher.finalize())
}

/// Storage backend for the resource cache.
pub trait ResourceStorage: Send + Sync {
  /// Store `response` for `request`, replacing any earlier entry.
  fn put(&self, cache: &str, request: &Request, response: &Response) -> Result<(), StoreError>;

  /// Store `response` under a fresh key so it never replaces anything.
  fn append(&self, cache: &str, request: &Request, response: &Response) -> Result<(), StoreError>;

  fn get(&self, cache: &str, request: &Request) -> Result<Option<CachedResource>, StoreError>;

  fn get_by_key(&self, cache: &str, request_key: &str)
    -> Result<Option<CachedResource>, StoreError>;

  /// Every key in `cache`, oldest first.
  fn keys(&self, cache: &str) -> Result<Vec<CacheKey>, StoreError>;

  fn remove(&self, cache: &str, request_key: &str) -> Result<bool, StoreError>;

  fn cache_names(&self) -> Result<Vec<String>, StoreError>;

  /// Drop a whole named cache. Returns the number of entries removed.
  fn delete_cache(&self, cache: &str) -> Result<usize, StoreError>;

  /// Drop entries of `cache` inserted before `cutoff`.
  fn evict_older_than(&self, cache: &str, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Storage that caches nothing.
/// Used when `resources.db` cannot be opened; the proxy then behaves as
/// network-only with offline fallbacks.
pub struct NoopResourceStorage;

impl ResourceStorage for NoopResourceStorage {
  fn put(&self, _cache: &str, _request: &Request, _response: &Response) -> Result<(), StoreError> {
    Ok(())
  }

  fn append(&self, _cache: &str, _request: &Request, _response: &Response) -> Result<(), StoreError> {
    Err(StoreError::StorageUnavailable(
      "resource cache is not open".to_string(),
    ))
  }

  fn get(&self, _cache: &str, _request: &Request) -> Result<Option<CachedResource>, StoreError> {
    Ok(None)
  }

  fn get_by_key(
    &self,
    _cache: &str,
    _request_key: &str,
  ) -> Result<Option<CachedResource>, StoreError> {
    Ok(None)
  }

  fn keys(&self, _cache: &str) -> Result<Vec<CacheKey>, StoreError> {
    Ok(Vec::new())
  }

  fn remove(&self, _cache: &str, _request_key: &str) -> Result<bool, StoreError> {
    Ok(false)
  }

  fn cache_names(&self) -> Result<Vec<String>, StoreError> {
    Ok(Vec::new())
  }

  fn delete_cache(&self, _cache: &str) -> Result<usize, StoreError> {
    Ok(0)
  }

  fn evict_older_than(&self, _cache: &str, _cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
    Ok(0)
  }
}

/// SQLite-backed resource cache (`resources.db`).
pub struct SqliteResourceStorage {
  db: Mutex<Database>,
}

/// Disambiguates appends that land in the same microsecond.
static APPEND_SEQ: AtomicU64 = AtomicU64::new(0);

const RESOURCE_COLUMNS: &str =
  "request_key, method, url, request_body, status, status_text, headers, body, inserted_at";

impl SqliteResourceStorage {
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    let db = Database::open(path, schema::RESOURCE_MIGRATIONS)?;
    Ok(Self { db: Mutex::new(db) })
  }

  fn lock(&self) -> MutexGuard<'_, Database> {
    self.db.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn insert(
    &self,
    cache: &str,
    key: &str,
    request: &Request,
    response: &Response,
    inserted_at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

    self
      .lock()
      .conn()
      .execute(
        r#"
        INSERT OR REPLACE INTO resource_cache
            (cache_name, request_key, method, url, request_body, status, status_text, headers, body, inserted_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
          cache,
          key,
          request.method.as_str(),
          request.url.as_str(),
          request.body,
          response.status,
          response.status_text,
          headers,
          response.body,
          format_timestamp(&inserted_at),
        ],
      )
      .map_err(StoreError::write)?;

    Ok(())
  }
}

fn stored_time(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
  let text: String = row.get(column)?;
  parse_timestamp(&text).ok_or_else(|| conversion_error(column, InvalidValue(text.clone())))
}

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<CacheKey> {
  Ok(CacheKey {
    request_key: row.get(0)?,
    method: row.get(1)?,
    url: row.get(2)?,
    inserted_at: stored_time(row, 3)?,
  })
}

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<CachedResource> {
  let headers: String = row.get(6)?;
  let headers: BTreeMap<String, String> =
    serde_json::from_str(&headers).map_err(|e| conversion_error(6, e))?;

  Ok(CachedResource {
    key: CacheKey {
      request_key: row.get(0)?,
      method: row.get(1)?,
      url: row.get(2)?,
      inserted_at: stored_time(row, 8)?,
    },
    request_body: row.get(3)?,
    response: Response {
      status: row.get(4)?,
      status_text: row.get(5)?,
      headers,
      body: row.get(7)?,
    },
  })
}

impl ResourceStorage for SqliteResourceStorage {
  fn put(&self, cache: &str, request: &Request, response: &Response) -> Result<(), StoreError> {
    let key = request_key(request.method.as_str(), request.url.as_str(), None);
    self.insert(cache, &key, request, response, Utc::now())
  }

  fn append(&self, cache: &str, request: &Request, response: &Response) -> Result<(), StoreError> {
    let now = Utc::now();
    let stamp = format_timestamp(&now);
    let body_hash = request
      .body
      .as_deref()
      .map(|body| hex::encode(Sha256::digest(body)))
      .unwrap_or_default();
    let key = request_key(
      request.method.as_str(),
      request.url.as_str(),
      Some(&format!(
        "{}:{}:{}",
        stamp,
        APPEND_SEQ.fetch_add(1, Ordering::Relaxed),
        body_hash
      )),
    );
    self.insert(cache, &key, request, response, now)
  }

  fn get(&self, cache: &str, request: &Request) -> Result<Option<CachedResource>, StoreError> {
    let key = request_key(request.method.as_str(), request.url.as_str(), None);
    self.get_by_key(cache, &key)
  }

  fn get_by_key(
    &self,
    cache: &str,
    request_key: &str,
  ) -> Result<Option<CachedResource>, StoreError> {
    self
      .lock()
      .conn()
      .query_row(
        &format!(
          "SELECT {RESOURCE_COLUMNS} FROM resource_cache WHERE cache_name = ? AND request_key = ?"
        ),
        params![cache, request_key],
        resource_from_row,
      )
      .optional()
      .map_err(StoreError::read)
  }

  fn keys(&self, cache: &str) -> Result<Vec<CacheKey>, StoreError> {
    let db = self.lock();
    let mut stmt = db
      .conn()
      .prepare(
        "SELECT request_key, method, url, inserted_at FROM resource_cache
         WHERE cache_name = ? ORDER BY inserted_at ASC, rowid ASC",
      )
      .map_err(StoreError::read)?;

    let keys = stmt
      .query_map(params![cache], key_from_row)
      .map_err(StoreError::read)?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(StoreError::read)?;

    Ok(keys)
  }

  fn remove(&self, cache: &str, request_key: &str) -> Result<bool, StoreError> {
    let removed = self
      .lock()
      .conn()
      .execute(
        "DELETE FROM resource_cache WHERE cache_name = ? AND request_key = ?",
        params![cache, request_key],
      )
      .map_err(StoreError::write)?;
    Ok(removed > 0)
  }

  fn cache_names(&self) -> Result<Vec<String>, StoreError> {
    let db = self.lock();
    let mut stmt = db
      .conn()
      .prepare("SELECT DISTINCT cache_name FROM resource_cache ORDER BY cache_name")
      .map_err(StoreError::read)?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(StoreError::read)?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(StoreError::read)?;

    Ok(names)
  }

  fn delete_cache(&self, cache: &str) -> Result<usize, StoreError> {
    self
      .lock()
      .conn()
      .execute(
        "DELETE FROM resource_cache WHERE cache_name = ?",
        params![cache],
      )
      .map_err(StoreError::write)
  }

  fn evict_older_than(&self, cache: &str, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
    // RFC 3339 in UTC with fixed precision sorts lexically
    self
      .lock()
      .conn()
      .execute(
        "DELETE FROM resource_cache WHERE cache_name = ? AND inserted_at < ?",
        params![cache, format_timestamp(&cutoff)],
      )
      .map_err(StoreError::write)
  }
}
