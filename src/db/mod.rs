mod error;
pub mod schema;

pub use error::StoreError;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a connection waits on a lock held by the other execution context.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite connection wrapper with versioned, additive migrations.
pub struct Database {
  conn: Connection,
  path: PathBuf,
}

impl Database {
  /// Open or create the database at `path` and bring its schema up to date.
  pub fn open(path: &Path, migrations: &[&str]) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::StorageUnavailable(format!(
          "failed to create database directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path)
      .map_err(|e| StoreError::classify(e, StoreError::StorageUnavailable))?;

    let mut db = Self {
      conn,
      path: path.to_path_buf(),
    };
    db.configure()?;
    db.run_migrations(migrations)?;

    Ok(db)
  }

  fn configure(&self) -> Result<(), StoreError> {
    self
      .conn
      .busy_timeout(BUSY_TIMEOUT)
      .map_err(|e| StoreError::classify(e, StoreError::StorageUnavailable))?;

    // journal_mode returns the resulting mode as a row
    let _mode: String = self
      .conn
      .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
      .map_err(|e| StoreError::classify(e, StoreError::StorageUnavailable))?;

    Ok(())
  }

  /// Apply every migration step above the stored `user_version`.
  fn run_migrations(&mut self, migrations: &[&str]) -> Result<(), StoreError> {
    let current = self.schema_version()?;

    for (index, step) in migrations.iter().enumerate() {
      let version = index as i64 + 1;
      if version <= current {
        continue;
      }

      let tx = self.conn.transaction().map_err(StoreError::write)?;
      tx.execute_batch(step).map_err(StoreError::write)?;
      tx.pragma_update(None, "user_version", version)
        .map_err(StoreError::write)?;
      tx.commit().map_err(StoreError::write)?;

      tracing::debug!(path = %self.path.display(), version, "applied schema migration");
    }

    Ok(())
  }

  /// Current schema version (`PRAGMA user_version`).
  pub fn schema_version(&self) -> Result<i64, StoreError> {
    self
      .conn
      .pragma_query_value(None, "user_version", |row| row.get(0))
      .map_err(StoreError::read)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn conn(&self) -> &Connection {
    &self.conn
  }

  pub fn conn_mut(&mut self) -> &mut Connection {
    &mut self.conn
  }

  /// Delete the database file and its WAL side files. The caller must have
  /// closed its own connection first.
  pub fn destroy(path: &Path) -> Result<(), StoreError> {
    for suffix in ["", "-wal", "-shm"] {
      let mut file = path.as_os_str().to_owned();
      file.push(suffix);
      let file = PathBuf::from(file);

      match std::fs::remove_file(&file) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
          return Err(StoreError::StorageUnavailable(format!(
            "failed to delete {}: {}",
            file.display(),
            e
          )))
        }
      }
    }
    Ok(())
  }
}
