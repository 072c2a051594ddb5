use thiserror::Error;

/// Failures of the record store and its sync queue.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The durable storage could not be reached at all.
  #[error("durable storage is unavailable: {0}")]
  StorageUnavailable(String),

  /// A write transaction aborted; nothing was applied.
  #[error("write failed and was rolled back: {0}")]
  WriteFailed(String),

  /// `update` was called on a record that was never created.
  #[error("an inspection id is required for update")]
  MissingId,

  #[error("inspection {0} not found")]
  NotFound(i64),

  /// The database file is damaged. Only `recover()` gets out of this.
  #[error("durable store is corrupt: {0}")]
  CorruptStore(String),

  #[error("failed to read from durable store: {0}")]
  Read(String),
}

impl StoreError {
  /// Map a SQLite error, sending corruption to `CorruptStore` and everything else to `fallback`.
  pub fn classify(err: rusqlite::Error, fallback: fn(String) -> StoreError) -> StoreError {
    use rusqlite::ErrorCode;

    match err.sqlite_error_code() {
      Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
        StoreError::CorruptStore(err.to_string())
      }
      _ => fallback(err.to_string()),
    }
  }

  pub fn write(err: rusqlite::Error) -> StoreError {
    Self::classify(err, StoreError::WriteFailed)
  }

  pub fn read(err: rusqlite::Error) -> StoreError {
    Self::classify(err, StoreError::Read)
  }

  /// Whether the UI should offer the destructive recovery path.
  pub fn is_corruption(&self) -> bool {
    matches!(self, StoreError::CorruptStore(_))
  }
}
