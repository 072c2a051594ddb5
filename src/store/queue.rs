//! The sync queue: an append-only log of pending mutations.
//!
//! Entries are appended inside the same transaction as the record write that
//! caused them, and are removed only once the background worker has delivered
//! them. Entries are never rewritten and never collapsed per record.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use super::rows::{entry_from_row, QUEUE_COLUMNS};
use crate::db::{schema, Database, StoreError};
use crate::model::{format_timestamp, InspectionRecord, SyncOperation, SyncQueueEntry};

/// Append one entry. Must run inside the caller's write transaction.
pub(crate) fn append(
  conn: &Connection,
  record_id: i64,
  operation: SyncOperation,
  snapshot: &InspectionRecord,
  queued_at: DateTime<Utc>,
) -> Result<i64, StoreError> {
  let payload =
    serde_json::to_string(snapshot).map_err(|e| StoreError::WriteFailed(e.to_string()))?;

  conn
    .execute(
      "INSERT INTO sync_queue (record_id, operation, payload, queued_at) VALUES (?, ?, ?, ?)",
      params![
        record_id,
        operation.as_str(),
        payload,
        format_timestamp(&queued_at)
      ],
    )
    .map_err(StoreError::write)?;

  Ok(conn.last_insert_rowid())
}

/// Every queued entry in delivery order (FIFO by `queued_at`, then id).
pub(crate) fn entries(conn: &Connection) -> Result<Vec<SyncQueueEntry>, StoreError> {
  let mut stmt = conn
    .prepare(&format!(
      "SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY queued_at ASC, id ASC"
    ))
    .map_err(StoreError::read)?;

  let entries = stmt
    .query_map([], entry_from_row)
    .map_err(StoreError::read)?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(StoreError::read)?;

  Ok(entries)
}

pub(crate) fn count(conn: &Connection) -> Result<u64, StoreError> {
  conn
    .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get::<_, i64>(0))
    .map(|n| n as u64)
    .map_err(StoreError::read)
}

/// Outcome of confirming one delivered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
  /// The entry was still queued and has been removed
  pub removed: bool,
  /// The originating record had no other outstanding entry and is now synced
  pub record_synced: bool,
}

/// Worker-side handle on the queue, opened on its own connection.
///
/// The worker never shares the UI's connection or cache; it reopens the
/// durable file for every replay pass so a recovered store is picked up.
pub struct SyncQueue {
  db: Database,
}

impl SyncQueue {
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    let db = Database::open(path, schema::RECORD_MIGRATIONS)?;
    Ok(Self { db })
  }

  pub fn path(&self) -> PathBuf {
    self.db.path().to_path_buf()
  }

  pub fn entries(&self) -> Result<Vec<SyncQueueEntry>, StoreError> {
    entries(self.db.conn())
  }

  pub fn len(&self) -> Result<u64, StoreError> {
    count(self.db.conn())
  }

  pub fn is_empty(&self) -> Result<bool, StoreError> {
    Ok(self.len()? == 0)
  }

  /// Remove a delivered entry and, when it was the record's last outstanding
  /// mutation, flip the record to `synced` without queueing anything.
  pub fn confirm(&mut self, entry: &SyncQueueEntry) -> Result<Confirmation, StoreError> {
    let tx = self.db.conn_mut().transaction().map_err(StoreError::write)?;

    let removed = tx
      .execute("DELETE FROM sync_queue WHERE id = ?", params![entry.id])
      .map_err(StoreError::write)?
      > 0;

    let outstanding: Option<i64> = tx
      .query_row(
        "SELECT id FROM sync_queue WHERE record_id = ? LIMIT 1",
        params![entry.record_id],
        |row| row.get(0),
      )
      .optional()
      .map_err(StoreError::write)?;

    let record_synced = if outstanding.is_none() && entry.operation != SyncOperation::Delete {
      tx.execute(
        "UPDATE inspections SET sync_state = 'synced' WHERE id = ?",
        params![entry.record_id],
      )
      .map_err(StoreError::write)?
        > 0
    } else {
      false
    };

    tx.commit().map_err(StoreError::write)?;

    Ok(Confirmation {
      removed,
      record_synced,
    })
  }
}
