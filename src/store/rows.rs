//! Row <-> model conversions for the record and queue tables.

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::Row;
use thiserror::Error;

use crate::model::{parse_timestamp, InspectionRecord, SyncOperation, SyncQueueEntry, SyncState};
use crate::photo::Photo;

/// Columns selected wherever a full record is read.
pub const RECORD_COLUMNS: &str =
  "id, kind, location, date, notes, photo, created_at, author, sync_state";

/// Columns selected wherever a queue entry is read.
pub const QUEUE_COLUMNS: &str = "id, record_id, operation, payload, queued_at";

/// Date format of the `date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
#[error("invalid stored value '{0}'")]
pub(crate) struct InvalidValue(pub(crate) String);

pub(crate) fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

pub fn record_from_row(row: &Row<'_>) -> rusqlite::Result<InspectionRecord> {
  let kind: String = row.get(1)?;
  let date: String = row.get(3)?;
  let photo: String = row.get(5)?;
  let created_at: String = row.get(6)?;
  let sync_state: String = row.get(8)?;

  Ok(InspectionRecord {
    id: Some(row.get(0)?),
    kind: kind.parse().map_err(|e| conversion_error(1, e))?,
    location: row.get(2)?,
    date: NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| conversion_error(3, e))?,
    notes: row.get(4)?,
    photo: Photo::from_stored(photo),
    created_at: parse_timestamp(&created_at)
      .ok_or_else(|| conversion_error(6, InvalidValue(created_at.clone())))?,
    author: row.get(7)?,
    sync_state: SyncState::parse(&sync_state)
      .ok_or_else(|| conversion_error(8, InvalidValue(sync_state.clone())))?,
  })
}

pub fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<SyncQueueEntry> {
  let operation: String = row.get(2)?;
  let payload: String = row.get(3)?;
  let queued_at: String = row.get(4)?;

  Ok(SyncQueueEntry {
    id: row.get(0)?,
    record_id: row.get(1)?,
    operation: SyncOperation::parse(&operation)
      .ok_or_else(|| conversion_error(2, InvalidValue(operation.clone())))?,
    payload: serde_json::from_str(&payload).map_err(|e| conversion_error(3, e))?,
    queued_at: parse_timestamp(&queued_at)
      .ok_or_else(|| conversion_error(4, InvalidValue(queued_at.clone())))?,
  })
}
