//! Inspection records and sync queue entries.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::photo::Photo;

/// The fixed set of inspection categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectionKind {
  /// Fire extinguishers
  Extintores,
  /// Fire hoses
  Mangueiras,
  /// Accidents
  Acidentes,
  /// Alarm systems
  Alarmes,
}

impl InspectionKind {
  pub const ALL: [InspectionKind; 4] = [
    InspectionKind::Extintores,
    InspectionKind::Mangueiras,
    InspectionKind::Acidentes,
    InspectionKind::Alarmes,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Extintores => "extintores",
      Self::Mangueiras => "mangueiras",
      Self::Acidentes => "acidentes",
      Self::Alarmes => "alarmes",
    }
  }

  /// Human readable title.
  pub fn title(&self) -> &'static str {
    match self {
      Self::Extintores => "Extintores",
      Self::Mangueiras => "Mangueiras",
      Self::Acidentes => "Acidentes",
      Self::Alarmes => "Alarmes",
    }
  }
}

impl fmt::Display for InspectionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown inspection kind '{0}' (expected one of: extintores, mangueiras, acidentes, alarmes)")]
pub struct UnknownKind(pub String);

impl FromStr for InspectionKind {
  type Err = UnknownKind;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim().to_lowercase();
    Self::ALL
      .into_iter()
      .find(|kind| kind.as_str() == wanted)
      .ok_or_else(|| UnknownKind(s.to_string()))
  }
}

/// Whether a record's latest local mutation has reached the remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
  Pending,
  Synced,
}

impl SyncState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Synced => "synced",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(Self::Pending),
      "synced" => Some(Self::Synced),
      _ => None,
    }
  }
}

/// A single inspection as stored on the device and sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionRecord {
  /// Store-assigned key; `None` until the record has been created.
  pub id: Option<i64>,
  #[serde(rename = "type")]
  pub kind: InspectionKind,
  pub location: String,
  pub date: NaiveDate,
  #[serde(default)]
  pub notes: String,
  pub photo: Photo,
  pub created_at: DateTime<Utc>,
  pub author: String,
  pub sync_state: SyncState,
}

impl InspectionRecord {
  /// Newest first, ties broken by the higher id.
  pub fn newest_first(a: &InspectionRecord, b: &InspectionRecord) -> std::cmp::Ordering {
    b.created_at
      .cmp(&a.created_at)
      .then_with(|| b.id.cmp(&a.id))
  }
}

/// Sort records newest first.
pub fn sort_newest_first(records: &mut [InspectionRecord]) {
  records.sort_by(InspectionRecord::newest_first);
}

/// Kind of mutation carried by a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
  Create,
  Update,
  Delete,
}

impl SyncOperation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "create" => Some(Self::Create),
      "update" => Some(Self::Update),
      "delete" => Some(Self::Delete),
      _ => None,
    }
  }
}

/// A pending mutation waiting for remote delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
  pub id: i64,
  pub record_id: i64,
  pub operation: SyncOperation,
  /// Full snapshot of the record when the mutation happened
  pub payload: InspectionRecord,
  pub queued_at: DateTime<Utc>,
}

/// Form input for a new inspection, before it becomes a record.
#[derive(Debug, Clone)]
pub struct NewInspection {
  pub kind: InspectionKind,
  pub location: String,
  pub date: Option<NaiveDate>,
  pub notes: String,
  pub photo: Option<Photo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("location is required")]
  EmptyLocation,
  #[error("a photo is required")]
  MissingPhoto,
}

impl NewInspection {
  /// Form-level checks. The record store itself accepts anything.
  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.location.trim().is_empty() {
      return Err(ValidationError::EmptyLocation);
    }
    if self.photo.is_none() {
      return Err(ValidationError::MissingPhoto);
    }
    Ok(())
  }

  /// Validate and build a record authored by `author` at `now`.
  pub fn into_record(
    self,
    author: &str,
    now: DateTime<Utc>,
  ) -> Result<InspectionRecord, ValidationError> {
    self.validate()?;
    let photo = self.photo.ok_or(ValidationError::MissingPhoto)?;

    Ok(InspectionRecord {
      id: None,
      kind: self.kind,
      location: self.location.trim().to_string(),
      date: self.date.unwrap_or_else(|| now.date_naive()),
      notes: self.notes.trim().to_string(),
      photo,
      created_at: now,
      author: author.to_string(),
      sync_state: SyncState::Pending,
    })
  }
}

/// Timestamp format used in the durable store. Fixed width, so text order is time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}
