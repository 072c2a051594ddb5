//! In-memory mirror of the record table.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::model::{sort_newest_first, InspectionKind, InspectionRecord};

/// Time-bounded copy of the durable records, owned by the record store.
///
/// A single `last_fetch` stamp covers the whole map: the full-list view is
/// valid only while that stamp is younger than `stale_time`. Individual
/// entries are written through on every mutation without touching the stamp.
#[derive(Debug)]
pub struct RecordCache {
  entries: HashMap<i64, InspectionRecord>,
  last_fetch: Option<DateTime<Utc>>,
  /// How long a full read stays authoritative
  stale_time: Duration,
}

impl Default for RecordCache {
  fn default() -> Self {
    Self::new()
  }
}

impl RecordCache {
  pub fn new() -> Self {
    Self {
      entries: HashMap::new(),
      last_fetch: None,
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the expiry window of the full-list view.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  fn is_stale(&self, fetched_at: DateTime<Utc>) -> bool {
    Utc::now() - fetched_at >= self.stale_time
  }

  /// Whether full-list reads may be answered from memory.
  pub fn is_fresh(&self) -> bool {
    match self.last_fetch {
      Some(at) => !self.is_stale(at),
      None => false,
    }
  }

  pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
    self.last_fetch
  }

  /// Stamp the full-list view as freshly loaded.
  pub fn touch(&mut self) {
    self.last_fetch = Some(Utc::now());
  }

  /// Drop every entry and the full-list stamp.
  pub fn invalidate(&mut self) {
    self.entries.clear();
    self.last_fetch = None;
  }

  /// Swap in a complete durable read and stamp it.
  pub fn replace_all(&mut self, records: &[InspectionRecord]) {
    self.entries = records
      .iter()
      .filter_map(|r| r.id.map(|id| (id, r.clone())))
      .collect();
    self.touch();
  }

  pub fn get(&self, id: i64) -> Option<&InspectionRecord> {
    self.entries.get(&id)
  }

  /// Write one record through. Records without an id are ignored.
  pub fn upsert(&mut self, record: &InspectionRecord) {
    if let Some(id) = record.id {
      self.entries.insert(id, record.clone());
    }
  }

  pub fn remove(&mut self, id: i64) {
    self.entries.remove(&id);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// All cached records, newest first.
  pub fn snapshot(&self) -> Vec<InspectionRecord> {
    let mut records: Vec<InspectionRecord> = self.entries.values().cloned().collect();
    sort_newest_first(&mut records);
    records
  }

  /// Cached records of one kind, newest first.
  pub fn snapshot_kind(&self, kind: InspectionKind) -> Vec<InspectionRecord> {
    let mut records: Vec<InspectionRecord> = self
      .entries
      .values()
      .filter(|r| r.kind == kind)
      .cloned()
      .collect();
    sort_newest_first(&mut records);
    records
  }
}
