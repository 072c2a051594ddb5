//! Versioned schema steps. Each step is additive; a step is applied once when
//! `PRAGMA user_version` is below its position.

/// Schema of `inspections.db`.
pub const RECORD_MIGRATIONS: &[&str] = &[
  // 1: inspection records
  r#"
CREATE TABLE IF NOT EXISTS inspections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    location TEXT NOT NULL,
    date TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    photo TEXT NOT NULL,
    created_at TEXT NOT NULL,
    author TEXT NOT NULL,
    sync_state TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_inspections_kind ON inspections(kind);
CREATE INDEX IF NOT EXISTS idx_inspections_date ON inspections(date);
CREATE INDEX IF NOT EXISTS idx_inspections_created_at ON inspections(created_at);
CREATE INDEX IF NOT EXISTS idx_inspections_author ON inspections(author);
CREATE INDEX IF NOT EXISTS idx_inspections_sync_state ON inspections(sync_state);
"#,
  // 2: sync queue
  r#"
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_queued_at ON sync_queue(queued_at);
CREATE INDEX IF NOT EXISTS idx_sync_queue_record ON sync_queue(record_id);
"#,
];

/// Schema of `resources.db`, the worker's durable resource cache.
pub const RESOURCE_MIGRATIONS: &[&str] = &[r#"
CREATE TABLE IF NOT EXISTS resource_cache (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    request_body BLOB,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    inserted_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_resource_cache_inserted
    ON resource_cache(inserted_at);
"#];
