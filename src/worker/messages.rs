//! Messages exchanged between UI contexts and the background worker.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::http::Request;
use super::notify::Notification;
use super::proxy::Served;

/// Background-sync tag that triggers a queue replay.
pub const SYNC_TAG: &str = "sync-inspecoes";
/// Periodic-sync tag that triggers the janitor.
pub const CLEAN_CACHE_TAG: &str = "clean-cache";

/// Commands a UI context may post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Replay the sync queue now
  SyncNow,
  /// Activate a waiting worker version immediately
  SkipWaiting,
}

/// Broadcasts from the worker to every UI context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// A replay pass finished; `count` entries were delivered
  SyncCompleted { count: usize },
  /// A new worker version took control
  SwUpdated { version: String },
}

/// Everything the worker's event loop handles.
#[derive(Debug)]
pub enum WorkerMessage {
  Control(ControlMessage),
  Install,
  /// Platform background-sync event
  Sync { tag: String },
  /// Platform periodic-sync event
  PeriodicSync { tag: String },
  /// Push event with its raw payload, if any
  Push { data: Option<Vec<u8>> },
  NotificationClick { notification: Notification },
  Fetch {
    request: Request,
    reply: oneshot::Sender<Served>,
  },
}
