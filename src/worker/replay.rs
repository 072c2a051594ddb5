//! Sync queue replay: delivers queued mutations to the remote endpoint.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::proxy::{PostReplay, ResourceProxy};
use crate::model::SyncQueueEntry;
use crate::store::SyncQueue;

/// Why one queue entry could not be delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
  #[error("no remote sync endpoint is configured")]
  NotConfigured,
  #[error("transport failure: {0}")]
  Transport(String),
  #[error("remote rejected the entry with status {status}")]
  Rejected { status: u16 },
}

/// Destination of replayed mutations.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
  async fn deliver(&self, entry: &SyncQueueEntry) -> Result<(), DeliveryError>;
}

/// Used when no endpoint is configured: every delivery fails and entries
/// stay queued.
pub struct UnconfiguredRemote;

#[async_trait]
impl RemoteEndpoint for UnconfiguredRemote {
  async fn deliver(&self, _entry: &SyncQueueEntry) -> Result<(), DeliveryError> {
    Err(DeliveryError::NotConfigured)
  }
}

/// POSTs each entry's payload snapshot as JSON. Any 2xx is a delivery.
pub struct HttpRemote {
  client: reqwest::Client,
  endpoint: Url,
}

impl HttpRemote {
  pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
    Self { client, endpoint }
  }
}

#[async_trait]
impl RemoteEndpoint for HttpRemote {
  async fn deliver(&self, entry: &SyncQueueEntry) -> Result<(), DeliveryError> {
    let response = self
      .client
      .post(self.endpoint.clone())
      .header("X-Sync-Operation", entry.operation.as_str())
      .header("Idempotency-Key", format!("sync-entry-{}", entry.id))
      .json(&entry.payload)
      .send()
      .await
      .map_err(|e| DeliveryError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
      Ok(())
    } else {
      Err(DeliveryError::Rejected {
        status: status.as_u16(),
      })
    }
  }
}

/// Counts from one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Entries handed to the remote
  pub attempted: usize,
  pub delivered: usize,
  pub failed: usize,
  /// Entries skipped because an earlier entry for the same record failed
  pub held_back: usize,
  /// Records flipped to `synced`
  pub records_synced: usize,
  pub posts: PostReplay,
  /// Set when the pass stopped early on a storage failure
  pub aborted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
  Completed(ReplayReport),
  /// Another pass was already running
  Skipped,
}

/// Replays the sync queue. At most one pass runs at a time.
pub struct Replayer {
  queue_path: PathBuf,
  remote: Arc<dyn RemoteEndpoint>,
  proxy: Option<ResourceProxy>,
  in_flight: Mutex<()>,
}

impl Replayer {
  pub fn new(queue_path: &Path, remote: Arc<dyn RemoteEndpoint>) -> Self {
    Self {
      queue_path: queue_path.to_path_buf(),
      remote,
      proxy: None,
      in_flight: Mutex::new(()),
    }
  }

  /// Also resend writes the proxy parked while offline.
  pub fn with_proxy(mut self, proxy: ResourceProxy) -> Self {
    self.proxy = Some(proxy);
    self
  }

  /// Run one pass. A call that arrives while a pass is running returns
  /// `Skipped` instead of starting a concurrent one.
  pub async fn replay(&self) -> ReplayOutcome {
    let Ok(_guard) = self.in_flight.try_lock() else {
      debug!("replay already in progress, skipping");
      return ReplayOutcome::Skipped;
    };

    let mut report = ReplayReport::default();

    if let Some(proxy) = &self.proxy {
      report.posts = proxy.replay_pending_posts().await;
    }

    // Fresh connection per pass: the store may have been recovered since
    let mut queue = match SyncQueue::open(&self.queue_path) {
      Ok(queue) => queue,
      Err(e) => {
        warn!(path = %self.queue_path.display(), error = %e, "sync queue unavailable");
        report.aborted = Some(e.to_string());
        return ReplayOutcome::Completed(report);
      }
    };

    let entries = match queue.entries() {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "failed to read sync queue");
        report.aborted = Some(e.to_string());
        return ReplayOutcome::Completed(report);
      }
    };

    if entries.is_empty() {
      debug!("sync queue is empty");
      return ReplayOutcome::Completed(report);
    }

    info!(count = entries.len(), "replaying sync queue");
    let mut blocked: HashSet<i64> = HashSet::new();

    for entry in entries {
      if blocked.contains(&entry.record_id) {
        report.held_back += 1;
        continue;
      }

      report.attempted += 1;
      match self.remote.deliver(&entry).await {
        Ok(()) => match queue.confirm(&entry) {
          Ok(confirmation) => {
            report.delivered += 1;
            if confirmation.record_synced {
              report.records_synced += 1;
            }
          }
          Err(e) => {
            // Delivered but still queued; the next pass resends it
            warn!(entry = entry.id, error = %e, "failed to confirm delivered entry");
            report.aborted = Some(e.to_string());
            break;
          }
        },
        Err(e) => {
          warn!(
            entry = entry.id,
            record = entry.record_id,
            operation = entry.operation.as_str(),
            error = %e,
            "delivery failed"
          );
          report.failed += 1;
          blocked.insert(entry.record_id);
        }
      }
    }

    info!(
      delivered = report.delivered,
      failed = report.failed,
      held_back = report.held_back,
      "replay pass finished"
    );
    ReplayOutcome::Completed(report)
  }
}
