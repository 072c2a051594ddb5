//! UI-side sync coordinator.
//!
//! Decides when to ask the background worker for a flush: after each local
//! mutation, when connectivity returns, on a periodic wake-up and on demand.
//! It never delivers anything itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::db::StoreError;
use crate::store::RecordStore;
use crate::worker::{ClientMessage, ControlMessage, WorkerHandle, SYNC_TAG};

const EVENT_CAPACITY: usize = 64;

/// Why a flush was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
  /// A local create, update or delete
  Mutation,
  /// Connectivity came back
  Reconnect,
  /// Explicit user request
  Manual,
  Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushRequest {
  /// Handed to the worker
  Sent,
  /// Offline; retried on the next reconnect
  Deferred,
  /// The worker is not running
  WorkerUnavailable,
}

/// Notifications for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  PendingCount(u64),
  /// A replay pass finished; the record cache has been dropped
  Completed { count: usize },
  WorkerUpdated { version: String },
}

pub struct SyncCoordinator {
  store: Arc<RecordStore>,
  connectivity: Connectivity,
  worker: WorkerHandle,
  periodic: Duration,
  deferred: AtomicBool,
  events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
  pub fn new(
    store: Arc<RecordStore>,
    connectivity: Connectivity,
    worker: WorkerHandle,
    periodic: Duration,
  ) -> Self {
    let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
    Self {
      store,
      connectivity,
      worker,
      periodic,
      deferred: AtomicBool::new(false),
      events,
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  /// Whether a flush was requested while offline and not yet sent.
  pub fn has_deferred(&self) -> bool {
    self.deferred.load(Ordering::SeqCst)
  }

  /// Ask the worker to replay the queue. Offline requests are remembered and
  /// dropped; the reconnect flush covers them.
  pub fn request_flush(&self, reason: FlushReason) -> FlushRequest {
    if !self.connectivity.is_online() {
      self.deferred.store(true, Ordering::SeqCst);
      debug!(?reason, "offline, flush deferred");
      return FlushRequest::Deferred;
    }

    let sent = match reason {
      FlushReason::Manual => self.worker.post(ControlMessage::SyncNow),
      _ => self.worker.register_sync(SYNC_TAG),
    };

    match sent {
      Ok(()) => {
        self.deferred.store(false, Ordering::SeqCst);
        debug!(?reason, "flush requested");
        FlushRequest::Sent
      }
      Err(e) => {
        warn!(?reason, error = %e, "flush request failed");
        FlushRequest::WorkerUnavailable
      }
    }
  }

  pub async fn pending_count(&self) -> Result<u64, StoreError> {
    self.store.pending_count().await
  }

  async fn publish_pending(&self) {
    match self.pending_count().await {
      Ok(count) => {
        self.events.send(SyncEvent::PendingCount(count)).ok();
      }
      Err(e) => warn!(error = %e, "failed to count pending mutations"),
    }
  }

  fn publish(&self, event: SyncEvent) {
    self.events.send(event).ok();
  }

  /// Drive the coordinator until `shutdown` fires or every input closes.
  pub async fn run(
    self: Arc<Self>,
    mut signals: mpsc::UnboundedReceiver<FlushReason>,
    mut shutdown: oneshot::Receiver<()>,
  ) {
    let mut online = self.connectivity.subscribe();
    let mut worker_events = self.worker.subscribe();
    let mut wake = tokio::time::interval(self.periodic);
    wake.set_missed_tick_behavior(MissedTickBehavior::Delay);
    wake.tick().await;

    let mut signals_open = true;
    let mut online_open = true;
    let mut worker_open = true;

    // Pick up anything left from a previous session
    self.publish_pending().await;
    if matches!(self.pending_count().await, Ok(n) if n > 0) {
      self.request_flush(FlushReason::Reconnect);
    }

    loop {
      tokio::select! {
        _ = &mut shutdown => break,

        reason = signals.recv(), if signals_open => match reason {
          Some(reason) => {
            self.request_flush(reason);
            self.publish_pending().await;
          }
          None => signals_open = false,
        },

        changed = online.changed(), if online_open => {
          if changed.is_err() {
            online_open = false;
            continue;
          }
          let is_online = *online.borrow_and_update();
          if is_online {
            info!("back online, flushing sync queue");
            self.request_flush(FlushReason::Reconnect);
            self.publish_pending().await;
          } else {
            info!("offline, mutations will stay queued");
          }
        },

        _ = wake.tick() => {
          if self.connectivity.is_online() {
            self.request_flush(FlushReason::Periodic);
          }
        },

        message = worker_events.recv(), if worker_open => match message {
          Ok(ClientMessage::SyncCompleted { count }) => {
            // The worker wrote sync states behind our cache
            self.store.invalidate_cache();
            info!(count, "sync completed");
            self.publish(SyncEvent::Completed { count });
            self.publish_pending().await;
          }
          Ok(ClientMessage::SwUpdated { version }) => {
            info!(%version, "new worker version active");
            self.publish(SyncEvent::WorkerUpdated { version });
          }
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            debug!(skipped, "missed worker messages");
            self.store.invalidate_cache();
          }
          Err(broadcast::error::RecvError::Closed) => worker_open = false,
        },
      }

      if !signals_open && !online_open && !worker_open {
        break;
      }
    }
    debug!("sync coordinator stopped");
  }
}
