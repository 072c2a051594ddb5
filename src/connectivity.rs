//! Platform connectivity signal.
//!
//! The core never probes the network itself; whoever owns the platform
//! (the CLI here) reports online/offline transitions through this handle.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  /// Synchronous "is currently online" query.
  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Report the current state. Subscribers are only woken on a transition.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      tracing::info!(online, "connectivity changed");
    }
  }

  /// Receive online/offline transitions.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}
