//! Registry of UI contexts (windows) the worker can message and focus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use url::Url;

use super::messages::ClientMessage;

const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: u64,
  pub url: Url,
  pub focused: bool,
  /// Whether the active worker controls this client
  pub controlled: bool,
}

pub struct Clients {
  windows: Mutex<Vec<ClientInfo>>,
  next_id: AtomicU64,
  tx: broadcast::Sender<ClientMessage>,
}

impl Default for Clients {
  fn default() -> Self {
    Self::new()
  }
}

impl Clients {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
    Self {
      windows: Mutex::new(Vec::new()),
      next_id: AtomicU64::new(1),
      tx,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Vec<ClientInfo>> {
    self.windows.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a UI context showing `url`.
  pub fn connect(&self, url: Url) -> ClientInfo {
    let info = ClientInfo {
      id: self.next_id.fetch_add(1, Ordering::Relaxed),
      url,
      focused: false,
      controlled: false,
    };
    self.lock().push(info.clone());
    info
  }

  pub fn disconnect(&self, id: u64) {
    self.lock().retain(|client| client.id != id);
  }

  pub fn match_all(&self) -> Vec<ClientInfo> {
    self.lock().clone()
  }

  /// Take control of every open client. Returns how many were claimed.
  pub fn claim(&self) -> usize {
    let mut windows = self.lock();
    for client in windows.iter_mut() {
      client.controlled = true;
    }
    windows.len()
  }

  /// Focus `id`, unfocusing every other client.
  pub fn focus(&self, id: u64) -> bool {
    let mut windows = self.lock();
    if !windows.iter().any(|client| client.id == id) {
      return false;
    }
    for client in windows.iter_mut() {
      client.focused = client.id == id;
    }
    true
  }

  /// Open a new focused window at `url`.
  pub fn open_window(&self, url: Url) -> ClientInfo {
    tracing::info!(%url, "opening window");
    let info = self.connect(url);
    self.focus(info.id);
    ClientInfo {
      focused: true,
      ..info
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.tx.subscribe()
  }

  /// Deliver `message` to every listening UI context. Returns the number of
  /// receivers.
  pub fn post_all(&self, message: ClientMessage) -> usize {
    match self.tx.send(message) {
      Ok(receivers) => receivers,
      Err(broadcast::error::SendError(message)) => {
        tracing::debug!(?message, "no UI context listening");
        0
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:3000").unwrap().join(path).unwrap()
  }

  #[test]
  fn test_claim_and_focus() {
    let clients = Clients::new();
    let a = clients.connect(url("/"));
    let b = clients.connect(url("/historico"));

    assert_eq!(clients.claim(), 2);
    assert!(clients.focus(b.id));
    assert!(!clients.focus(999));

    let all = clients.match_all();
    assert!(all.iter().all(|c| c.controlled));
    assert!(!all.iter().find(|c| c.id == a.id).unwrap().focused);
    assert!(all.iter().find(|c| c.id == b.id).unwrap().focused);

    clients.disconnect(a.id);
    assert_eq!(clients.match_all().len(), 1);
  }

  #[tokio::test]
  async fn test_post_all_reaches_subscribers() {
    let clients = Clients::new();
    assert_eq!(clients.post_all(ClientMessage::SyncCompleted { count: 0 }), 0);

    let mut rx = clients.subscribe();
    assert_eq!(clients.post_all(ClientMessage::SyncCompleted { count: 2 }), 1);
    assert_eq!(rx.recv().await.unwrap(), ClientMessage::SyncCompleted { count: 2 });
  }
}
