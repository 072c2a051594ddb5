//! Test doubles for the network, the remote endpoint and the notifier.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::model::SyncQueueEntry;
use crate::worker::http::{FetchError, Fetcher, Request, Response};
use crate::worker::{DeliveryError, Notification, Notifier, RemoteEndpoint};

/// Answers from a fixed table keyed by URL; unknown URLs get a 404.
pub struct ScriptedFetcher {
  responses: Mutex<HashMap<String, Response>>,
  calls: Mutex<Vec<String>>,
  online: AtomicBool,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      online: AtomicBool::new(true),
    }
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// While offline every fetch fails with a network error.
  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// `"METHOD url"` for every fetch that reached the network.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, url: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|call| call.split_once(' ').map(|(_, u)| u) == Some(url))
      .count()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    if !self.online.load(Ordering::SeqCst) {
      return Err(FetchError::Network("offline".into()));
    }
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{} {}", request.method, request.url));

    Ok(
      self
        .responses
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .unwrap_or_else(|| Response::new(404, "Not Found", "text/plain", "not found")),
    )
  }
}

/// Records delivered entries; can be told to fail specific records.
pub struct RecordingRemote {
  delivered: Mutex<Vec<SyncQueueEntry>>,
  failing: Mutex<HashSet<i64>>,
  delay: Option<Duration>,
}

impl RecordingRemote {
  pub fn new() -> Self {
    Self {
      delivered: Mutex::new(Vec::new()),
      failing: Mutex::new(HashSet::new()),
      delay: None,
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn fail_record(&self, record_id: i64) {
    self.failing.lock().unwrap().insert(record_id);
  }

  pub fn delivered(&self) -> Vec<SyncQueueEntry> {
    self.delivered.lock().unwrap().clone()
  }
}

#[async_trait]
impl RemoteEndpoint for RecordingRemote {
  async fn deliver(&self, entry: &SyncQueueEntry) -> Result<(), DeliveryError> {
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.failing.lock().unwrap().contains(&entry.record_id) {
      return Err(DeliveryError::Rejected { status: 500 });
    }
    self.delivered.lock().unwrap().push(entry.clone());
    Ok(())
  }
}

#[derive(Default)]
pub struct CapturingNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl CapturingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl Notifier for CapturingNotifier {
  fn show(&self, notification: &Notification) {
    self.shown.lock().unwrap().push(notification.clone());
  }
}
