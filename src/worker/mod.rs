//! The background worker.
//!
//! An independent task that owns the resource cache, answers intercepted
//! requests, replays the sync queue and runs the cache janitor. UI contexts
//! reach it only through [`WorkerHandle`]; it shares no memory with them and
//! reads the record store through its own SQLite connections.

mod clients;
pub mod http;
mod lifecycle;
pub mod messages;
mod notify;
mod offline;
pub mod proxy;
mod replay;
pub mod resource_cache;
pub mod routes;

pub use clients::{ClientInfo, Clients};
pub use http::{Fetcher, HttpFetcher, Request, Response};
pub use lifecycle::{ActivationReport, InstallReport, Lifecycle, WorkerState};
pub use messages::{ClientMessage, ControlMessage, WorkerMessage, CLEAN_CACHE_TAG, SYNC_TAG};
pub use notify::{ClickOutcome, LogNotifier, Notification, Notifier};
pub use proxy::{ResourceProxy, ResponseSource, Served};
pub use replay::{
  DeliveryError, HttpRemote, RemoteEndpoint, ReplayOutcome, ReplayReport, Replayer,
  UnconfiguredRemote,
};
pub use resource_cache::{NoopResourceStorage, ResourceStorage, SqliteResourceStorage};
pub use routes::RoutingTable;

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use crate::db::StoreError;

#[derive(Debug, Error)]
pub enum WorkerError {
  #[error("core asset precache failed: {0}")]
  Install(String),
  #[error(transparent)]
  Storage(#[from] StoreError),
  #[error("background worker is not running")]
  ChannelClosed,
}

/// Static settings of one worker version.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Versioned resource cache name
  pub version: String,
  pub origin: Url,
  /// Paths precached on install; any failure aborts the install
  pub core_assets: Vec<String>,
  /// Paths precached best-effort
  pub secondary_assets: Vec<String>,
  /// Janitor max age for cached resources
  pub retention: chrono::Duration,
  /// Fallback janitor timer
  pub janitor_interval: Duration,
  /// `inspections.db`, opened per replay pass
  pub queue_path: PathBuf,
  /// `resources.db`
  pub resources_path: PathBuf,
}

fn resolve(origin: &Url, paths: &[String]) -> Vec<Url> {
  paths
    .iter()
    .filter_map(|path| match origin.join(path) {
      Ok(url) => Some(url),
      Err(e) => {
        warn!(%path, error = %e, "skipping invalid precache path");
        None
      }
    })
    .collect()
}

pub struct BackgroundWorker {
  config: WorkerConfig,
  proxy: ResourceProxy,
  replayer: Replayer,
  lifecycle: Lifecycle,
  clients: Arc<Clients>,
  notifier: Arc<dyn Notifier>,
}

impl BackgroundWorker {
  pub fn new(
    config: WorkerConfig,
    routes: RoutingTable,
    fetcher: Arc<dyn Fetcher>,
    remote: Arc<dyn RemoteEndpoint>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    let storage: Arc<dyn ResourceStorage> =
      match SqliteResourceStorage::open(&config.resources_path) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
          warn!(
            path = %config.resources_path.display(),
            error = %e,
            "resource cache unavailable, serving from network only"
          );
          Arc::new(NoopResourceStorage)
        }
      };

    let proxy = ResourceProxy::new(&config.version, storage, fetcher, routes);
    let replayer = Replayer::new(&config.queue_path, remote).with_proxy(proxy.clone());
    let lifecycle = Lifecycle::new(
      &config.version,
      resolve(&config.origin, &config.core_assets),
      resolve(&config.origin, &config.secondary_assets),
    );

    Self {
      config,
      proxy,
      replayer,
      lifecycle,
      clients: Arc::new(Clients::new()),
      notifier,
    }
  }

  /// Start the worker's event loop.
  pub fn spawn(self) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Arc::new(self);
    let handle = WorkerHandle {
      tx,
      clients: worker.clients.clone(),
      state: worker.lifecycle.subscribe(),
    };
    let task = tokio::spawn(worker.run(rx));
    (handle, task)
  }

  async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<WorkerMessage>) {
    let mut janitor = tokio::time::interval(self.config.janitor_interval);
    janitor.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately
    janitor.tick().await;

    info!(version = %self.config.version, "background worker started");
    loop {
      tokio::select! {
        message = rx.recv() => match message {
          Some(message) => self.dispatch(message),
          None => break,
        },
        _ = janitor.tick() => {
          self.clean_old_cache();
        }
      }
    }
    info!("background worker stopped");
  }

  /// Each event runs on its own task so a slow fetch never blocks the loop.
  fn dispatch(self: &Arc<Self>, message: WorkerMessage) {
    match message {
      WorkerMessage::Fetch { request, reply } => {
        let worker = self.clone();
        tokio::spawn(async move {
          let served = worker.fetch(request).await;
          if reply.send(served).is_err() {
            debug!("fetch requester went away");
          }
        });
      }
      WorkerMessage::Control(ControlMessage::SyncNow) => self.spawn_sync(),
      WorkerMessage::Sync { tag } if tag == SYNC_TAG => self.spawn_sync(),
      WorkerMessage::Control(ControlMessage::SkipWaiting) => {
        self.lifecycle.skip_waiting(&self.proxy, &self.clients);
      }
      WorkerMessage::Install => {
        let worker = self.clone();
        tokio::spawn(async move {
          if let Err(e) = worker.install().await {
            warn!(error = %e, "worker install failed");
          }
        });
      }
      WorkerMessage::PeriodicSync { tag } if tag == CLEAN_CACHE_TAG => {
        self.clean_old_cache();
      }
      WorkerMessage::Sync { tag } | WorkerMessage::PeriodicSync { tag } => {
        debug!(%tag, "ignoring unknown sync tag");
      }
      WorkerMessage::Push { data } => {
        if let Some(notification) = Notification::from_push(data.as_deref()) {
          self.notifier.show(&notification);
        }
      }
      WorkerMessage::NotificationClick { notification } => {
        let outcome = notify::handle_click(&self.clients, self.proxy.origin(), &notification);
        debug!(?outcome, "notification click handled");
      }
    }
  }

  fn spawn_sync(self: &Arc<Self>) {
    let worker = self.clone();
    tokio::spawn(async move {
      worker.sync().await;
    });
  }

  /// Answer a request. Before activation the worker does not control
  /// clients and requests go straight to the network.
  pub async fn fetch(&self, request: Request) -> Served {
    if self.lifecycle.is_active() {
      self.proxy.handle(request).await
    } else {
      self.proxy.passthrough(request).await
    }
  }

  /// Replay the sync queue and tell every UI context how many entries
  /// went through.
  pub async fn sync(&self) -> ReplayOutcome {
    let outcome = self.replayer.replay().await;
    if let ReplayOutcome::Completed(report) = &outcome {
      self.clients.post_all(ClientMessage::SyncCompleted {
        count: report.delivered,
      });
    }
    outcome
  }

  /// Install and immediately activate this version.
  pub async fn install(&self) -> Result<InstallReport, WorkerError> {
    let report = self.lifecycle.install(&self.proxy).await?;
    info!(
      core = report.core_cached,
      secondary = report.secondary_cached,
      "precache complete"
    );
    self.lifecycle.skip_waiting(&self.proxy, &self.clients);
    Ok(report)
  }

  /// Evict cached resources older than the retention window.
  pub fn clean_old_cache(&self) -> usize {
    let cutoff = Utc::now() - self.config.retention;
    match self
      .proxy
      .storage()
      .evict_older_than(self.proxy.cache_name(), cutoff)
    {
      Ok(removed) => {
        info!(removed, "resource cache janitor finished");
        removed
      }
      Err(e) => {
        warn!(error = %e, "resource cache janitor failed");
        0
      }
    }
  }
}

/// UI-side handle on the running worker.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerMessage>,
  clients: Arc<Clients>,
  state: watch::Receiver<WorkerState>,
}

impl WorkerHandle {
  pub fn send(&self, message: WorkerMessage) -> Result<(), WorkerError> {
    self.tx.send(message).map_err(|_| WorkerError::ChannelClosed)
  }

  pub fn post(&self, message: ControlMessage) -> Result<(), WorkerError> {
    self.send(WorkerMessage::Control(message))
  }

  pub fn install(&self) -> Result<(), WorkerError> {
    self.send(WorkerMessage::Install)
  }

  /// Register a one-off background sync.
  pub fn register_sync(&self, tag: &str) -> Result<(), WorkerError> {
    self.send(WorkerMessage::Sync {
      tag: tag.to_string(),
    })
  }

  /// Fire a periodic-sync event.
  pub fn periodic_sync(&self, tag: &str) -> Result<(), WorkerError> {
    self.send(WorkerMessage::PeriodicSync {
      tag: tag.to_string(),
    })
  }

  pub fn push(&self, data: Option<Vec<u8>>) -> Result<(), WorkerError> {
    self.send(WorkerMessage::Push { data })
  }

  pub fn notification_click(&self, notification: Notification) -> Result<(), WorkerError> {
    self.send(WorkerMessage::NotificationClick { notification })
  }

  /// Route a request through the worker and wait for its answer.
  pub async fn fetch(&self, request: Request) -> Result<Served, WorkerError> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerMessage::Fetch { request, reply })?;
    rx.await.map_err(|_| WorkerError::ChannelClosed)
  }

  /// Register a UI context with the worker.
  pub fn connect_client(&self, url: Url) -> ClientInfo {
    self.clients.connect(url)
  }

  pub fn disconnect_client(&self, id: u64) {
    self.clients.disconnect(id)
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.clients.subscribe()
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  /// Wait until the worker is activated or has given up.
  pub async fn settled(&self) -> Result<WorkerState, WorkerError> {
    let mut state = self.state.clone();
    let settled = state
      .wait_for(|s| matches!(s, WorkerState::Activated | WorkerState::Redundant))
      .await
      .map_err(|_| WorkerError::ChannelClosed)?;
    Ok(*settled)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{InspectionKind, NewInspection};
  use crate::photo::Photo;
  use crate::store::RecordStore;
  use crate::testing::{CapturingNotifier, RecordingRemote, ScriptedFetcher};
  use reqwest::Method;

  const ORIGIN: &str = "http://localhost:3000";

  struct Fixture {
    dir: tempfile::TempDir,
    fetcher: Arc<ScriptedFetcher>,
    remote: Arc<RecordingRemote>,
    notifier: Arc<CapturingNotifier>,
    handle: WorkerHandle,
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let origin = Url::parse(ORIGIN).unwrap();
    let config = WorkerConfig {
      version: "fireinspect-v4".into(),
      origin: origin.clone(),
      core_assets: vec!["/".into()],
      secondary_assets: vec![],
      retention: chrono::Duration::days(7),
      janitor_interval: Duration::from_secs(3600),
      queue_path: dir.path().join("inspections.db"),
      resources_path: dir.path().join("resources.db"),
    };
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(url("/").as_str(), Response::new(200, "OK", "text/html", "home"));
    let remote = Arc::new(RecordingRemote::new());
    let notifier = Arc::new(CapturingNotifier::default());

    let worker = BackgroundWorker::new(
      config,
      RoutingTable::standard(origin).unwrap(),
      fetcher.clone(),
      remote.clone(),
      notifier.clone(),
    );
    let (handle, _task) = worker.spawn();

    Fixture {
      dir,
      fetcher,
      remote,
      notifier,
      handle,
    }
  }

  async fn next_message(rx: &mut broadcast::Receiver<ClientMessage>) -> ClientMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
      .await
      .unwrap()
      .unwrap()
  }

  #[tokio::test]
  async fn test_fetch_passes_through_until_activated() {
    let f = fixture();
    f.fetcher.set_online(false);

    // Not installed: no cache is consulted
    let served = f.handle.fetch(Request::navigate(url("/"))).await.unwrap();
    assert_eq!(served.source, ResponseSource::Offline);

    f.fetcher.set_online(true);
    let mut rx = f.handle.subscribe();
    f.handle.install().unwrap();
    assert_eq!(f.handle.settled().await.unwrap(), WorkerState::Activated);
    assert_eq!(
      next_message(&mut rx).await,
      ClientMessage::SwUpdated {
        version: "fireinspect-v4".into()
      }
    );

    // Activated: the precached shell answers offline navigations
    f.fetcher.set_online(false);
    let served = f.handle.fetch(Request::navigate(url("/"))).await.unwrap();
    assert_eq!(served.response.text(), "home");
  }

  #[tokio::test]
  async fn test_sync_now_replays_and_broadcasts() {
    let f = fixture();
    let store = RecordStore::open(&f.dir.path().join("inspections.db")).unwrap();
    let record = NewInspection {
      kind: InspectionKind::Mangueiras,
      location: "Garagem".into(),
      date: None,
      notes: String::new(),
      photo: Some(Photo::from_bytes("image/png", b"png")),
    }
    .into_record("inspetor", Utc::now())
    .unwrap();
    store.create(record).await.unwrap();

    let mut rx = f.handle.subscribe();
    f.handle.post(ControlMessage::SyncNow).unwrap();
    assert_eq!(
      next_message(&mut rx).await,
      ClientMessage::SyncCompleted { count: 1 }
    );
    assert_eq!(f.remote.delivered().len(), 1);
    assert_eq!(store.pending_count().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_unknown_sync_tag_is_ignored() {
    let f = fixture();
    let mut rx = f.handle.subscribe();
    f.handle.register_sync("something-else").unwrap();
    f.handle.register_sync(SYNC_TAG).unwrap();

    // Only the known tag produces a pass
    assert_eq!(
      next_message(&mut rx).await,
      ClientMessage::SyncCompleted { count: 0 }
    );
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_push_shows_notification() {
    let f = fixture();
    f.handle
      .push(Some(r#"{"title":"Lembrete","body":"Inspeção mensal"}"#.as_bytes().to_vec()))
      .unwrap();
    f.handle.push(None).unwrap();

    // A fetch round-trip orders us after both pushes
    f.handle
      .fetch(Request::new(Method::GET, url("/")))
      .await
      .unwrap();
    let shown = f.notifier.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Lembrete");
  }

  #[tokio::test]
  async fn test_janitor_keeps_fresh_entries() {
    let f = fixture();
    f.handle.install().unwrap();
    f.handle.settled().await.unwrap();

    let storage = SqliteResourceStorage::open(&f.dir.path().join("resources.db")).unwrap();
    assert_eq!(storage.keys("fireinspect-v4").unwrap().len(), 1);

    f.handle.periodic_sync(CLEAN_CACHE_TAG).unwrap();
    f.handle.fetch(Request::get(url("/"))).await.unwrap();
    assert!(!storage.keys("fireinspect-v4").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_janitor_evicts_old_resources_but_keeps_parked_writes() {
    let f = fixture();
    f.handle.install().unwrap();
    f.handle.settled().await.unwrap();

    let path = f.dir.path().join("resources.db");
    let storage = SqliteResourceStorage::open(&path).unwrap();
    storage
      .append(
        proxy::PENDING_POSTS,
        &Request::post(url("/api/inspecoes"), b"{}".to_vec()),
        &Response::new(202, "Accepted", "application/json", "{}"),
      )
      .unwrap();

    // Everything so far is eight days old
    let old = crate::model::format_timestamp(&(Utc::now() - chrono::Duration::days(8)));
    rusqlite::Connection::open(&path)
      .unwrap()
      .execute("UPDATE resource_cache SET inserted_at = ?", [&old])
      .unwrap();
    storage
      .put(
        "fireinspect-v4",
        &Request::get(url("/historico")),
        &Response::new(200, "OK", "text/html", "fresh"),
      )
      .unwrap();

    f.handle.periodic_sync(CLEAN_CACHE_TAG).unwrap();
    // Offline round-trip so nothing new is cached behind the janitor
    f.fetcher.set_online(false);
    f.handle.fetch(Request::get(url("/"))).await.unwrap();

    let kept = storage.keys("fireinspect-v4").unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].url, url("/historico").as_str());
    assert_eq!(storage.keys(proxy::PENDING_POSTS).unwrap().len(), 1);
  }
}
