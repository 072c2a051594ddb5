use chrono::{NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::db::StoreError;
use crate::model::{InspectionKind, InspectionRecord, NewInspection};
use crate::photo::Photo;
use crate::store::RecordStore;
use crate::sync::{FlushReason, FlushRequest, SyncCoordinator, SyncEvent};
use crate::worker::{
  BackgroundWorker, HttpFetcher, HttpRemote, LogNotifier, RemoteEndpoint, Request, ResourceStorage,
  RoutingTable, Served, SqliteResourceStorage, UnconfiguredRemote, WorkerConfig, WorkerHandle,
  WorkerState,
};

/// How long a one-shot command waits for the worker to finish a replay pass.
const SYNC_WAIT: Duration = Duration::from_secs(30);
/// How long to wait for install/activation before serving a fetch.
const INSTALL_WAIT: Duration = Duration::from_secs(60);

const RECORDS_FILE: &str = "inspections.db";
const RESOURCES_FILE: &str = "resources.db";

/// Field edits for `update`; `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct InspectionChanges {
  pub kind: Option<InspectionKind>,
  pub location: Option<String>,
  pub date: Option<NaiveDate>,
  pub notes: Option<String>,
  pub photo: Option<Photo>,
}

impl InspectionChanges {
  pub fn is_empty(&self) -> bool {
    self.kind.is_none()
      && self.location.is_none()
      && self.date.is_none()
      && self.notes.is_none()
      && self.photo.is_none()
  }

  fn apply(self, record: &mut InspectionRecord) {
    if let Some(kind) = self.kind {
      record.kind = kind;
    }
    if let Some(location) = self.location {
      record.location = location.trim().to_string();
    }
    if let Some(date) = self.date {
      record.date = date;
    }
    if let Some(notes) = self.notes {
      record.notes = notes.trim().to_string();
    }
    if let Some(photo) = self.photo {
      record.photo = photo;
    }
  }
}

/// Commands typed into a running `run` session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
  Online,
  Offline,
  Sync,
}

impl ConsoleCommand {
  pub fn parse(line: &str) -> Option<Self> {
    match line.trim().to_lowercase().as_str() {
      "online" | "on" => Some(Self::Online),
      "offline" | "off" => Some(Self::Offline),
      "sync" => Some(Self::Sync),
      _ => None,
    }
  }
}

/// Result of an explicit sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSummary {
  Completed { delivered: usize, pending: u64 },
  Deferred { pending: u64 },
  TimedOut { pending: u64 },
  WorkerUnavailable,
}

/// The UI context: owns the record store and talks to the worker.
pub struct App {
  author: String,
  data_dir: PathBuf,
  origin: Url,
  store: Arc<RecordStore>,
  store_error: Option<StoreError>,
  connectivity: Connectivity,
  worker: WorkerHandle,
  worker_task: JoinHandle<()>,
  coordinator: Arc<SyncCoordinator>,
  coordinator_task: JoinHandle<()>,
  shutdown: oneshot::Sender<()>,
}

impl App {
  pub async fn new(config: Config, offline: bool) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let origin = config.origin()?;
    let records_path = data_dir.join(RECORDS_FILE);

    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (store, store_error) = RecordStore::open_or_degraded(&records_path);
    let store = Arc::new(
      store
        .with_stale_time(chrono::Duration::minutes(config.cache.stale_minutes))
        .with_sync_signal(signal_tx),
    );

    let fetcher = HttpFetcher::new(config.remote.timeout_secs.map(Duration::from_secs))?;
    let remote: Arc<dyn RemoteEndpoint> = match config.remote_endpoint()? {
      Some(endpoint) => Arc::new(HttpRemote::new(fetcher.client().clone(), endpoint)),
      None => {
        warn!("no remote endpoint configured, mutations stay queued");
        Arc::new(UnconfiguredRemote)
      }
    };

    let worker = BackgroundWorker::new(
      WorkerConfig {
        version: config.worker.version.clone(),
        origin: origin.clone(),
        core_assets: config.worker.core_assets.clone(),
        secondary_assets: config.worker.secondary_assets.clone(),
        retention: chrono::Duration::days(config.worker.retention_days),
        janitor_interval: Duration::from_secs(config.worker.janitor_interval_minutes * 60),
        queue_path: records_path,
        resources_path: data_dir.join(RESOURCES_FILE),
      },
      RoutingTable::standard(origin.clone())?,
      Arc::new(fetcher),
      remote,
      Arc::new(LogNotifier),
    );
    let (worker, worker_task) = worker.spawn();
    worker.connect_client(origin.clone());

    let connectivity = Connectivity::new(!(offline || config.offline));
    let coordinator = Arc::new(SyncCoordinator::new(
      store.clone(),
      connectivity.clone(),
      worker.clone(),
      Duration::from_secs(config.worker.sync_interval_minutes * 60),
    ));
    let (shutdown, shutdown_rx) = oneshot::channel();
    let coordinator_task = tokio::spawn(coordinator.clone().run(signal_rx, shutdown_rx));

    Ok(Self {
      author: config.author(),
      data_dir,
      origin,
      store,
      store_error,
      connectivity,
      worker,
      worker_task,
      coordinator,
      coordinator_task,
      shutdown,
    })
  }

  pub fn store(&self) -> &RecordStore {
    &self.store
  }

  /// Why the store opened degraded, if it did.
  pub fn store_error(&self) -> Option<&StoreError> {
    self.store_error.as_ref()
  }

  pub fn data_dir(&self) -> &Path {
    &self.data_dir
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  /// Record a new inspection and give the worker a chance to deliver it.
  pub async fn add(&self, input: NewInspection) -> Result<i64> {
    let record = input.into_record(&self.author, Utc::now())?;
    let mut events = self.coordinator.subscribe();
    let id = self.store.create(record).await?;
    info!(id, "inspection recorded");
    self.await_sync(&mut events).await;
    Ok(id)
  }

  pub async fn list(&self, kind: Option<InspectionKind>) -> Result<Vec<InspectionRecord>> {
    let records = match kind {
      Some(kind) => self.store.get_by_kind(kind).await?,
      None => self.store.get_all().await?,
    };
    Ok(records)
  }

  pub async fn show(&self, id: i64) -> Result<InspectionRecord> {
    self
      .store
      .get_by_id(id)
      .await?
      .ok_or_else(|| eyre!("Inspection {} not found", id))
  }

  pub async fn update(&self, id: i64, changes: InspectionChanges) -> Result<()> {
    if changes.is_empty() {
      return Err(eyre!("Nothing to update"));
    }
    let mut record = self.show(id).await?;
    changes.apply(&mut record);
    if record.location.is_empty() {
      return Err(eyre!("Location cannot be empty"));
    }

    let mut events = self.coordinator.subscribe();
    self.store.update(record).await?;
    self.await_sync(&mut events).await;
    Ok(())
  }

  pub async fn delete(&self, id: i64) -> Result<()> {
    let mut events = self.coordinator.subscribe();
    self.store.delete(id).await?;
    self.await_sync(&mut events).await;
    Ok(())
  }

  pub async fn mark_synced(&self, id: i64) -> Result<()> {
    self.store.mark_synced(id).await?;
    Ok(())
  }

  /// Queue length and the records still waiting for delivery.
  pub async fn pending(&self) -> Result<(u64, Vec<InspectionRecord>)> {
    let count = self.store.pending_count().await?;
    let records = self.store.get_unsynced().await?;
    Ok((count, records))
  }

  /// Ask for an immediate flush and wait for the pass to finish.
  pub async fn sync(&self) -> Result<SyncSummary> {
    let mut events = self.coordinator.subscribe();
    match self.coordinator.request_flush(FlushReason::Manual) {
      FlushRequest::Deferred => Ok(SyncSummary::Deferred {
        pending: self.store.pending_count().await?,
      }),
      FlushRequest::WorkerUnavailable => Ok(SyncSummary::WorkerUnavailable),
      FlushRequest::Sent => {
        let delivered = wait_for_completion(&mut events).await;
        let pending = self.store.pending_count().await?;
        Ok(match delivered {
          Some(delivered) => SyncSummary::Completed { delivered, pending },
          None => SyncSummary::TimedOut { pending },
        })
      }
    }
  }

  /// Route a request through the worker, installing it first if needed.
  pub async fn fetch(&self, target: &str, method: reqwest::Method) -> Result<Served> {
    let url = match Url::parse(target) {
      Ok(url) => url,
      Err(_) => self
        .origin
        .join(target)
        .map_err(|e| eyre!("Invalid url '{}': {}", target, e))?,
    };

    self.ensure_worker().await?;
    let request = Request::infer(method, url);
    Ok(self.worker.fetch(request).await?)
  }

  /// Install and activate the worker unless it already settled.
  pub async fn ensure_worker(&self) -> Result<WorkerState> {
    let state = self.worker.state();
    if matches!(state, WorkerState::Activated | WorkerState::Redundant) {
      return Ok(state);
    }
    if state == WorkerState::Parsed {
      self.worker.install()?;
    }
    let state = tokio::time::timeout(INSTALL_WAIT, self.worker.settled())
      .await
      .map_err(|_| eyre!("Timed out waiting for the background worker to install"))??;
    if state == WorkerState::Redundant {
      warn!("worker install failed, requests go straight to the network");
    }
    Ok(state)
  }

  /// Fire the cache janitor.
  pub fn janitor(&self) -> Result<()> {
    self.worker.periodic_sync(crate::worker::CLEAN_CACHE_TAG)?;
    Ok(())
  }

  /// Write every record to a pretty-printed JSON backup. Returns the path.
  pub async fn export(&self, path: Option<PathBuf>) -> Result<PathBuf> {
    let records = self.store.get_all().await?;
    let path = path.unwrap_or_else(|| {
      PathBuf::from(format!(
        "fireinspect-backup-{}.json",
        Utc::now().format("%Y-%m-%d")
      ))
    });

    let json = serde_json::to_string_pretty(&records)?;
    std::fs::write(&path, json)
      .map_err(|e| eyre!("Failed to write backup {}: {}", path.display(), e))?;
    info!(path = %path.display(), count = records.len(), "records exported");
    Ok(path)
  }

  /// Delete every durable resource cache. Returns the cache names removed.
  pub fn clear_cache(&self) -> Result<Vec<String>> {
    let storage = SqliteResourceStorage::open(&self.data_dir.join(RESOURCES_FILE))?;
    let names = storage.cache_names()?;
    for name in &names {
      storage.delete_cache(name)?;
    }
    info!(count = names.len(), "resource caches cleared");
    Ok(names)
  }

  /// Destroy and recreate the record store. Requires explicit confirmation.
  pub async fn recover(&self, confirmed: bool) -> Result<()> {
    if !confirmed {
      return Err(eyre!(
        "Recovery deletes every local inspection and queued change. Re-run with --yes to confirm."
      ));
    }
    if self.store.recover().await {
      Ok(())
    } else {
      Err(eyre!("Recovery failed, see the log for details"))
    }
  }

  /// Long-running mode: keep the worker and coordinator alive until Ctrl-C.
  ///
  /// Lines on stdin drive connectivity: `online`, `offline` or `sync`.
  pub async fn run(&self) -> Result<()> {
    let state = self.ensure_worker().await?;
    info!(?state, online = self.connectivity.is_online(), "running, press Ctrl-C to stop");

    let mut events = self.coordinator.subscribe();
    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;
    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        line = console.next_line(), if console_open => match line {
          Ok(Some(line)) => match ConsoleCommand::parse(&line) {
            Some(command) => self.apply(command),
            None => warn!(%line, "unknown command, expected online, offline or sync"),
          },
          Ok(None) => console_open = false,
          Err(e) => {
            warn!(error = %e, "failed to read stdin");
            console_open = false;
          }
        },
        event = events.recv() => match event {
          Ok(SyncEvent::PendingCount(count)) => info!(count, "pending mutations"),
          Ok(SyncEvent::Completed { count }) => info!(count, "sync pass delivered"),
          Ok(SyncEvent::WorkerUpdated { version }) => info!(%version, "worker updated"),
          Err(broadcast::error::RecvError::Lagged(_)) => {}
          Err(broadcast::error::RecvError::Closed) => break,
        },
      }
    }
    Ok(())
  }

  fn apply(&self, command: ConsoleCommand) {
    match command {
      ConsoleCommand::Online => self.connectivity.set_online(true),
      ConsoleCommand::Offline => self.connectivity.set_online(false),
      ConsoleCommand::Sync => {
        let request = self.coordinator.request_flush(FlushReason::Manual);
        info!(?request, "manual sync");
      }
    }
  }

  /// Wait for a replay pass after a mutation, when one can happen at all.
  async fn await_sync(&self, events: &mut broadcast::Receiver<SyncEvent>) {
    if !self.connectivity.is_online() || !self.store.is_available() {
      return;
    }
    if wait_for_completion(events).await.is_none() {
      warn!("sync did not finish in time, changes stay queued");
    }
  }

  /// Stop the coordinator, then let the worker drain its queue and exit.
  pub async fn shutdown(self) -> Result<()> {
    let Self {
      store,
      worker,
      worker_task,
      coordinator,
      coordinator_task,
      shutdown,
      ..
    } = self;

    shutdown.send(()).ok();
    coordinator_task
      .await
      .map_err(|e| eyre!("Sync coordinator failed: {}", e))?;
    drop(coordinator);
    drop(worker);
    worker_task
      .await
      .map_err(|e| eyre!("Background worker failed: {}", e))?;
    store.close();
    Ok(())
  }
}

async fn wait_for_completion(events: &mut broadcast::Receiver<SyncEvent>) -> Option<usize> {
  let wait = async {
    loop {
      match events.recv().await {
        Ok(SyncEvent::Completed { count }) => return Some(count),
        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  };
  tokio::time::timeout(SYNC_WAIT, wait).await.ok().flatten()
}
