//! Worker lifecycle: install (precache), activate (clean old caches, claim
//! clients) and skip-waiting.

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use super::clients::Clients;
use super::messages::ClientMessage;
use super::proxy::{ResourceProxy, PENDING_POSTS};
use super::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  /// Controls clients and intercepts their requests
  Activated,
  /// Install failed; this version never takes control
  Redundant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub core_cached: usize,
  pub secondary_cached: usize,
  pub secondary_failed: usize,
  /// The version's cache survived from an earlier run; nothing was fetched
  pub reused: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  pub removed_caches: Vec<String>,
  pub claimed: usize,
}

pub struct Lifecycle {
  version: String,
  core_assets: Vec<Url>,
  secondary_assets: Vec<Url>,
  state: watch::Sender<WorkerState>,
}

impl Lifecycle {
  pub fn new(version: &str, core_assets: Vec<Url>, secondary_assets: Vec<Url>) -> Self {
    let (state, _rx) = watch::channel(WorkerState::Parsed);
    Self {
      version: version.to_string(),
      core_assets,
      secondary_assets,
      state,
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
    self.state.subscribe()
  }

  pub fn is_active(&self) -> bool {
    self.state() == WorkerState::Activated
  }

  fn transition(&self, next: WorkerState) {
    let previous = self.state.send_replace(next);
    info!(version = %self.version, ?previous, state = ?next, "worker state changed");
  }

  /// Precache the application shell. Core assets are all-or-nothing: any
  /// failure leaves the cache untouched and the worker redundant. Secondary
  /// asset failures are only logged.
  ///
  /// A version whose cache already exists was installed by an earlier run
  /// and goes straight to `Installed`.
  pub async fn install(&self, proxy: &ResourceProxy) -> Result<InstallReport, WorkerError> {
    if self.state() != WorkerState::Parsed {
      debug!(state = ?self.state(), "install ignored");
      return Ok(InstallReport::default());
    }
    let installed = proxy
      .storage()
      .cache_names()
      .map(|names| names.iter().any(|name| name == &self.version))
      .unwrap_or(false);
    if installed {
      info!(version = %self.version, "version already installed, reusing its cache");
      self.transition(WorkerState::Installed);
      return Ok(InstallReport {
        reused: true,
        ..InstallReport::default()
      });
    }

    self.transition(WorkerState::Installing);

    let core = join_all(self.core_assets.iter().map(|url| proxy.fetch_for_cache(url))).await;
    let mut fetched = Vec::with_capacity(core.len());
    for result in core {
      match result {
        Ok(pair) => fetched.push(pair),
        Err(reason) => {
          warn!(%reason, "core asset precache failed");
          self.transition(WorkerState::Redundant);
          return Err(WorkerError::Install(reason));
        }
      }
    }
    for (request, response) in &fetched {
      proxy.store(request, response);
    }

    let mut report = InstallReport {
      core_cached: fetched.len(),
      ..InstallReport::default()
    };

    let secondary =
      join_all(self.secondary_assets.iter().map(|url| proxy.fetch_for_cache(url))).await;
    for result in secondary {
      match result {
        Ok((request, response)) => {
          proxy.store(&request, &response);
          report.secondary_cached += 1;
        }
        Err(reason) => {
          warn!(%reason, "secondary asset precache failed");
          report.secondary_failed += 1;
        }
      }
    }

    self.transition(WorkerState::Installed);
    Ok(report)
  }

  /// Activate a waiting version. Returns `None` when not in `Installed`.
  pub fn skip_waiting(&self, proxy: &ResourceProxy, clients: &Clients) -> Option<ActivationReport> {
    if self.state() != WorkerState::Installed {
      debug!(state = ?self.state(), "skip-waiting ignored");
      return None;
    }
    Some(self.activate(proxy, clients))
  }

  /// Drop caches of other versions, take control of open clients and tell
  /// them a new version is live.
  fn activate(&self, proxy: &ResourceProxy, clients: &Clients) -> ActivationReport {
    self.transition(WorkerState::Activating);

    let mut report = ActivationReport::default();
    match proxy.storage().cache_names() {
      Ok(names) => {
        for name in names {
          if name == self.version || name == PENDING_POSTS {
            continue;
          }
          match proxy.storage().delete_cache(&name) {
            Ok(removed) => {
              info!(cache = %name, removed, "deleted stale resource cache");
              report.removed_caches.push(name);
            }
            Err(e) => warn!(cache = %name, error = %e, "failed to delete stale resource cache"),
          }
        }
      }
      Err(e) => warn!(error = %e, "failed to list resource caches"),
    }

    report.claimed = clients.claim();
    clients.post_all(ClientMessage::SwUpdated {
      version: self.version.clone(),
    });

    self.transition(WorkerState::Activated);
    report
  }
}
