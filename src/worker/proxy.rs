//! Resource caching proxy.
//!
//! Every intercepted request is answered: network failures fall back to the
//! cache and then to a synthesized offline response, never to an error.

use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::http::{Fetcher, Request, Response};
use super::offline;
use super::resource_cache::{CachedResource, ResourceStorage};
use super::routes::{RoutingTable, Strategy};

/// Cache holding writes that failed for lack of network. It survives
/// version changes.
pub const PENDING_POSTS: &str = "pending-posts";

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// Served from cache while a background refresh runs
  Revalidating,
  /// Synthesized fallback
  Offline,
  /// Write accepted locally for later replay
  Queued,
}

#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  fn network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  fn cache(cached: CachedResource) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
    }
  }
}

/// Outcome of replaying stored writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostReplay {
  pub replayed: usize,
  pub remaining: usize,
}

#[derive(Clone)]
pub struct ResourceProxy {
  cache_name: Arc<str>,
  storage: Arc<dyn ResourceStorage>,
  fetcher: Arc<dyn Fetcher>,
  routes: Arc<RoutingTable>,
}

impl ResourceProxy {
  pub fn new(
    cache_name: &str,
    storage: Arc<dyn ResourceStorage>,
    fetcher: Arc<dyn Fetcher>,
    routes: RoutingTable,
  ) -> Self {
    Self {
      cache_name: Arc::from(cache_name),
      storage,
      fetcher,
      routes: Arc::new(routes),
    }
  }

  /// Current versioned cache name.
  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn storage(&self) -> &Arc<dyn ResourceStorage> {
    &self.storage
  }

  pub fn origin(&self) -> &Url {
    self.routes.origin()
  }

  /// Answer an intercepted request.
  pub async fn handle(&self, request: Request) -> Served {
    if request.method == Method::POST && self.routes.is_same_origin(&request.url) {
      return self.post(request).await;
    }
    if request.method != Method::GET {
      return self.passthrough(request).await;
    }

    let strategy = self.routes.classify(&request);
    debug!(url = %request.url, ?strategy, "routing request");

    match strategy {
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
      Strategy::CacheOnly => self.cache_only(request).await,
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::Network => self.passthrough(request).await,
    }
  }

  /// Forward to the network untouched; only a network failure is replaced.
  pub async fn passthrough(&self, request: Request) -> Served {
    match self.fetcher.fetch(&request).await {
      Ok(response) => Served::network(response),
      Err(e) => {
        debug!(url = %request.url, error = %e, "passthrough failed");
        self.offline(&request)
      }
    }
  }

  async fn network_first(&self, request: Request) -> Served {
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        self.store(&request, &response);
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        match self.lookup(&request) {
          Some(cached) => Served::cache(cached),
          None => self.offline(&request),
        }
      }
    }
  }

  async fn stale_while_revalidate(&self, request: Request) -> Served {
    let refresh = {
      let proxy = self.clone();
      let request = request.clone();
      async move {
        match proxy.fetcher.fetch(&request).await {
          Ok(response) => {
            proxy.store(&request, &response);
            Some(response)
          }
          Err(e) => {
            debug!(url = %request.url, error = %e, "revalidation failed");
            None
          }
        }
      }
    };

    match self.lookup(&request) {
      Some(cached) => {
        tokio::spawn(refresh);
        Served {
          response: cached.response,
          source: ResponseSource::Revalidating,
        }
      }
      None => match refresh.await {
        Some(response) => Served::network(response),
        None => self.offline(&request),
      },
    }
  }

  async fn cache_only(&self, request: Request) -> Served {
    if let Some(cached) = self.lookup(&request) {
      return Served::cache(cached);
    }

    // One network attempt to populate the cache
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        self.store(&request, &response);
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "cache-only miss while offline");
        self.offline(&request)
      }
    }
  }

  async fn cache_first(&self, request: Request) -> Served {
    if let Some(cached) = self.lookup(&request) {
      return Served::cache(cached);
    }

    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        self.store(&request, &response);
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "cache-first fetch failed");
        match self.section_match(&request) {
          Some(cached) => {
            debug!(url = %request.url, matched = %cached.key.url, "served loose cache match");
            Served::cache(cached)
          }
          None => self.offline(&request),
        }
      }
    }
  }

  /// Send a write. If the network is gone or the server does not accept
  /// it, keep it for replay and acknowledge it locally.
  async fn post(&self, request: Request) -> Served {
    match self.fetcher.fetch(&request).await {
      Ok(response) if response.is_ok() => Served::network(response),
      Ok(response) => {
        info!(url = %request.url, status = response.status, "write not accepted, storing for replay");
        self.park(&request)
      }
      Err(e) => {
        info!(url = %request.url, error = %e, "write failed offline, storing for replay");
        self.park(&request)
      }
    }
  }

  fn park(&self, request: &Request) -> Served {
    let ack = offline::accepted_for_replay();
    match self.storage.append(PENDING_POSTS, request, &ack) {
      Ok(()) => Served {
        response: ack,
        source: ResponseSource::Queued,
      },
      Err(e) => {
        warn!(url = %request.url, error = %e, "failed to store write for replay");
        Served {
          response: offline::unavailable(),
          source: ResponseSource::Offline,
        }
      }
    }
  }

  /// Resend stored writes in the order they were made. Stops at the first
  /// network failure; a server error keeps the write for the next pass.
  pub async fn replay_pending_posts(&self) -> PostReplay {
    let keys = match self.storage.keys(PENDING_POSTS) {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, "failed to list stored writes");
        return PostReplay::default();
      }
    };

    let mut report = PostReplay {
      replayed: 0,
      remaining: keys.len(),
    };

    for key in keys {
      let entry = match self.storage.get_by_key(PENDING_POSTS, &key.request_key) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
          report.remaining -= 1;
          continue;
        }
        Err(e) => {
          warn!(url = %key.url, error = %e, "failed to read stored write");
          continue;
        }
      };

      let Ok(url) = Url::parse(&entry.key.url) else {
        warn!(url = %entry.key.url, "dropping stored write with invalid url");
        self.forget_post(&key.request_key);
        report.remaining -= 1;
        continue;
      };
      let method = entry.key.method.parse::<Method>().unwrap_or(Method::POST);
      let mut request = Request::new(method, url);
      request.body = entry.request_body;

      match self.fetcher.fetch(&request).await {
        Ok(response) if response.status >= 500 => {
          debug!(url = %request.url, status = response.status, "stored write deferred");
        }
        Ok(response) => {
          if !response.is_ok() {
            warn!(url = %request.url, status = response.status, "stored write rejected by server");
          }
          self.forget_post(&key.request_key);
          report.replayed += 1;
          report.remaining -= 1;
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "still offline, stopping write replay");
          break;
        }
      }
    }

    report
  }

  fn forget_post(&self, request_key: &str) {
    if let Err(e) = self.storage.remove(PENDING_POSTS, request_key) {
      warn!(error = %e, "failed to remove stored write");
    }
  }

  /// Fetch a resource for precaching. Anything but a 2xx is a failure.
  pub(crate) async fn fetch_for_cache(&self, url: &Url) -> Result<(Request, Response), String> {
    let request = Request::get(url.clone());
    let response = self
      .fetcher
      .fetch(&request)
      .await
      .map_err(|e| e.to_string())?;
    if !response.is_ok() {
      return Err(format!("{} returned {}", url, response.status));
    }
    Ok((request, response))
  }

  /// Cache a response. Only 2xx responses are kept.
  pub(crate) fn store(&self, request: &Request, response: &Response) {
    if !response.is_ok() {
      return;
    }
    if let Err(e) = self.storage.put(&self.cache_name, request, response) {
      warn!(url = %request.url, error = %e, "failed to cache response");
    }
  }

  fn lookup(&self, request: &Request) -> Option<CachedResource> {
    self
      .storage
      .get(&self.cache_name, request)
      .unwrap_or_else(|e| {
        warn!(url = %request.url, error = %e, "resource cache read failed");
        None
      })
  }

  /// Most recent cached GET from the same origin whose first path segment
  /// matches the request's.
  fn section_match(&self, request: &Request) -> Option<CachedResource> {
    let section = first_segment(&request.url)?;
    let keys = self
      .storage
      .keys(&self.cache_name)
      .map_err(|e| warn!(error = %e, "resource cache listing failed"))
      .ok()?;

    keys
      .iter()
      .rev()
      .filter(|key| key.method == Method::GET.as_str())
      .find(|key| {
        Url::parse(&key.url)
          .map(|url| {
            url.origin() == request.url.origin() && first_segment(&url) == Some(section)
          })
          .unwrap_or(false)
      })
      .and_then(|key| {
        self
          .storage
          .get_by_key(&self.cache_name, &key.request_key)
          .ok()
          .flatten()
      })
  }

  fn offline(&self, request: &Request) -> Served {
    let cached_root = if request.is_navigation() {
      self
        .routes
        .origin()
        .join("/")
        .ok()
        .and_then(|root| self.lookup(&Request::get(root)))
        .map(|cached| cached.response)
    } else {
      None
    };

    Served {
      response: offline::fallback(request, cached_root),
      source: ResponseSource::Offline,
    }
  }
}

fn first_segment(url: &Url) -> Option<&str> {
  url
    .path_segments()
    .and_then(|mut segments| segments.next())
    .filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::ScriptedFetcher;
  use crate::worker::http::Destination;
  use crate::worker::resource_cache::SqliteResourceStorage;
  use std::time::Duration;

  const ORIGIN: &str = "http://localhost:3000";

  struct Fixture {
    _dir: tempfile::TempDir,
    fetcher: Arc<ScriptedFetcher>,
    proxy: ResourceProxy,
  }

  fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(SqliteResourceStorage::open(&dir.path().join("resources.db")).unwrap());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let origin = Url::parse(ORIGIN).unwrap();
    let proxy = ResourceProxy::new(
      "fireinspect-v4",
      storage,
      fetcher.clone(),
      RoutingTable::standard(origin).unwrap(),
    );
    Fixture {
      _dir: dir,
      fetcher,
      proxy,
    }
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn html(body: &str) -> Response {
    Response::new(200, "OK", "text/html", body)
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache() {
    let f = fixture();
    f.fetcher.respond(url("/api/inspecoes").as_str(), Response::new(200, "OK", "application/json", "[1]"));

    let online = f.proxy.handle(Request::get(url("/api/inspecoes"))).await;
    assert_eq!(online.source, ResponseSource::Network);

    f.fetcher.set_online(false);
    let offline = f.proxy.handle(Request::get(url("/api/inspecoes"))).await;
    assert_eq!(offline.source, ResponseSource::Cache);
    assert_eq!(offline.response.text(), "[1]");
  }

  #[tokio::test]
  async fn test_offline_navigation_without_cache_gets_offline_page() {
    let f = fixture();
    f.fetcher.set_online(false);

    let served = f.proxy.handle(Request::navigate(url("/dashboard"))).await;
    assert_eq!(served.source, ResponseSource::Offline);
    assert_eq!(served.response.status, 200);
    assert_eq!(served.response.content_type(), Some("text/html"));
  }

  #[tokio::test]
  async fn test_offline_navigation_uses_cached_root() {
    let f = fixture();
    f.fetcher.respond(url("/").as_str(), html("<main>home</main>"));
    f.proxy.handle(Request::navigate(url("/"))).await;

    f.fetcher.set_online(false);
    let served = f.proxy.handle(Request::navigate(url("/dashboard"))).await;
    assert_eq!(served.source, ResponseSource::Offline);
    assert_eq!(served.response.text(), "<main>home</main>");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_refreshes_in_background() {
    let f = fixture();
    let page = url("/historico");
    f.fetcher.respond(page.as_str(), html("v1"));

    let first = f.proxy.handle(Request::get(page.clone())).await;
    assert_eq!(first.source, ResponseSource::Network);

    f.fetcher.respond(page.as_str(), html("v2"));
    let second = f.proxy.handle(Request::get(page.clone())).await;
    assert_eq!(second.source, ResponseSource::Revalidating);
    assert_eq!(second.response.text(), "v1");

    // The background refresh lands in the cache
    let mut refreshed = false;
    for _ in 0..50 {
      let cached = f
        .proxy
        .storage()
        .get("fireinspect-v4", &Request::get(page.clone()))
        .unwrap()
        .unwrap();
      if cached.response.text() == "v2" {
        refreshed = true;
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refreshed);
  }

  #[tokio::test]
  async fn test_cache_only_tries_network_once_then_caches() {
    let f = fixture();
    let icon = url("/icons/icon-192x192.png");
    f.fetcher.respond(icon.as_str(), Response::new(200, "OK", "image/png", "png"));

    let first = f.proxy.handle(Request::infer(Method::GET, icon.clone())).await;
    assert_eq!(first.source, ResponseSource::Network);

    let second = f.proxy.handle(Request::infer(Method::GET, icon.clone())).await;
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(f.fetcher.call_count(icon.as_str()), 1);
  }

  #[tokio::test]
  async fn test_cache_only_miss_offline_is_well_formed() {
    let f = fixture();
    f.fetcher.set_online(false);
    let mut request = Request::get(url("/icons/icon-512x512.png"));
    request.destination = Destination::Image;

    let served = f.proxy.handle(request).await;
    assert_eq!(served.source, ResponseSource::Offline);
    assert_eq!(served.response.content_type(), Some("image/svg+xml"));

    let served = f.proxy.handle(Request::get(url("/manifest.json"))).await;
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_cache_first_uses_same_section_match() {
    let f = fixture();
    f.fetcher.respond(url("/fonts/inter.woff2").as_str(), Response::new(200, "OK", "font/woff2", "A"));
    f.fetcher.respond(url("/fonts/inter-bold.woff2").as_str(), Response::new(200, "OK", "font/woff2", "B"));
    f.proxy.handle(Request::get(url("/fonts/inter.woff2"))).await;
    f.proxy.handle(Request::get(url("/fonts/inter-bold.woff2"))).await;

    f.fetcher.set_online(false);
    let served = f.proxy.handle(Request::get(url("/fonts/inter-italic.woff2"))).await;
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.text(), "B");
  }

  #[tokio::test]
  async fn test_error_responses_are_not_cached() {
    let f = fixture();
    f.fetcher.respond(url("/api/missing").as_str(), Response::new(404, "Not Found", "text/plain", "no"));

    let served = f.proxy.handle(Request::get(url("/api/missing"))).await;
    assert_eq!(served.response.status, 404);
    assert!(f.proxy.storage().keys("fireinspect-v4").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_foreign_requests_pass_through_uncached() {
    let f = fixture();
    let foreign = "https://analytics.example.com/collect";
    f.fetcher.respond(foreign, Response::new(200, "OK", "text/plain", "ok"));

    let served = f
      .proxy
      .handle(Request::get(Url::parse(foreign).unwrap()))
      .await;
    assert_eq!(served.source, ResponseSource::Network);
    assert!(f.proxy.storage().keys("fireinspect-v4").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_offline_post_is_queued_and_replayed() {
    let f = fixture();
    let endpoint = url("/api/inspecoes");
    f.fetcher.set_online(false);

    let served = f
      .proxy
      .handle(Request::post(endpoint.clone(), b"{\"id\":1}".to_vec()))
      .await;
    assert_eq!(served.source, ResponseSource::Queued);
    assert_eq!(served.response.status, 202);

    // Still offline: nothing leaves
    let report = f.proxy.replay_pending_posts().await;
    assert_eq!(report, PostReplay { replayed: 0, remaining: 1 });

    f.fetcher.set_online(true);
    f.fetcher.respond(endpoint.as_str(), Response::new(201, "Created", "application/json", "{}"));
    let report = f.proxy.replay_pending_posts().await;
    assert_eq!(report, PostReplay { replayed: 1, remaining: 0 });
    assert!(f.fetcher.calls().contains(&format!("POST {}", endpoint)));
    assert!(f.proxy.storage().keys(PENDING_POSTS).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_rejected_post_is_queued() {
    let f = fixture();
    let endpoint = url("/api/inspecoes");
    f.fetcher.respond(endpoint.as_str(), Response::new(503, "Service Unavailable", "text/plain", "busy"));

    let served = f
      .proxy
      .handle(Request::post(endpoint.clone(), b"{\"id\":2}".to_vec()))
      .await;
    assert_eq!(served.source, ResponseSource::Queued);
    assert_eq!(served.response.status, 202);
    assert_eq!(f.proxy.storage().keys(PENDING_POSTS).unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_foreign_post_is_never_queued() {
    let f = fixture();
    f.fetcher.set_online(false);

    let served = f
      .proxy
      .handle(Request::post(
        Url::parse("https://analytics.example.com/collect").unwrap(),
        b"{}".to_vec(),
      ))
      .await;
    assert_eq!(served.source, ResponseSource::Offline);
    assert_eq!(served.response.status, 503);
    assert!(f.proxy.storage().keys(PENDING_POSTS).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_replay_keeps_server_errors_and_drops_client_errors() {
    let f = fixture();
    let endpoint = url("/api/inspecoes");
    f.fetcher.set_online(false);
    f.proxy
      .handle(Request::post(endpoint.clone(), b"{\"id\":3}".to_vec()))
      .await;

    f.fetcher.set_online(true);
    f.fetcher.respond(endpoint.as_str(), Response::new(500, "Internal Server Error", "text/plain", ""));
    let report = f.proxy.replay_pending_posts().await;
    assert_eq!(report, PostReplay { replayed: 0, remaining: 1 });
    assert_eq!(f.proxy.storage().keys(PENDING_POSTS).unwrap().len(), 1);

    f.fetcher.respond(endpoint.as_str(), Response::new(422, "Unprocessable Entity", "application/json", "{}"));
    let report = f.proxy.replay_pending_posts().await;
    assert_eq!(report, PostReplay { replayed: 1, remaining: 0 });
    assert!(f.proxy.storage().keys(PENDING_POSTS).unwrap().is_empty());
  }
}
