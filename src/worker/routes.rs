//! Ordered pattern table mapping requests to caching strategies.

use regex::Regex;
use reqwest::Method;
use url::Url;

use super::http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Try the network, fall back to cache, then to an offline response
  NetworkFirst,
  /// Serve from cache immediately and refresh in the background
  StaleWhileRevalidate,
  /// Cache only, offline response on miss
  CacheOnly,
  /// Cache, then a loose same-section match, then the network
  CacheFirst,
  /// Not intercepted
  Network,
}

#[derive(Debug)]
struct Route {
  pattern: Regex,
  method: Option<Method>,
  strategy: Strategy,
}

/// First matching route wins; unmatched same-origin GETs default to
/// stale-while-revalidate.
#[derive(Debug)]
pub struct RoutingTable {
  origin: Url,
  routes: Vec<Route>,
  foreign_allow: Vec<String>,
}

/// Foreign hosts the worker still caches (matched as substrings).
const FOREIGN_ALLOW: &[&str] = &["fonts.googleapis.com", "fonts.gstatic.com", "cdn"];

const STANDARD_ROUTES: &[(&str, Option<&str>, Strategy)] = &[
  (r"/api/", Some("GET"), Strategy::NetworkFirst),
  (r"/dashboard", Some("GET"), Strategy::NetworkFirst),
  (r"\.(js|css)$", None, Strategy::StaleWhileRevalidate),
  (r"/historico", None, Strategy::StaleWhileRevalidate),
  (r"/configuracoes", None, Strategy::StaleWhileRevalidate),
  (r"/inspecao/", None, Strategy::StaleWhileRevalidate),
  (r"_next/static/", None, Strategy::StaleWhileRevalidate),
  (r"/landing", None, Strategy::StaleWhileRevalidate),
  (r"/icons/", None, Strategy::CacheOnly),
  (r"/manifest\.json$", None, Strategy::CacheOnly),
  (r"\.(png|jpg|jpeg|gif|svg|webp)$", None, Strategy::CacheOnly),
  (r"\.(woff|woff2|ttf|otf)$", None, Strategy::CacheFirst),
  (r"/placeholder\.svg", None, Strategy::CacheFirst),
];

impl RoutingTable {
  /// An empty table for `origin`.
  pub fn new(origin: Url) -> Self {
    Self {
      origin,
      routes: Vec::new(),
      foreign_allow: FOREIGN_ALLOW.iter().map(|s| s.to_string()).collect(),
    }
  }

  /// The application's route table.
  pub fn standard(origin: Url) -> Result<Self, regex::Error> {
    STANDARD_ROUTES
      .iter()
      .try_fold(Self::new(origin), |table, (pattern, method, strategy)| {
        let method = method.and_then(|m| m.parse::<Method>().ok());
        table.route(pattern, method, *strategy)
      })
  }

  /// Append a route. `pattern` is matched against the URL path.
  pub fn route(
    mut self,
    pattern: &str,
    method: Option<Method>,
    strategy: Strategy,
  ) -> Result<Self, regex::Error> {
    self.routes.push(Route {
      pattern: Regex::new(pattern)?,
      method,
      strategy,
    });
    Ok(self)
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }

  fn is_allowed_foreign(&self, url: &Url) -> bool {
    url
      .host_str()
      .map(|host| self.foreign_allow.iter().any(|allowed| host.contains(allowed.as_str())))
      .unwrap_or(false)
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    if !self.is_same_origin(&request.url) && !self.is_allowed_foreign(&request.url) {
      return Strategy::Network;
    }

    let path = request.path();
    self
      .routes
      .iter()
      .find(|route| {
        route
          .method
          .as_ref()
          .map_or(true, |method| *method == request.method)
          && route.pattern.is_match(path)
      })
      .map(|route| route.strategy)
      .unwrap_or(Strategy::StaleWhileRevalidate)
  }
}
