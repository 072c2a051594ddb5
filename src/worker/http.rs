//! Request/response snapshots and the network seam used by the worker.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network error: {0}")]
  Network(String),
  #[error("invalid url: {0}")]
  InvalidUrl(String),
}

/// How the page issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  Other,
}

/// What the response will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Document,
  Image,
  Other,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];

/// An outbound request as seen by the interception layer.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      mode: RequestMode::Other,
      destination: Destination::Other,
      headers: BTreeMap::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn post(url: Url, body: Vec<u8>) -> Self {
    Self {
      body: Some(body),
      ..Self::new(Method::POST, url)
    }
  }

  /// Guess mode and destination the way a browser would label them: image
  /// extensions are images, extension-less GETs are navigations.
  pub fn infer(method: Method, url: Url) -> Self {
    let extension = url
      .path_segments()
      .and_then(|mut segments| segments.next_back())
      .and_then(|last| last.rsplit_once('.'))
      .map(|(_, ext)| ext.to_lowercase());

    let request = Self::new(method.clone(), url);
    match extension {
      Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => Self {
        destination: Destination::Image,
        ..request
      },
      None if method == Method::GET => Self {
        mode: RequestMode::Navigate,
        destination: Destination::Document,
        ..request
      },
      _ => request,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// A full response snapshot, storable in the resource cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, status_text: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), content_type.to_string());
    Self {
      status,
      status_text: status_text.to_string(),
      headers,
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  /// 2xx
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// The network as seen by the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// `reqwest`-backed fetcher.
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Option<Duration>) -> Result<Self, FetchError> {
    let mut builder =
      reqwest::Client::builder().user_agent(concat!("fireinspect/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;
    Ok(Self { client })
  }

  pub fn client(&self) -> &reqwest::Client {
    &self.client
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::Network(format!("{} {}: {}", request.method, request.url, e)))?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Network(format!("failed to read body of {}: {}", request.url, e)))?
      .to_vec();

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:3000").unwrap().join(path).unwrap()
  }

  #[test]
  fn test_infer_labels_images_and_pages() {
    let image = Request::infer(Method::GET, url("/icons/icon-192x192.PNG"));
    assert_eq!(image.destination, Destination::Image);
    assert!(!image.is_navigation());

    let page = Request::infer(Method::GET, url("/historico"));
    assert!(page.is_navigation());
    assert_eq!(page.destination, Destination::Document);

    let script = Request::infer(Method::GET, url("/_next/static/chunks/main.js"));
    assert_eq!(script.mode, RequestMode::Other);
    assert_eq!(script.destination, Destination::Other);

    let post = Request::infer(Method::POST, url("/api/inspecoes"));
    assert!(!post.is_navigation());
  }

  #[test]
  fn test_response_headers_are_case_insensitive() {
    let response = Response::new(200, "OK", "text/html", "<p>hi</p>").with_header("X-Cache", "hit");
    assert!(response.is_ok());
    assert_eq!(response.content_type(), Some("text/html"));
    assert_eq!(response.header("x-cache"), Some("hit"));
    assert_eq!(response.text(), "<p>hi</p>");
  }
}
