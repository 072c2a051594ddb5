//! Push notifications and notification clicks.

use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::clients::Clients;

const DEFAULT_TITLE: &str = "InspeFogo";
const DEFAULT_BODY: &str = "Nova notificação do InspeFogo";
const ICON: &str = "/icons/icon-192x192.png";
const BADGE: &str = "/icons/icon-192x192.png";
const VIBRATE: &[u32] = &[100, 50, 100];

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Where a click should take the user
  pub url: String,
}

impl Notification {
  /// Build a notification from a push payload. Returns `None` when the push
  /// carried no data or the data is not a JSON object.
  pub fn from_push(data: Option<&[u8]>) -> Option<Self> {
    let data = data?;
    let payload: PushPayload = match serde_json::from_slice(data) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(error = %e, "ignoring malformed push payload");
        return None;
      }
    };

    Some(Self {
      title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
      body: payload.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
      icon: ICON.to_string(),
      badge: BADGE.to_string(),
      vibrate: VIBRATE.to_vec(),
      url: payload.url.unwrap_or_else(|| "/".to_string()),
    })
  }
}

/// Displays notifications on the platform.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification);
}

/// Notifier that writes notifications to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) {
    info!(
      title = %notification.title,
      body = %notification.body,
      url = %notification.url,
      "notification"
    );
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
  Focused(u64),
  Opened(u64),
}

/// Focus an existing client on our origin, or open the notification's URL.
pub fn handle_click(clients: &Clients, origin: &Url, notification: &Notification) -> ClickOutcome {
  let origin_str = origin.origin().ascii_serialization();

  if let Some(existing) = clients
    .match_all()
    .into_iter()
    .find(|client| client.url.as_str().contains(&origin_str))
  {
    clients.focus(existing.id);
    return ClickOutcome::Focused(existing.id);
  }

  let target = origin
    .join(&notification.url)
    .unwrap_or_else(|_| origin.clone());
  ClickOutcome::Opened(clients.open_window(target).id)
}
