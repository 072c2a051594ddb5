//! Responses synthesized when neither the network nor the cache can answer.

use serde_json::json;

use super::http::{Destination, Request, Response};

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>InspeFogo - Offline</title>
  <style>
    body { font-family: sans-serif; padding: 20px; text-align: center; background-color: #f8f9fa; }
    .container { max-width: 500px; margin: 0 auto; background: white; padding: 20px; border-radius: 8px; }
    .btn { background: #ef4444; color: white; border: none; padding: 12px 24px; border-radius: 4px; }
    h1 { color: #ef4444; }
  </style>
</head>
<body>
  <div class="container">
    <h1>Você está offline</h1>
    <p>O InspeFogo funciona offline, mas esta página não foi carregada anteriormente.</p>
    <p>Tente acessar a página inicial ou verifique sua conexão.</p>
    <button class="btn" onclick="window.location.href='/'">Voltar para o início</button>
  </div>
</body>
</html>
"#;

const PLACEHOLDER_IMAGE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100" viewBox="0 0 100 100"><rect width="100" height="100" fill="#f0f0f0"/><path d="M30,50 L70,50 M50,30 L50,70" stroke="#ccc" stroke-width="5"/></svg>"##;

/// The offline page served to navigations that have no cached root document.
pub fn offline_page() -> Response {
  Response::new(200, "OK", "text/html", OFFLINE_PAGE)
}

pub fn placeholder_image() -> Response {
  Response::new(200, "OK", "image/svg+xml", PLACEHOLDER_IMAGE).with_header("cache-control", "no-store")
}

pub fn unavailable() -> Response {
  Response::new(
    503,
    "Serviço indisponível - Modo Offline",
    "text/plain",
    "Offline - InspeFogo",
  )
  .with_header("cache-control", "no-store")
}

/// Fallback for `request`. Navigations prefer the cached root document.
pub fn fallback(request: &Request, cached_root: Option<Response>) -> Response {
  if request.is_navigation() {
    return cached_root.unwrap_or_else(offline_page);
  }
  if request.destination == Destination::Image {
    return placeholder_image();
  }
  unavailable()
}

/// Synthetic acknowledgement for a write accepted for later replay.
pub fn accepted_for_replay() -> Response {
  let body = json!({
    "success": true,
    "offline": true,
    "message": "Dados salvos localmente. Serão sincronizados quando online.",
  });
  Response::new(
    202,
    "Accepted",
    "application/json",
    body.to_string().into_bytes(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:3000").unwrap().join(path).unwrap()
  }

  #[test]
  fn test_navigation_prefers_cached_root() {
    let request = Request::navigate(url("/historico"));
    let root = Response::new(200, "OK", "text/html", "<main>app</main>");

    assert_eq!(fallback(&request, Some(root.clone())), root);

    let page = fallback(&request, None);
    assert_eq!(page.status, 200);
    assert_eq!(page.content_type(), Some("text/html"));
    assert!(page.text().contains("offline"));
  }

  #[test]
  fn test_images_get_placeholder_and_others_503() {
    let mut image = Request::get(url("/photo.png"));
    image.destination = Destination::Image;
    let placeholder = fallback(&image, None);
    assert_eq!(placeholder.content_type(), Some("image/svg+xml"));
    assert_eq!(placeholder.header("cache-control"), Some("no-store"));

    let other = fallback(&Request::get(url("/api/inspecoes")), None);
    assert_eq!(other.status, 503);
    assert_eq!(other.text(), "Offline - InspeFogo");
  }

  #[test]
  fn test_accepted_for_replay_is_json() {
    let response = accepted_for_replay();
    assert_eq!(response.status, 202);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["offline"], true);
  }
}
