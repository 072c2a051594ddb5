//! Opaque photo payload carried as a `data:` URI.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhotoError {
  #[error("photo is not a base64 data URI")]
  NotDataUri,
  #[error("photo payload is not valid base64: {0}")]
  Encoding(#[from] base64::DecodeError),
  #[error("failed to read photo {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
}

/// Image payload encoded as `data:<mime>;base64,<data>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Photo(String);

impl Photo {
  pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
    Self(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
  }

  /// Read an image file, guessing the MIME type from its extension.
  pub fn from_file(path: &Path) -> Result<Self, PhotoError> {
    let bytes = std::fs::read(path).map_err(|source| PhotoError::Io {
      path: path.display().to_string(),
      source,
    })?;
    let mime = match path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_lowercase())
      .as_deref()
    {
      Some("png") => "image/png",
      Some("webp") => "image/webp",
      Some("gif") => "image/gif",
      _ => "image/jpeg",
    };
    Ok(Self::from_bytes(mime, &bytes))
  }

  /// Accept an existing data URI after checking its shape.
  pub fn parse(uri: &str) -> Result<Self, PhotoError> {
    let photo = Self(uri.to_string());
    photo.decode()?;
    Ok(photo)
  }

  /// Wrap text read back from durable storage without re-validating it.
  pub(crate) fn from_stored(uri: String) -> Self {
    Self(uri)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn mime(&self) -> Option<&str> {
    self.0.strip_prefix("data:")?.split(';').next()
  }

  /// Size of the decoded image in bytes.
  pub fn byte_len(&self) -> Result<usize, PhotoError> {
    Ok(self.decode()?.len())
  }

  fn decode(&self) -> Result<Vec<u8>, PhotoError> {
    let (header, data) = self.0.split_once(',').ok_or(PhotoError::NotDataUri)?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
      return Err(PhotoError::NotDataUri);
    }
    Ok(STANDARD.decode(data)?)
  }
}
