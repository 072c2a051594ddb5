//! Tracing subscriber setup for the CLI.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

const DEFAULT_FILTER: &str = "fireinspect=info";
const LOG_FILE: &str = "fireinspect.log";

/// Install the global subscriber: stderr plus a non-blocking file under
/// `<data_dir>/logs`. `RUST_LOG` overrides the default filter.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// whole process. If the log directory cannot be created only stderr is used.
pub fn init(data_dir: &Path) -> Result<Option<WorkerGuard>> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  let stderr_layer = fmt::layer()
    .with_target(true)
    .with_writer(std::io::stderr);

  let logs_dir = data_dir.join("logs");
  let (file_layer, guard) = match std::fs::create_dir_all(&logs_dir) {
    Ok(()) => {
      let appender = tracing_appender::rolling::never(&logs_dir, LOG_FILE);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer);
      (Some(layer), Some(guard))
    }
    Err(e) => {
      eprintln!(
        "Failed to create log directory {}, logging to stderr only: {}",
        logs_dir.display(),
        e
      );
      (None, None)
    }
  };

  registry()
    .with(env_filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
