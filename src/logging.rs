use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LogConfig;

const LOG_FILE_NAME: &str = "todoq.log";

/// Keeps the background log writer alive; drop it on shutdown to flush.
pub struct LogGuard {
  _guard: WorkerGuard,
  pub path: PathBuf,
}

/// Install the global subscriber, writing to `<dir>/todoq.log`.
///
/// Logs never go to stdout since the UI owns the terminal. `RUST_LOG`
/// takes precedence over the configured level.
pub fn init(config: &LogConfig) -> Result<LogGuard> {
  let dir = resolve_log_dir(config);
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.level))
    .map_err(|e| eyre!("Invalid log level '{}': {}", config.level, e))?;

  let appender = tracing_appender::rolling::never(&dir, LOG_FILE_NAME);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  Registry::default()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(LogGuard {
    _guard: guard,
    path: dir.join(LOG_FILE_NAME),
  })
}

fn resolve_log_dir(config: &LogConfig) -> PathBuf {
  if let Some(dir) = &config.dir {
    return dir.clone();
  }
  dirs::data_dir()
    .map(|d| d.join("todoq"))
    .unwrap_or_else(|| std::env::temp_dir().join("todoq"))
}
