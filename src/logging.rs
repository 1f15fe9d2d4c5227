//! Log output setup.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

const FILTER_ENV: &str = "CRM_SYNC_LOG";
const DEFAULT_FILTER: &str = "info";

/// Pick filter directives: CRM_SYNC_LOG, then RUST_LOG, then the config
/// file, then `info`.
/// Empty values count as unset.
fn filter_directives(config: &LogConfig, var: impl Fn(&str) -> Option<String>) -> String {
  let set = |d: &String| !d.trim().is_empty();
  var(FILTER_ENV)
    .filter(set)
    .or_else(|| var("RUST_LOG").filter(set))
    .or_else(|| config.filter.clone().filter(set))
    .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Install the global subscriber. With `log.file` set, output goes to a
/// daily-rotated file; keep the returned guard alive to flush it on exit.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let directives = filter_directives(config, |name| std::env::var(name).ok());
  let filter = EnvFilter::try_new(&directives)
    .map_err(|e| eyre!("Invalid log filter {:?}: {}", directives, e))?;

  match &config.file {
    Some(path) => {
      let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
      std::fs::create_dir_all(directory)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

      let appender = tracing_appender::rolling::daily(directory, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| eyre!("Failed to install logger: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| eyre!("Failed to install logger: {}", e))?;
      Ok(None)
    }
  }
}
