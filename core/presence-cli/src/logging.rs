use std::env;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEBUG_ENV: &str = "PRESENCE_DEBUG_LOG";
const LOG_DIR: &str = "presence";
const LOG_FILE: &str = "presence.log";

/// Installs the global subscriber: stderr always, plus a daily file when a
/// state directory exists. Keep the returned guard alive until exit or the
/// file writer drops buffered lines.
pub fn init() -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        return None;
    }
    guard
}

fn env_filter() -> EnvFilter {
    if debug_enabled(env::var(DEBUG_ENV).ok().as_deref()) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}

fn log_dir() -> Option<PathBuf> {
    let dir = dirs::state_dir()
        .or_else(dirs::data_local_dir)?
        .join(LOG_DIR)
        .join("logs");
    fs_err::create_dir_all(&dir).ok()?;
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_accepts_truthy_values() {
        for value in ["1", "true", "TRUE", "yes", "YES"] {
            assert!(debug_enabled(Some(value)), "{value}");
        }
        for value in ["0", "false", "", "on"] {
            assert!(!debug_enabled(Some(value)), "{value}");
        }
        assert!(!debug_enabled(None));
    }
}
