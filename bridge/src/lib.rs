// Scan-and-plan bridge
//
// This crate connects the sequencer core to its host: the workflow control
// context, logging initialisation, record sinks and a simulated robot
// backend for dry runs.

mod error;
mod event;
mod sim;
mod sink;
mod workflow;

pub use error::*;
pub use event::*;
pub use sim::*;
pub use sink::*;
pub use workflow::*;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// File name prefix of the daily log files
const LOG_FILE_PREFIX: &str = "snp.log";

/// Days of log files kept on startup
const LOG_RETENTION_DAYS: i64 = 7;

/// Global log directory path
static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Global log file guard (keeps file writer alive)
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// Logs go to the console and, when `log_directory` is given, to a daily
/// rolling file in that directory. The filter comes from `RUST_LOG` and
/// defaults to `info`. A second call fails with [`BridgeError::LoggingInit`].
pub fn init_logging(log_directory: Option<String>) -> BridgeResult<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_target(false);

    let Some(log_dir) = log_directory else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| BridgeError::LoggingInit(e.to_string()))?;
        tracing::info!("Scan-and-plan bridge initialized (console logging only)");
        return Ok(());
    };

    let log_path = PathBuf::from(&log_dir);
    std::fs::create_dir_all(&log_path)
        .map_err(|e| BridgeError::LoggingInit(format!("Failed to create log directory '{}': {}", log_dir, e)))?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BridgeError::LoggingInit(e.to_string()))?;

    // Keep the writer alive for the lifetime of the process
    LOG_GUARD.set(guard).ok();
    LOG_DIR.set(log_path.clone()).ok();

    tracing::info!("Scan-and-plan bridge initialized with file logging");
    tracing::info!("Log directory: {}", log_dir);

    cleanup_old_logs(&log_path, LOG_RETENTION_DAYS);
    Ok(())
}

/// Get the current log directory path
pub fn log_directory() -> Option<String> {
    LOG_DIR.get().map(|p| p.to_string_lossy().to_string())
}

/// Clean up old log files, keeping only the most recent `keep_days` days
fn cleanup_old_logs(log_dir: &Path, keep_days: i64) -> usize {
    use chrono::TimeZone;

    let cutoff = chrono::Local::now() - chrono::Duration::days(keep_days);

    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot read log directory for cleanup: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        // "snp.log.2024-01-15"
        let Some(date_str) = name.strip_prefix(LOG_FILE_PREFIX).and_then(|s| s.strip_prefix('.')) else {
            continue;
        };
        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };
        let Some(file_local) = file_date
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| chrono::Local.from_local_datetime(&dt).single())
        else {
            continue;
        };

        if file_local < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("Deleted old log file: {:?}", path);
                    removed += 1;
                }
                Err(e) => tracing::warn!("Failed to delete old log file {:?}: {}", path, e),
            }
        }
    }
    removed
}

/// Get the version of the bridge library
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("snp-logs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_cleanup_old_logs() {
        let dir = temp_dir();
        let old = (chrono::Local::now() - chrono::Duration::days(30)).format("%Y-%m-%d");
        let today = chrono::Local::now().format("%Y-%m-%d");
        std::fs::write(dir.join(format!("snp.log.{}", old)), "old").unwrap();
        std::fs::write(dir.join(format!("snp.log.{}", today)), "new").unwrap();
        std::fs::write(dir.join("notes.txt"), "keep").unwrap();

        assert_eq!(cleanup_old_logs(&dir, 7), 1);
        assert!(dir.join(format!("snp.log.{}", today)).exists());
        assert!(dir.join("notes.txt").exists());
    }

    #[test]
    fn test_init_logging_twice_is_an_error() {
        let dir = temp_dir();
        init_logging(Some(dir.to_string_lossy().to_string())).unwrap();
        assert_eq!(log_directory(), Some(dir.to_string_lossy().to_string()));
        assert!(matches!(init_logging(None), Err(BridgeError::LoggingInit(_))));
    }

    #[test]
    fn test_version() {
        assert_eq!(version(), env!("CARGO_PKG_VERSION"));
    }
}
