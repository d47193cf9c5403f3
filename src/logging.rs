// src/logging.rs
//
// Log output: `HH:MM:SS.mmm` local timestamps on stderr, optionally teed to
// a timestamped file with a `serial-bridge.log` symlink to the latest run.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use crate::settings::LogConfig;

const LOG_NAME: &str = "serial-bridge";

/// Local wall-clock time with milliseconds.
struct LocalClock;

impl FormatTime for LocalClock {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter used when RUST_LOG is not set.
pub fn default_directive(config: &LogConfig) -> String {
    match config.verbosity {
        0 => config.level.clone().unwrap_or_else(|| "info".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// `YYYYMMDD-HHMMSS-serial-bridge.log` for the current local time.
pub fn log_file_name() -> String {
    chrono::Local::now()
        .format(&format!("%Y%m%d-%H%M%S-{}.log", LOG_NAME))
        .to_string()
}

/// Create the log directory and a fresh log file, and point the
/// `serial-bridge.log` symlink at it (Unix only).
pub fn open_log_file(dir: &Path) -> Result<(File, PathBuf), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = log_file_name();
    let log_path = dir.join(&filename);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let symlink_path = dir.join(format!("{}.log", LOG_NAME));
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} Failed to create {}.log symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                LOG_NAME,
                e
            );
        }
    }

    Ok((file, log_path))
}

/// Install the global subscriber. Returns the log file path when file
/// logging is enabled.
pub fn init(config: &LogConfig) -> Result<Option<PathBuf>, String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    let (writer, log_path) = match &config.dir {
        Some(dir) => {
            let (file, path) = open_log_file(dir)?;
            let writer = BoxMakeWriter::new(std::io::stderr.and(Arc::new(file)));
            (writer, Some(path))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalClock)
        .with_target(false)
        .with_ansi(log_path.is_none())
        .with_writer(writer)
        .try_init()
        .map_err(|e| format!("Failed to install logger: {}", e))?;

    if let Some(path) = &log_path {
        tracing::info!("File logging started: {}", path.display());
    }
    Ok(log_path)
}
