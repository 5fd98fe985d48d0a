//! Tracing setup: stderr by default, or append to a log file.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,ytflow=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Appends to `path`, creating parent directories as needed.
/// Returns the error so the caller can fall back to stderr.
pub fn init_file_logging(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    tracing::info!("ytflow logging to {}", path.display());
    Ok(())
}

pub fn init_stderr_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .try_init();
}

pub fn init_logging(log_file: Option<&Path>) {
    match log_file {
        Some(path) => {
            if let Err(err) = init_file_logging(path) {
                init_stderr_logging();
                tracing::warn!(error = %err, "cannot log to {}, using stderr", path.display());
            }
        }
        None => init_stderr_logging(),
    }
}
