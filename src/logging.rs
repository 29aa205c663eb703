//! File-backed tracing setup so diagnostics never corrupt the TUI.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;

const LOG_DIR: &str = "openclaw-chat";
const LOG_FILE: &str = "openclaw-chat.log";
const LOG_LEVEL_ENV: &str = "OPENCLAW_CHAT_LOG";

/// Location of the client log file under the user state directory.
#[must_use]
pub fn log_file_path() -> PathBuf {
    let base = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir);
    base.join(LOG_DIR).join(LOG_FILE)
}

fn level_from_env() -> Level {
    match std::env::var(LOG_LEVEL_ENV).ok().as_deref() {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("warn") => Level::WARN,
        Some("error") => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize tracing with a plain-text file writer.
///
/// Safe to call more than once; only the first call installs the
/// subscriber. Returns the log file path for user-facing status messages.
///
/// # Errors
///
/// Returns an error if the log directory or file cannot be created.
pub fn init_logging() -> Result<PathBuf> {
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = File::options()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let result = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(level_from_env())
        .with_writer(Mutex::new(file))
        .try_init();
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed; keeping existing one");
    }
    Ok(path)
}
