//! Per-session timeline cache so a conversation survives client restarts
//! between reconciliations.
//!
//! The cache is advisory only: the backend stays authoritative and is
//! reconciled on mount. A file that fails to parse is discarded wholesale
//! and treated as empty history, never partially salvaged.

use crate::timeline::StoredMessage;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Most recent confirmed entries retained per session.
pub const CACHE_CAP: usize = 100;

const STORE_DIR: &str = "openclaw-chat";
const SESSIONS_DIR: &str = "sessions";

#[derive(Debug, Clone)]
pub struct TimelineStore {
    dir: PathBuf,
}

impl TimelineStore {
    /// Store rooted at the user state directory.
    #[must_use]
    pub fn open_default() -> Self {
        let base = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(std::env::temp_dir);
        Self::with_dir(base.join(STORE_DIR).join(SESSIONS_DIR))
    }

    #[must_use]
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        // Session ids come from user config; sanitize before touching the fs.
        let safe: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    /// Load the cached timeline for a session. Absent or corrupted caches
    /// load as empty history.
    #[must_use]
    pub fn load(&self, session_id: &str) -> Vec<StoredMessage> {
        let path = self.path_for(session_id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<Vec<StoredMessage>>(&raw) {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(
                    "discarding corrupted session cache {}: {err}",
                    path.display()
                );
                Vec::new()
            }
        }
    }

    /// Persist the confirmed timeline, keeping only the most recent entries.
    ///
    /// # Errors
    ///
    /// Returns an error when the cache directory or file cannot be written.
    pub fn save(&self, session_id: &str, messages: &[StoredMessage]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache directory {}", self.dir.display()))?;
        let recent = if messages.len() > CACHE_CAP {
            &messages[messages.len() - CACHE_CAP..]
        } else {
            messages
        };
        let raw = serde_json::to_string(recent).context("failed to encode session cache")?;
        let path = self.path_for(session_id);
        std::fs::write(&path, raw)
            .with_context(|| format!("failed to write session cache {}", path.display()))
    }

    /// Remove the cached timeline for a session. Best-effort.
    pub fn clear(&self, session_id: &str) {
        let path = self.path_for(session_id);
        if let Err(err) = std::fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("failed to remove session cache {}: {err}", path.display());
            }
        }
    }
}
