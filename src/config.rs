//! Client configuration assembly so CLI flags, env vars, and the config file resolve consistently.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_SESSION_ID: &str = "default";
pub const DEFAULT_BASE_URL: &str = "http://homeassistant.local:8123";
pub const DEFAULT_STT_ENGINE: &str = "stt.cloud";
pub const DEFAULT_LANGUAGE: &str = "en-US";
/// Hard cap on a one-shot capture. Tunable, not a semantic guarantee.
pub const DEFAULT_ONE_SHOT_CAP_MS: u64 = 7_000;
/// How long a dispatched message may await its reply before timing out.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 60_000;

const CONFIG_DIR: &str = "openclaw-chat";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Parser)]
#[command(name = "openclaw-chat", about = "Voice-enabled chat client for the OpenClaw gateway", author, version)]
pub struct AppConfig {
    /// Platform base URL the gateway integration is reachable on
    #[arg(long = "base-url", env = "OPENCLAW_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Long-lived access token for the platform API
    #[arg(long = "token", env = "OPENCLAW_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,

    /// Conversation session identifier
    #[arg(long = "session", default_value = DEFAULT_SESSION_ID)]
    pub session_id: String,

    /// Event-bus WebSocket URL (derived from the base URL when unset)
    #[arg(long = "ws-url", env = "OPENCLAW_WS_URL")]
    pub ws_url: Option<String>,

    /// Streaming-recognition WebSocket URL; continuous voice is unavailable when unset
    #[arg(long = "recognition-ws-url", env = "OPENCLAW_RECOGNITION_WS_URL")]
    pub recognition_ws_url: Option<String>,

    /// Transcription engine identifier used for one-shot captures
    #[arg(long = "stt-engine", default_value = DEFAULT_STT_ENGINE)]
    pub stt_engine: String,

    /// Input device name override (system default when unset)
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Preferred recognition language (backend settings override this when present)
    #[arg(long = "language", default_value = DEFAULT_LANGUAGE)]
    pub language: String,

    /// Hard cap on one-shot capture duration (ms)
    #[arg(long = "one-shot-cap-ms", default_value_t = DEFAULT_ONE_SHOT_CAP_MS)]
    pub one_shot_cap_ms: u64,

    /// Pending-reply timeout before a placeholder is marked failed (ms)
    #[arg(long = "response-timeout-ms", default_value_t = DEFAULT_RESPONSE_TIMEOUT_MS)]
    pub response_timeout_ms: u64,

    /// Keep retrying speech capture even in environments with known-flaky audio backends
    #[arg(long = "allow-unreliable-env", default_value_t = false)]
    pub allow_unreliable_env: bool,

    /// Config file path (default: <config dir>/openclaw-chat/config.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,
}

/// Subset of settings that may live in the config file. The file only fills
/// values the command line left at their built-in defaults; flags and env
/// vars always win.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub ws_url: Option<String>,
    pub recognition_ws_url: Option<String>,
    pub stt_engine: Option<String>,
    pub language: Option<String>,
}

impl AppConfig {
    /// Merge the optional config file into this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when an explicitly passed `--config` file is missing
    /// or malformed. The default-path file is best-effort: absent is fine,
    /// malformed is an error (silently ignoring a broken file hides typos).
    pub fn resolve(mut self) -> Result<Self> {
        let (path, required) = match self.config_file.clone() {
            Some(path) => (path, true),
            None => (default_config_path(), false),
        };
        let file = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str::<FileConfig>(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?,
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
                FileConfig::default()
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config file {}", path.display()))
            }
        };
        self.apply_file(file);
        Ok(self)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if self.token.is_empty() {
            if let Some(token) = file.token {
                self.token = token;
            }
        }
        if self.base_url == DEFAULT_BASE_URL {
            if let Some(base_url) = file.base_url {
                self.base_url = base_url;
            }
        }
        if self.stt_engine == DEFAULT_STT_ENGINE {
            if let Some(engine) = file.stt_engine {
                self.stt_engine = engine;
            }
        }
        if self.language == DEFAULT_LANGUAGE {
            if let Some(language) = file.language {
                self.language = language;
            }
        }
        if self.ws_url.is_none() {
            self.ws_url = file.ws_url;
        }
        if self.recognition_ws_url.is_none() {
            self.recognition_ws_url = file.recognition_ws_url;
        }
    }

    /// Event-bus WebSocket URL, derived from the base URL when not set.
    #[must_use]
    pub fn event_bus_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{base}")
        };
        format!("{ws_base}/api/websocket")
    }
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
    base.join(CONFIG_DIR).join(CONFIG_FILE)
}
