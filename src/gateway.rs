//! Platform collaborator client: chat services, settings, history, and the
//! event-bus notification listener.
//!
//! The platform fronts the OpenClaw gateway; the client never speaks to the
//! gateway directly. All calls carry bearer-token auth. JSON endpoints that
//! answer with HTML (the platform SPA catches unknown routes) are reported
//! as misconfiguration-grade transport failures rather than parse noise.

use crate::events::ControlEvent;
use crate::speech::SpeechProviderKind;
use crate::timeline::{PendingHandle, StoredMessage};
use crossbeam_channel::Sender;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::Message as WsMessage;

/// Event type fired by the integration when the assistant answers.
pub const MESSAGE_EVENT_TYPE: &str = "openclaw_message_received";

const API_TIMEOUT: Duration = Duration::from_secs(10);
const LISTENER_RECONNECT_DELAY: Duration = Duration::from_secs(3);
const LISTENER_READ_TIMEOUT: Duration = Duration::from_secs(5);
const BODY_SNIPPET_LEN: usize = 200;

/// Failure taxonomy for platform calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure or the backend is unreachable/misconfigured.
    Transport(String),
    /// The backend rejected the action; retrying will not help.
    AuthPolicy(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transport(detail) => write!(f, "{detail}"),
            GatewayError::AuthPolicy(detail) => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoiceProviderSetting {
    #[default]
    ContinuousRecognition,
    OneShotTranscription,
}

impl VoiceProviderSetting {
    #[must_use]
    pub fn provider_kind(self) -> SpeechProviderKind {
        match self {
            VoiceProviderSetting::ContinuousRecognition => SpeechProviderKind::Continuous,
            VoiceProviderSetting::OneShotTranscription => SpeechProviderKind::OneShot,
        }
    }
}

/// Voice configuration owned by the backend; re-read before every voice
/// activation so changes made while idle take effect on the next toggle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatSettings {
    #[serde(default)]
    pub wake_word_enabled: bool,
    #[serde(default = "default_wake_word")]
    pub wake_word: String,
    #[serde(default)]
    pub voice_provider: VoiceProviderSetting,
    #[serde(default)]
    pub allow_unreliable_env: bool,
    #[serde(default)]
    pub voice_language: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            wake_word_enabled: false,
            wake_word: default_wake_word(),
            voice_provider: VoiceProviderSetting::default(),
            allow_unreliable_env: false,
            voice_language: None,
            language: default_language(),
        }
    }
}

fn default_wake_word() -> String {
    "hey openclaw".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

/// Preferred pipeline languages; best-effort, absence degrades gracefully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PipelineLanguages {
    #[serde(default)]
    pub stt_language: Option<String>,
    #[serde(default)]
    pub tts_language: Option<String>,
}

/// Live event-bus notification of an assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundNotification {
    pub message: String,
    pub session_id: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<StoredMessage>,
}

pub struct GatewayClient {
    http: Client,
    base_url: String,
    token: String,
}

impl GatewayClient {
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(base_url: &str, token: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|err| anyhow::anyhow!("failed to build gateway HTTP client: {err}"))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Fire-and-forget send; the reply arrives via notification or
    /// reconciliation, never as a return value.
    ///
    /// # Errors
    ///
    /// Returns the classified failure so the caller can demote the
    /// optimistic placeholder.
    pub fn send_message(&self, message: &str, session_id: &str) -> Result<(), GatewayError> {
        self.post_service(
            "send_message",
            session_id,
            json!({ "message": message, "session_id": session_id }),
        )
        .map(|_| ())
    }

    /// # Errors
    ///
    /// Returns the classified failure.
    pub fn clear_history(&self, session_id: &str) -> Result<(), GatewayError> {
        self.post_service(
            "clear_history",
            session_id,
            json!({ "session_id": session_id }),
        )
        .map(|_| ())
    }

    /// Authoritative conversation history for a session.
    ///
    /// # Errors
    ///
    /// Returns the classified failure.
    pub fn get_history(&self, session_id: &str) -> Result<Vec<StoredMessage>, GatewayError> {
        let value = self.get_json(&format!("/api/openclaw/history/{session_id}"))?;
        let response: HistoryResponse = serde_json::from_value(value)
            .map_err(|err| GatewayError::Transport(format!("malformed history payload: {err}")))?;
        Ok(response.messages)
    }

    /// # Errors
    ///
    /// Returns the classified failure.
    pub fn get_settings(&self) -> Result<ChatSettings, GatewayError> {
        let value = self.get_json("/api/openclaw/settings")?;
        serde_json::from_value(value)
            .map_err(|err| GatewayError::Transport(format!("malformed settings payload: {err}")))
    }

    /// Best-effort pipeline language preferences.
    ///
    /// # Errors
    ///
    /// Returns the classified failure; callers degrade to their own
    /// preferred language.
    pub fn get_preferred_pipeline_languages(&self) -> Result<PipelineLanguages, GatewayError> {
        let value = self.get_json("/api/openclaw/pipeline_languages")?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    fn post_service(
        &self,
        service: &str,
        session_id: &str,
        body: Value,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}/api/services/openclaw/{service}", self.base_url);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header("X-Session-Id", session_id)
            .json(&body)
            .send()
            .map_err(transport_error)?;
        classify_response(response)
    }

    fn get_json(&self, path: &str) -> Result<Value, GatewayError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(transport_error)?;
        classify_response(response)
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport(format!("cannot reach the gateway: {err}"))
}

fn classify_response(response: reqwest::blocking::Response) -> Result<Value, GatewayError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(GatewayError::AuthPolicy(
            "authentication failed — check the access token".to_string(),
        ));
    }
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(GatewayError::Transport(format!(
            "gateway error {status}: {}",
            snippet(&body)
        )));
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.contains("json") {
        // The SPA catch-all answers unknown routes with 200 text/html; a
        // wrong host/port looks exactly like this.
        let body = response.text().unwrap_or_default();
        return Err(GatewayError::Transport(format!(
            "gateway answered with '{content_type}' instead of JSON — the host or port may be \
             wrong: {}",
            snippet(&body)
        )));
    }
    response
        .json()
        .map_err(|err| GatewayError::Transport(format!("invalid JSON from gateway: {err}")))
}

fn snippet(body: &str) -> &str {
    if body.len() <= BODY_SNIPPET_LEN {
        return body;
    }
    let mut end = BODY_SNIPPET_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// [`crate::controller::Outbound`] implementation that runs each platform
/// call on a worker thread and reports outcomes as control events. The
/// event-loop thread never blocks on the network.
pub struct ThreadedGateway {
    client: Arc<GatewayClient>,
    events: Sender<ControlEvent>,
}

impl ThreadedGateway {
    #[must_use]
    pub fn new(client: Arc<GatewayClient>, events: Sender<ControlEvent>) -> Self {
        Self { client, events }
    }
}

impl crate::controller::Outbound for ThreadedGateway {
    fn send_message(
        &self,
        message: String,
        session_id: String,
        user: PendingHandle,
        reply: PendingHandle,
    ) {
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        thread::spawn(move || {
            if let Err(error) = client.send_message(&message, &session_id) {
                tracing::debug!("send_message failed: {error}");
                let _ = events.send(ControlEvent::SendFailed { user, reply, error });
            }
        });
    }

    fn clear_history(&self, session_id: String) {
        let client = Arc::clone(&self.client);
        thread::spawn(move || {
            if let Err(error) = client.clear_history(&session_id) {
                tracing::warn!("clear_history failed: {error}");
            }
        });
    }

    fn fetch_history(&self, session_id: String) {
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        thread::spawn(move || {
            let result = client.get_history(&session_id);
            let _ = events.send(ControlEvent::HistoryFetched { session_id, result });
        });
    }

    fn fetch_settings(&self) {
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        thread::spawn(move || {
            let result = client.get_settings();
            let _ = events.send(ControlEvent::SettingsFetched { result });
        });
    }

    fn fetch_pipeline_languages(&self) {
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        thread::spawn(move || {
            let result = client.get_preferred_pipeline_languages();
            let _ = events.send(ControlEvent::PipelineLanguagesFetched { result });
        });
    }
}

/// Subscribe to the platform event bus and forward assistant-reply events.
/// Reconnects with a fixed delay; delivery is not guaranteed and the history
/// reconciler is the backstop.
pub fn spawn_notification_listener(
    ws_url: String,
    token: String,
    events: Sender<ControlEvent>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            match pump_event_socket(&ws_url, &token, &events, &shutdown) {
                Ok(()) => break,
                Err(err) => {
                    tracing::debug!("event-bus connection lost: {err:#}");
                    thread::sleep(LISTENER_RECONNECT_DELAY);
                }
            }
        }
    })
}

fn pump_event_socket(
    ws_url: &str,
    token: &str,
    events: &Sender<ControlEvent>,
    shutdown: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let (mut socket, _) = tungstenite::connect(ws_url)?;
    if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
        stream.set_read_timeout(Some(LISTENER_READ_TIMEOUT))?;
    }

    socket.send(WsMessage::Text(
        json!({ "type": "auth", "access_token": token }).to_string(),
    ))?;
    socket.send(WsMessage::Text(
        json!({ "id": 1, "type": "subscribe_events", "event_type": MESSAGE_EVENT_TYPE })
            .to_string(),
    ))?;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }
        let message = match socket.read() {
            Ok(message) => message,
            Err(tungstenite::Error::Io(err))
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        let WsMessage::Text(raw) = message else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        match value.get("type").and_then(Value::as_str) {
            Some("auth_invalid") => {
                anyhow::bail!("event-bus authentication rejected");
            }
            Some("event") => {
                if let Some(notification) = parse_notification(&value) {
                    if events
                        .send(ControlEvent::Notification(notification))
                        .is_err()
                    {
                        // Receiver gone: the client is shutting down.
                        return Ok(());
                    }
                }
            }
            _ => {}
        }
    }
}

/// Extract a notification from an event-bus frame; unknown shapes are
/// ignored rather than treated as errors.
fn parse_notification(value: &Value) -> Option<InboundNotification> {
    let event = value.get("event")?;
    if event.get("event_type").and_then(Value::as_str) != Some(MESSAGE_EVENT_TYPE) {
        return None;
    }
    let data = event.get("data")?;
    let message = data.get("message")?.as_str()?.to_string();
    let session_id = data
        .get("session_id")
        .and_then(Value::as_str)
        .unwrap_or("default")
        .to_string();
    let timestamp = data
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(InboundNotification {
        message,
        session_id,
        timestamp,
    })
}
