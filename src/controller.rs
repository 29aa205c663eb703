//! Widget controller: the single-threaded state machine over timeline,
//! voice capture, and the platform collaborators.
//!
//! All mutable state lives here and is touched only from the event-loop
//! thread. Collaborators are fire-and-forget seams whose outcomes come back
//! as [`ControlEvent`]s; the controller observes state, never exceptions.

use crate::backoff::{
    BlockReason, ResponseTimeout, RetryDecision, RetryPolicy, RetrySupervisor,
};
use crate::envprobe::EnvironmentTag;
use crate::events::ControlEvent;
use crate::gateway::{ChatSettings, GatewayError, PipelineLanguages};
use crate::history::{should_replace, HistoryReconciler};
use crate::speech::{
    CaptureMode, SpeechErrorClass, SpeechEvent, SpeechProviderKind, VoiceSession,
};
use crate::store::TimelineStore;
use crate::timeline::{Message, PendingHandle, Role, Timeline};
use crate::wake::{match_wake, WakeOutcome};
use std::time::{Duration, Instant};

/// Outbound collaborator seam. Calls are fire-and-forget; outcomes arrive
/// as control events.
pub trait Outbound {
    fn send_message(
        &self,
        message: String,
        session_id: String,
        user: PendingHandle,
        reply: PendingHandle,
    );
    fn clear_history(&self, session_id: String);
    fn fetch_history(&self, session_id: String);
    fn fetch_settings(&self);
    fn fetch_pipeline_languages(&self);
}

/// Speech-capture seam. Start failures surface as speech events, not
/// return values.
pub trait CaptureBackend {
    fn supports(&self, provider: SpeechProviderKind) -> bool;
    fn start(&mut self, provider: SpeechProviderKind, mode: CaptureMode, language: &str);
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    AwaitingVoicePermission,
    Listening,
    Sending,
    ErrorDisplay,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub session_id: String,
    pub language: String,
    pub response_timeout: Duration,
    pub allow_unreliable_env: bool,
    pub environment: EnvironmentTag,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            session_id: crate::config::DEFAULT_SESSION_ID.to_string(),
            language: crate::config::DEFAULT_LANGUAGE.to_string(),
            response_timeout: Duration::from_millis(crate::config::DEFAULT_RESPONSE_TIMEOUT_MS),
            allow_unreliable_env: false,
            environment: EnvironmentTag::Standard,
        }
    }
}

/// One active voice attempt plus its supervision state.
#[derive(Debug)]
struct ActiveVoice {
    session: VoiceSession,
    supervisor: RetrySupervisor,
    /// Raised by the user's toggle; distinguishes "ended because we asked"
    /// from every other way capture can end.
    stop_requested: bool,
    /// A failure-scheduled restart is waiting on its backoff delay.
    awaiting_restart: bool,
}

pub struct ChatController<O: Outbound, C: CaptureBackend> {
    outbound: O,
    capture: C,
    config: ControllerConfig,
    state: ControllerState,
    timeline: Timeline,
    store: Option<TimelineStore>,
    reconciler: HistoryReconciler,
    response_timeout: ResponseTimeout,
    voice: Option<ActiveVoice>,
    awaiting_voice_settings: bool,
    settings: ChatSettings,
    pipeline_languages: PipelineLanguages,
    status: Option<String>,
}

impl<O: Outbound, C: CaptureBackend> ChatController<O, C> {
    pub fn new(outbound: O, capture: C, config: ControllerConfig, store: Option<TimelineStore>) -> Self {
        let response_timeout = ResponseTimeout::new(config.response_timeout);
        Self {
            outbound,
            capture,
            config,
            state: ControllerState::Idle,
            timeline: Timeline::new(),
            store,
            reconciler: HistoryReconciler::new(),
            response_timeout,
            voice: None,
            awaiting_voice_settings: false,
            settings: ChatSettings::default(),
            pipeline_languages: PipelineLanguages::default(),
            status: None,
        }
    }

    /// Load the advisory cache and reconcile against the backend.
    pub fn on_mount(&mut self) {
        if let Some(store) = &self.store {
            self.timeline.load_cache(store.load(&self.config.session_id));
        }
        self.reconciler.request(&self.outbound, &self.config.session_id);
        self.outbound.fetch_pipeline_languages();
    }

    /// Send user text. Empty or whitespace-only input is rejected without
    /// side effects.
    pub fn send_text(&mut self, text: &str, now: Instant) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.status = None;
        let user = self.timeline.append_pending(Role::User, trimmed.to_string());
        let reply = self.timeline.append_awaited_reply();
        self.response_timeout.sync(self.timeline.pending_replies(), now);
        self.outbound.send_message(
            trimmed.to_string(),
            self.config.session_id.clone(),
            user,
            reply,
        );
        // Safety net for missed live notifications.
        self.reconciler.request(&self.outbound, &self.config.session_id);
        if !self.voice_capture_active() {
            self.state = ControllerState::Sending;
        }
        self.persist();
    }

    /// Flip voice input. Activation re-reads the backend's voice settings
    /// first, so a config change made while idle applies immediately.
    pub fn toggle_voice_mode(&mut self) {
        if self.voice.is_some() {
            self.stop_voice();
            return;
        }
        if self.awaiting_voice_settings {
            return;
        }
        self.status = None;
        self.awaiting_voice_settings = true;
        self.outbound.fetch_settings();
    }

    /// Destroy the active session's history: timeline, cache, and backend.
    /// Irreversible, and scoped to the active session only.
    pub fn clear_session(&mut self, now: Instant) {
        self.timeline.clear();
        self.response_timeout.sync(0, now);
        if let Some(store) = &self.store {
            store.clear(&self.config.session_id);
        }
        self.outbound.clear_history(self.config.session_id.clone());
        self.status = None;
        self.state = if self.voice_capture_active() {
            ControllerState::Listening
        } else {
            ControllerState::Idle
        };
    }

    pub fn handle_event(&mut self, event: ControlEvent, now: Instant) {
        match event {
            ControlEvent::Notification(notification) => {
                // Foreign sessions must never mutate this timeline.
                if notification.session_id != self.config.session_id {
                    return;
                }
                let outcome = self.timeline.accept_notification(
                    &notification.message,
                    notification.timestamp.as_deref(),
                );
                if outcome == crate::timeline::NotificationOutcome::Duplicate {
                    return;
                }
                self.response_timeout.sync(self.timeline.pending_replies(), now);
                self.settle_state();
                self.persist();
            }
            ControlEvent::SendFailed { user, reply, error } => {
                self.timeline.fail_pending(user, None);
                self.timeline
                    .fail_pending(reply, Some(&format!("Message failed: {error}")));
                self.response_timeout.sync(self.timeline.pending_replies(), now);
                if let GatewayError::AuthPolicy(detail) = &error {
                    self.status = Some(detail.clone());
                }
                if !self.voice_capture_active() {
                    self.state = ControllerState::ErrorDisplay;
                }
                self.persist();
            }
            ControlEvent::HistoryFetched { session_id, result } => {
                if session_id != self.config.session_id {
                    return;
                }
                if let Some(fetched) = self.reconciler.on_result(result, now) {
                    if should_replace(self.timeline.messages(), &fetched) {
                        self.timeline.replace_all(fetched);
                        self.response_timeout.sync(self.timeline.pending_replies(), now);
                        self.settle_state();
                        self.persist();
                    }
                }
            }
            ControlEvent::SettingsFetched { result } => {
                let activating = self.awaiting_voice_settings;
                self.awaiting_voice_settings = false;
                match result {
                    Ok(settings) => {
                        self.settings = settings;
                        if activating {
                            self.start_voice();
                        }
                    }
                    Err(error) => {
                        tracing::debug!("settings fetch failed: {error}");
                        if activating {
                            self.status = Some(format!("Voice unavailable: {error}"));
                            self.state = ControllerState::ErrorDisplay;
                        }
                    }
                }
            }
            ControlEvent::PipelineLanguagesFetched { result } => match result {
                Ok(languages) => self.pipeline_languages = languages,
                // Best-effort: absence degrades to configured preferences.
                Err(error) => tracing::debug!("pipeline language fetch failed: {error}"),
            },
            ControlEvent::Speech(event) => self.handle_speech_event(event, now),
        }
    }

    /// Drive time-based work: the shared reply timeout, scheduled capture
    /// restarts, and history refetches.
    pub fn on_tick(&mut self, now: Instant) {
        if self.response_timeout.expired(now) {
            // Each expiry accounts for exactly one placeholder.
            self.timeline.timeout_oldest_pending();
            self.response_timeout
                .rearm_after_expiry(self.timeline.pending_replies(), now);
            self.settle_state();
            self.persist();
        }

        let restart = match &mut self.voice {
            Some(voice)
                if voice.awaiting_restart
                    && !voice.stop_requested
                    && voice.supervisor.restart_due(now) =>
            {
                voice.awaiting_restart = false;
                Some((
                    voice.session.provider,
                    voice.session.mode,
                    voice.session.language.clone(),
                ))
            }
            _ => None,
        };
        if let Some((provider, mode, language)) = restart {
            self.capture.start(provider, mode, &language);
        }

        self.reconciler
            .on_tick(now, &self.outbound, &self.config.session_id);
    }

    fn start_voice(&mut self) {
        let provider = self.settings.voice_provider.provider_kind();
        if !self.capture.supports(provider) {
            // Capability errors surface once and are not retried.
            self.status = Some(SpeechErrorClass::Unsupported.user_message().to_string());
            self.state = ControllerState::ErrorDisplay;
            return;
        }
        let mode = if self.settings.wake_word_enabled {
            CaptureMode::Continuous
        } else {
            CaptureMode::Manual
        };
        let language = self
            .settings
            .voice_language
            .clone()
            .or_else(|| self.pipeline_languages.stt_language.clone())
            .unwrap_or_else(|| self.config.language.clone());
        let allow_unreliable_env =
            self.settings.allow_unreliable_env || self.config.allow_unreliable_env;
        let session = VoiceSession {
            provider,
            mode,
            wake_word_required: self.settings.wake_word_enabled,
            wake_word: self.settings.wake_word.clone(),
            language: language.clone(),
            last_error_class: None,
        };
        self.voice = Some(ActiveVoice {
            session,
            supervisor: RetrySupervisor::new(
                RetryPolicy::default(),
                self.config.environment,
                allow_unreliable_env,
            ),
            stop_requested: false,
            awaiting_restart: false,
        });
        self.capture.start(provider, mode, &language);
        self.state = ControllerState::AwaitingVoicePermission;
    }

    /// Explicit stop: suppresses auto-restart and the synthetic aborted
    /// signal, and resets the retry budget for the next activation.
    fn stop_voice(&mut self) {
        if let Some(voice) = &mut self.voice {
            voice.stop_requested = true;
        }
        self.capture.stop();
        self.voice = None;
        self.status = None;
        self.settle_idle_or_sending();
    }

    fn handle_speech_event(&mut self, event: SpeechEvent, now: Instant) {
        enum FinalAction {
            Send(String),
            AwaitCommand,
            Ignore,
        }

        let Some(voice) = &mut self.voice else {
            // Events from a capture we already tore down, including the
            // synthetic aborted signal: never surfaced.
            return;
        };
        match event {
            SpeechEvent::Listening => {
                self.state = ControllerState::Listening;
            }
            SpeechEvent::Final(text) => {
                voice.supervisor.on_success();
                voice.session.last_error_class = None;
                let action = if voice.session.mode == CaptureMode::Continuous
                    && voice.session.wake_word_required
                {
                    match match_wake(&text, &voice.session.wake_word) {
                        WakeOutcome::Command(command) => FinalAction::Send(command),
                        WakeOutcome::AwaitingCommand => FinalAction::AwaitCommand,
                        WakeOutcome::NotDetected => FinalAction::Ignore,
                    }
                } else {
                    FinalAction::Send(text)
                };
                match action {
                    FinalAction::Send(command) => self.send_text(&command, now),
                    FinalAction::AwaitCommand => {
                        self.status =
                            Some("Wake word detected — awaiting command.".to_string());
                    }
                    FinalAction::Ignore => {}
                }
            }
            SpeechEvent::Failed(class) => {
                match class {
                    SpeechErrorClass::Aborted => {}
                    SpeechErrorClass::Silence => {
                        // Not an error state; no retry accounting.
                        self.status = Some(class.user_message().to_string());
                    }
                    SpeechErrorClass::TransientNetwork => {
                        voice.session.last_error_class = Some(class);
                        match voice.supervisor.on_recoverable_error(class, now) {
                            RetryDecision::RetryAt(_) => {
                                voice.awaiting_restart = true;
                                self.status = Some(format!(
                                    "{} Reconnecting…",
                                    class.user_message()
                                ));
                            }
                            RetryDecision::Blocked(reason) => {
                                voice.awaiting_restart = false;
                                self.status = Some(reason.user_message().to_string());
                                self.state = ControllerState::ErrorDisplay;
                            }
                        }
                    }
                    SpeechErrorClass::Unsupported
                    | SpeechErrorClass::PermissionDenied
                    | SpeechErrorClass::NoInputDevice => {
                        // Capability errors: surfaced once, no retry.
                        self.status = Some(class.user_message().to_string());
                        self.voice = None;
                        self.capture.stop();
                        self.state = ControllerState::ErrorDisplay;
                    }
                }
            }
            SpeechEvent::Ended => {
                if voice.stop_requested || voice.supervisor.blocked().is_some() {
                    return;
                }
                if voice.awaiting_restart {
                    // A backoff-scheduled restart owns the next attempt.
                    return;
                }
                if voice.session.mode == CaptureMode::Continuous {
                    // One-shot activations are not restartable; re-arming in
                    // continuous mode means a fresh activation.
                    let provider = voice.session.provider;
                    let mode = voice.session.mode;
                    let language = voice.session.language.clone();
                    self.capture.start(provider, mode, &language);
                } else {
                    self.voice = None;
                    self.settle_idle_or_sending();
                }
            }
        }
    }

    fn settle_idle_or_sending(&mut self) {
        self.state = if self.timeline.pending_replies() > 0 {
            ControllerState::Sending
        } else {
            ControllerState::Idle
        };
    }

    fn settle_state(&mut self) {
        match self.state {
            // Voice and error displays persist until the next user action.
            ControllerState::Listening
            | ControllerState::AwaitingVoicePermission
            | ControllerState::ErrorDisplay => {}
            ControllerState::Idle | ControllerState::Sending => self.settle_idle_or_sending(),
        }
    }

    fn voice_capture_active(&self) -> bool {
        self.voice
            .as_ref()
            .is_some_and(|voice| !voice.stop_requested)
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save(&self.config.session_id, &self.timeline.confirmed_messages())
            {
                tracing::debug!("session cache write failed: {err:#}");
            }
        }
    }

    // Read-only projections for the render layer.

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.timeline.messages()
    }

    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.timeline.pending_replies()
    }

    #[must_use]
    pub fn status_line(&self) -> Option<&str> {
        self.status.as_deref()
    }

    #[must_use]
    pub fn voice_active(&self) -> bool {
        self.voice.is_some()
    }

    #[must_use]
    pub fn voice_blocked(&self) -> Option<BlockReason> {
        self.voice.as_ref().and_then(|voice| voice.supervisor.blocked())
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    #[must_use]
    pub fn wake_word_required(&self) -> bool {
        self.voice
            .as_ref()
            .is_some_and(|voice| voice.session.wake_word_required)
    }
}
