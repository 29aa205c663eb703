//! Speech-capture subsystem: one event vocabulary over two capture providers.
//!
//! Both providers ultimately yield finalized text. The continuous provider
//! streams recognition results and restarts itself between utterances; the
//! one-shot provider records a bounded buffer and performs exactly one
//! transcription attempt. The controller only ever sees [`SpeechEvent`]s.

pub mod continuous;
pub mod oneshot;

use crate::audio::negotiate::{fallback_format, negotiate, NegotiatedFormat};
use crate::events::ControlEvent;
use crate::transcribe::TranscriptionClient;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const CAPTURE_JOIN_POLL_MS: u64 = 5;
const CAPTURE_JOIN_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechProviderKind {
    /// Streaming recognition engine emitting interim and final results.
    Continuous,
    /// Bounded capture followed by a single server-side transcription.
    OneShot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// One activation per user action.
    Manual,
    /// Re-arm after each utterance until explicitly stopped.
    Continuous,
}

/// Error taxonomy surfaced to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechErrorClass {
    /// Engine unavailable in this environment.
    Unsupported,
    PermissionDenied,
    NoInputDevice,
    TransientNetwork,
    /// No speech detected. Not an error state; must not suppress retries.
    Silence,
    /// Explicit stop. Never surfaced to the user.
    Aborted,
}

impl SpeechErrorClass {
    /// Only network-class failures are worth automatic reconnection.
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        matches!(self, SpeechErrorClass::TransientNetwork)
    }

    /// Compact label used in logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            SpeechErrorClass::Unsupported => "unsupported",
            SpeechErrorClass::PermissionDenied => "permission-denied",
            SpeechErrorClass::NoInputDevice => "no-input-device",
            SpeechErrorClass::TransientNetwork => "transient-network",
            SpeechErrorClass::Silence => "silence",
            SpeechErrorClass::Aborted => "aborted",
        }
    }

    /// Human-readable status text shown at the component boundary.
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            SpeechErrorClass::Unsupported => {
                "Speech recognition is not available in this environment."
            }
            SpeechErrorClass::PermissionDenied => "Microphone access was denied.",
            SpeechErrorClass::NoInputDevice => "No microphone was found.",
            SpeechErrorClass::TransientNetwork => "Speech service connection lost.",
            SpeechErrorClass::Silence => "No speech detected.",
            SpeechErrorClass::Aborted => "Voice input stopped.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Microphone acquired and capture is active.
    Listening,
    /// Finalized recognition result. Interim results never surface.
    Final(String),
    /// Capture finished without a failure (stop, natural end, or completed
    /// one-shot attempt).
    Ended,
    Failed(SpeechErrorClass),
}

/// Ephemeral description of one active speech-capture attempt.
#[derive(Debug, Clone)]
pub struct VoiceSession {
    pub provider: SpeechProviderKind,
    pub mode: CaptureMode,
    /// Only meaningful when `mode` is continuous.
    pub wake_word_required: bool,
    pub wake_word: String,
    pub language: String,
    pub last_error_class: Option<SpeechErrorClass>,
}

/// Owner of one running capture thread.
///
/// Stopping raises the shared flag and joins briefly so the microphone is
/// released before any new capture attempt starts.
#[derive(Debug)]
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub(crate) fn new(stop: Arc<AtomicBool>, handle: JoinHandle<()>) -> Self {
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Request an explicit stop and wait briefly for the worker to release
    /// the microphone. A worker stuck in blocking I/O is detached rather
    /// than blocking the event loop.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let Some(handle) = self.handle.take() else {
            return;
        };
        let deadline = Instant::now() + Duration::from_millis(CAPTURE_JOIN_TIMEOUT_MS);
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(CAPTURE_JOIN_POLL_MS));
        }
        if handle.is_finished() {
            if let Err(err) = handle.join() {
                tracing::debug!("capture thread panicked during shutdown: {err:?}");
            }
        } else {
            tracing::debug!("capture thread did not exit in time; detaching");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Concrete capture backend wiring both providers to the event channel.
pub struct SpeechSystem {
    events: Sender<ControlEvent>,
    transcription: Arc<TranscriptionClient>,
    /// Negotiated once per session, shared with one-shot workers.
    negotiated: Arc<Mutex<Option<NegotiatedFormat>>>,
    recognition_ws_url: Option<String>,
    input_device: Option<String>,
    one_shot_cap: Duration,
    active: Option<CaptureHandle>,
}

impl SpeechSystem {
    #[must_use]
    pub fn new(
        events: Sender<ControlEvent>,
        transcription: TranscriptionClient,
        recognition_ws_url: Option<String>,
        input_device: Option<String>,
        one_shot_cap: Duration,
    ) -> Self {
        Self {
            events,
            transcription: Arc::new(transcription),
            negotiated: Arc::new(Mutex::new(None)),
            recognition_ws_url,
            input_device,
            one_shot_cap,
            active: None,
        }
    }

    fn stop_active(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.stop();
        }
    }
}

impl crate::controller::CaptureBackend for SpeechSystem {
    fn supports(&self, provider: SpeechProviderKind) -> bool {
        match provider {
            SpeechProviderKind::Continuous => self.recognition_ws_url.is_some(),
            SpeechProviderKind::OneShot => true,
        }
    }

    fn start(&mut self, provider: SpeechProviderKind, mode: CaptureMode, language: &str) {
        // The microphone is system-exclusive: release any previous capture
        // before the new attempt, including automatic restarts.
        self.stop_active();
        let handle = match provider {
            SpeechProviderKind::Continuous => {
                let Some(ws_url) = self.recognition_ws_url.clone() else {
                    let _ = self.events.send(ControlEvent::Speech(SpeechEvent::Failed(
                        SpeechErrorClass::Unsupported,
                    )));
                    return;
                };
                let engine = continuous::SocketRecognitionEngine::new(
                    ws_url,
                    language.to_string(),
                    self.input_device.clone(),
                );
                continuous::spawn_continuous(Box::new(engine), mode, self.events.clone())
            }
            SpeechProviderKind::OneShot => oneshot::spawn_one_shot(
                oneshot::OneShotConfig {
                    cap: self.one_shot_cap,
                    input_device: self.input_device.clone(),
                    language: language.to_string(),
                },
                Arc::clone(&self.transcription),
                Arc::clone(&self.negotiated),
                self.events.clone(),
            ),
        };
        self.active = Some(handle);
    }

    fn stop(&mut self) {
        self.stop_active();
    }
}

/// Resolve the negotiated upload format, querying capabilities at most once
/// per session. A failed or unreachable capability service must not block
/// capture: fall back to defaults and proceed.
pub(crate) fn resolve_negotiated_format(
    cache: &Mutex<Option<NegotiatedFormat>>,
    client: &TranscriptionClient,
    preferred_language: &str,
) -> NegotiatedFormat {
    let mut slot = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(format) = slot.as_ref() {
        return format.clone();
    }
    let format = match client.capabilities() {
        Ok(caps) => negotiate(&caps, preferred_language),
        Err(err) => {
            tracing::debug!("capability negotiation failed, using defaults: {err:#}");
            fallback_format(preferred_language)
        }
    };
    *slot = Some(format.clone());
    format
}
