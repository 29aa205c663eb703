//! Continuous recognition: restart policy, explicit-stop tracking, and the
//! streaming-socket engine.
//!
//! The adapter owns the lifecycle state machine (listening → recognized,
//! listening → error, listening → stopped); the engine only knows how to run
//! a single utterance. An explicit stop is tracked on a dedicated flag so
//! "ended because of error" and "ended because we asked" stay distinguishable,
//! which is what keeps the no-restart-after-stop invariant testable.

use crate::audio::capture::Recorder;
use crate::audio::encode::f32_to_pcm16_bytes;
use crate::events::ControlEvent;
use crate::speech::{CaptureHandle, CaptureMode, SpeechErrorClass, SpeechEvent};
use crossbeam_channel::Sender;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SOCKET_IDLE_SLEEP: Duration = Duration::from_millis(10);
const FRAME_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Microphone and recognition stream are open.
    Started,
    /// Partial hypothesis; dropped by the adapter.
    Interim(String),
    /// Finalized utterance text.
    Final(String),
}

/// One utterance of a streaming recognition engine.
///
/// Implementations must release the microphone before returning on every
/// path, so automatic restarts never race the previous capture for the
/// device.
pub trait RecognitionEngine: Send {
    /// Stream one utterance, emitting events until natural end of
    /// utterance, an error, or the stop flag is raised.
    ///
    /// # Errors
    ///
    /// Returns the classified failure; the adapter decides whether it is
    /// surfaced or suppressed.
    fn run_utterance(
        &mut self,
        emit: &mut dyn FnMut(EngineEvent),
        stop: &AtomicBool,
    ) -> Result<(), SpeechErrorClass>;
}

/// Spawn the continuous-capture adapter thread.
///
/// In continuous mode the engine is restarted after each natural end of
/// utterance until an explicit stop or an error. Only final results are
/// forwarded.
pub fn spawn_continuous(
    mut engine: Box<dyn RecognitionEngine>,
    mode: CaptureMode,
    events: Sender<ControlEvent>,
) -> CaptureHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        let send = |event: SpeechEvent| {
            let _ = events.send(ControlEvent::Speech(event));
        };
        let mut announced = false;
        loop {
            let mut got_final = false;
            let result = engine.run_utterance(
                &mut |event| match event {
                    EngineEvent::Started => {
                        if !announced {
                            announced = true;
                            send(SpeechEvent::Listening);
                        }
                    }
                    EngineEvent::Interim(_) => {}
                    EngineEvent::Final(text) => {
                        let text = text.trim();
                        if !text.is_empty() {
                            got_final = true;
                            send(SpeechEvent::Final(text.to_string()));
                        }
                    }
                },
                &thread_stop,
            );
            // An explicit stop wins over whatever the engine reported: no
            // error surfaces and no restart happens.
            if thread_stop.load(Ordering::Relaxed) {
                break;
            }
            match result {
                Err(class) => {
                    send(SpeechEvent::Failed(class));
                    return;
                }
                Ok(()) => {
                    if mode == CaptureMode::Continuous {
                        continue;
                    }
                    if !got_final {
                        send(SpeechEvent::Failed(SpeechErrorClass::Silence));
                    }
                    break;
                }
            }
        }
        send(SpeechEvent::Ended);
    });
    CaptureHandle::new(stop, handle)
}

/// Streaming recognition over the platform's assist WebSocket: microphone
/// frames out, transcript events in.
pub struct SocketRecognitionEngine {
    ws_url: String,
    language: String,
    input_device: Option<String>,
}

impl SocketRecognitionEngine {
    #[must_use]
    pub fn new(ws_url: String, language: String, input_device: Option<String>) -> Self {
        Self {
            ws_url,
            language,
            input_device,
        }
    }
}

impl RecognitionEngine for SocketRecognitionEngine {
    fn run_utterance(
        &mut self,
        emit: &mut dyn FnMut(EngineEvent),
        stop: &AtomicBool,
    ) -> Result<(), SpeechErrorClass> {
        let recorder = Recorder::new(self.input_device.as_deref()).map_err(|err| {
            tracing::debug!("recognition capture unavailable: {err:#}");
            SpeechErrorClass::NoInputDevice
        })?;
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        // Guard scope covers the whole socket exchange; the microphone is
        // released on every return path below.
        let guard = recorder.open_stream(frame_tx).map_err(|err| {
            tracing::debug!("recognition capture stream rejected: {err:#}");
            SpeechErrorClass::PermissionDenied
        })?;

        let (mut socket, _) = tungstenite::connect(self.ws_url.as_str()).map_err(|err| {
            tracing::debug!("recognition socket connect failed: {err}");
            SpeechErrorClass::TransientNetwork
        })?;
        if let tungstenite::stream::MaybeTlsStream::Plain(stream) = socket.get_mut() {
            if stream.set_nonblocking(true).is_err() {
                return Err(SpeechErrorClass::TransientNetwork);
            }
        }
        socket
            .send(tungstenite::Message::Text(
                json!({
                    "type": "listen",
                    "language": self.language,
                    "codec": "pcm_s16le",
                    "sample_rate": guard.format.sample_rate,
                    "channels": guard.format.channels,
                })
                .to_string(),
            ))
            .map_err(|err| {
                tracing::debug!("recognition start frame failed: {err}");
                SpeechErrorClass::TransientNetwork
            })?;
        emit(EngineEvent::Started);

        loop {
            if stop.load(Ordering::Relaxed) {
                let _ = socket.send(tungstenite::Message::Text(
                    json!({ "type": "stop" }).to_string(),
                ));
                let _ = socket.close(None);
                return Ok(());
            }

            while let Ok(frame) = frame_rx.try_recv() {
                let bytes = f32_to_pcm16_bytes(&frame);
                match socket.send(tungstenite::Message::Binary(bytes)) {
                    Ok(()) => {}
                    Err(err) if is_would_block(&err) => break,
                    Err(err) => {
                        tracing::debug!("recognition audio send failed: {err}");
                        return Err(SpeechErrorClass::TransientNetwork);
                    }
                }
            }

            match socket.read() {
                Ok(tungstenite::Message::Text(raw)) => {
                    if let Some(done) = handle_transcript_frame(&raw, emit) {
                        return done;
                    }
                }
                Ok(tungstenite::Message::Close(_)) => {
                    // Server-side end of utterance without an explicit frame.
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) if is_would_block(&err) => {
                    thread::sleep(SOCKET_IDLE_SLEEP);
                }
                Err(err) => {
                    tracing::debug!("recognition socket read failed: {err}");
                    return Err(SpeechErrorClass::TransientNetwork);
                }
            }
        }
    }
}

fn is_would_block(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Io(io_err)
            if io_err.kind() == std::io::ErrorKind::WouldBlock
    )
}

/// Interpret one transcript frame. Returns `Some` when the utterance is
/// over, carrying the outcome.
fn handle_transcript_frame(
    raw: &str,
    emit: &mut dyn FnMut(EngineEvent),
) -> Option<Result<(), SpeechErrorClass>> {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return None;
    };
    match value.get("type").and_then(Value::as_str) {
        Some("result") => {
            let text = value
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let is_final = value
                .get("is_final")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if is_final {
                emit(EngineEvent::Final(text));
            } else {
                emit(EngineEvent::Interim(text));
            }
            None
        }
        Some("end") => Some(Ok(())),
        Some("error") => {
            tracing::debug!(
                "recognition service reported: {}",
                value.get("message").and_then(Value::as_str).unwrap_or("?")
            );
            Some(Err(SpeechErrorClass::TransientNetwork))
        }
        _ => None,
    }
}
