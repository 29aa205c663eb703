//! One-shot capture: bounded recording, then exactly one transcription
//! attempt.
//!
//! Not restartable: each activation records until the hard cap or an
//! explicit stop, uploads once, and ends. Re-arming in continuous mode is
//! the controller's decision, made on the `Ended` event.

use crate::audio::capture::Recorder;
use crate::audio::encode::{downmix_to_mono, encode_wav_pcm16, resample_block_average};
use crate::audio::negotiate::NegotiatedFormat;
use crate::events::ControlEvent;
use crate::speech::{
    resolve_negotiated_format, CaptureHandle, SpeechErrorClass, SpeechEvent,
};
use crate::transcribe::TranscriptionClient;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const FRAME_CHANNEL_CAPACITY: usize = 64;
const FRAME_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct OneShotConfig {
    /// Hard cap on capture duration.
    pub cap: Duration,
    pub input_device: Option<String>,
    pub language: String,
}

/// Spawn one bounded capture-then-transcribe cycle.
pub fn spawn_one_shot(
    config: OneShotConfig,
    client: Arc<TranscriptionClient>,
    negotiated: Arc<Mutex<Option<NegotiatedFormat>>>,
    events: Sender<ControlEvent>,
) -> CaptureHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        let send = |event: SpeechEvent| {
            let _ = events.send(ControlEvent::Speech(event));
        };
        run_one_shot(&config, &client, &negotiated, &thread_stop, &send);
        send(SpeechEvent::Ended);
    });
    CaptureHandle::new(stop, handle)
}

fn run_one_shot(
    config: &OneShotConfig,
    client: &TranscriptionClient,
    negotiated: &Mutex<Option<NegotiatedFormat>>,
    stop: &AtomicBool,
    send: &dyn Fn(SpeechEvent),
) {
    // Negotiation happens before the first capture of the session and must
    // not block it: failures fall back to defaults inside.
    let format = resolve_negotiated_format(negotiated, client, &config.language);

    let recorder = match Recorder::new(config.input_device.as_deref()) {
        Ok(recorder) => recorder,
        Err(err) => {
            tracing::debug!("one-shot capture unavailable: {err:#}");
            send(SpeechEvent::Failed(SpeechErrorClass::NoInputDevice));
            return;
        }
    };
    let (frame_tx, frame_rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
    let capture_format;
    let samples = {
        // Guard scope: the microphone is released before the upload starts,
        // whatever path exits the block.
        let guard = match recorder.open_stream(frame_tx) {
            Ok(guard) => guard,
            Err(err) => {
                tracing::debug!("one-shot capture stream rejected: {err:#}");
                send(SpeechEvent::Failed(SpeechErrorClass::PermissionDenied));
                return;
            }
        };
        capture_format = guard.format;
        send(SpeechEvent::Listening);

        let deadline = Instant::now() + config.cap;
        let mut samples: Vec<f32> = Vec::new();
        loop {
            if stop.load(Ordering::Relaxed) || Instant::now() >= deadline {
                break;
            }
            match frame_rx.recv_timeout(FRAME_POLL) {
                Ok(frame) => samples.extend(frame),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        samples
    };

    if samples.is_empty() {
        send(SpeechEvent::Failed(SpeechErrorClass::Silence));
        return;
    }

    // Exactly one transcription attempt, even after an early stop: the user
    // stopped talking, not the pipeline.
    let mono = downmix_to_mono(&samples, capture_format.channels);
    let resampled =
        resample_block_average(&mono, capture_format.sample_rate, format.sample_rate);
    let wav = match encode_wav_pcm16(&resampled, format.sample_rate, format.channels) {
        Ok(wav) => wav,
        Err(err) => {
            tracing::warn!("one-shot WAV encoding failed: {err:#}");
            send(SpeechEvent::Failed(SpeechErrorClass::TransientNetwork));
            return;
        }
    };
    match client.transcribe(&wav, &format) {
        Ok(text) if text.is_empty() => send(SpeechEvent::Failed(SpeechErrorClass::Silence)),
        Ok(text) => send(SpeechEvent::Final(text)),
        Err(err) => {
            tracing::debug!("one-shot transcription failed: {err:#}");
            send(SpeechEvent::Failed(SpeechErrorClass::TransientNetwork));
        }
    }
}
