//! Audio capture, format negotiation, and wire encoding for speech input.

pub mod capture;
pub mod encode;
pub mod negotiate;

pub use capture::{CaptureFormat, CaptureGuard, Recorder};
pub use encode::{downmix_to_mono, encode_wav_pcm16, f32_to_pcm16_bytes, resample_block_average};
pub use negotiate::{fallback_format, negotiate, NegotiatedFormat, SttCapabilities};
