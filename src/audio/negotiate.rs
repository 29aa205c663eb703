//! Transcription-format negotiation against declared service capabilities.
//!
//! The service advertises what it accepts; we pick the closest match to the
//! caller's preferences. When the capability service cannot be reached the
//! caller falls back to [`fallback_format`]; negotiation must never block
//! capture.

use serde::Deserialize;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_CHANNELS: u16 = 1;

/// Capability declaration returned by the transcription service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SttCapabilities {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub sample_rates: Vec<u32>,
    #[serde(default)]
    pub channels: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub language: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Defaults used when the capability service is unreachable.
#[must_use]
pub fn fallback_format(preferred_language: &str) -> NegotiatedFormat {
    NegotiatedFormat {
        language: preferred_language.to_string(),
        sample_rate: DEFAULT_SAMPLE_RATE,
        channels: DEFAULT_CHANNELS,
    }
}

/// Select the upload format the service supports closest to our preferences.
#[must_use]
pub fn negotiate(caps: &SttCapabilities, preferred_language: &str) -> NegotiatedFormat {
    NegotiatedFormat {
        language: select_language(&caps.languages, preferred_language),
        sample_rate: select_sample_rate(&caps.sample_rates),
        channels: select_channels(&caps.channels),
    }
}

/// Exact match, else same base language with any region, else the provider's
/// first listed language.
fn select_language(available: &[String], preferred: &str) -> String {
    if available.is_empty() {
        return preferred.to_string();
    }
    if let Some(exact) = available
        .iter()
        .find(|lang| lang.eq_ignore_ascii_case(preferred))
    {
        return exact.clone();
    }
    let base = preferred.split('-').next().unwrap_or(preferred);
    if let Some(related) = available.iter().find(|lang| {
        let lang_base = lang.split('-').next().unwrap_or(lang);
        lang_base.eq_ignore_ascii_case(base)
    }) {
        return related.clone();
    }
    available[0].clone()
}

/// Prefer the common 16 kHz default when offered, else the provider's first
/// listed rate.
fn select_sample_rate(available: &[u32]) -> u32 {
    if available.contains(&DEFAULT_SAMPLE_RATE) {
        return DEFAULT_SAMPLE_RATE;
    }
    available.first().copied().unwrap_or(DEFAULT_SAMPLE_RATE)
}

/// Mono when offered, else the provider's first listed channel count.
fn select_channels(available: &[u16]) -> u16 {
    if available.contains(&DEFAULT_CHANNELS) {
        return DEFAULT_CHANNELS;
    }
    available.first().copied().unwrap_or(DEFAULT_CHANNELS)
}
