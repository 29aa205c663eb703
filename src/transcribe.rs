//! Transcription-service client: capability discovery and one-shot upload.
//!
//! Failures here are hard failures; retry is the supervisor's job, never
//! this client's.

use crate::audio::negotiate::{NegotiatedFormat, SttCapabilities};
use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

const CAPABILITY_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_SNIPPET_LEN: usize = 200;

pub struct TranscriptionClient {
    http: Client,
    base_url: String,
    token: String,
    engine: String,
}

impl TranscriptionClient {
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(base_url: &str, token: &str, engine: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(CAPABILITY_TIMEOUT)
            .build()
            .context("failed to build transcription HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            engine: engine.to_string(),
        })
    }

    fn engine_url(&self) -> String {
        format!("{}/api/stt/{}", self.base_url, self.engine)
    }

    /// Query the engine's supported languages, sample rates, and channels.
    ///
    /// # Errors
    ///
    /// Any non-2xx or non-JSON response is a hard failure.
    pub fn capabilities(&self) -> Result<SttCapabilities> {
        let response = self
            .http
            .get(self.engine_url())
            .bearer_auth(&self.token)
            .send()
            .context("transcription capability request failed")?;
        let response = ensure_json_success(response)?;
        response
            .json()
            .context("transcription capability response was not valid JSON")
    }

    /// Upload one WAV buffer and return the recognized text.
    ///
    /// # Errors
    ///
    /// Any non-2xx or non-JSON response, or a payload without a `text`
    /// field, is a hard failure.
    pub fn transcribe(&self, wav: &[u8], format: &NegotiatedFormat) -> Result<String> {
        let response = self
            .http
            .post(self.engine_url())
            .bearer_auth(&self.token)
            .header("X-Speech-Content", speech_content_header(format))
            .header(CONTENT_TYPE, "audio/wav")
            .timeout(UPLOAD_TIMEOUT)
            .body(wav.to_vec())
            .send()
            .context("transcription upload failed")?;
        let response = ensure_json_success(response)?;
        let payload: serde_json::Value = response
            .json()
            .context("transcription response was not valid JSON")?;
        let text = payload
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("transcription response carried no text field"))?;
        Ok(text.trim().to_string())
    }
}

/// Metadata header describing the negotiated upload format.
pub(crate) fn speech_content_header(format: &NegotiatedFormat) -> String {
    format!(
        "format=wav; codec=pcm; sample_rate={}; channel={}; language={}",
        format.sample_rate, format.channels, format.language
    )
}

fn ensure_json_success(response: Response) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        bail!(
            "transcription service error {status}: {}",
            snippet(&body)
        );
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.contains("json") {
        let body = response.text().unwrap_or_default();
        bail!(
            "transcription service answered with '{content_type}' instead of JSON: {}",
            snippet(&body)
        );
    }
    Ok(response)
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
