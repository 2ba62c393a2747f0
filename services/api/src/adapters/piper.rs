//! services/api/src/adapters/piper.rs
//!
//! The TTS gateway backed by a Piper HTTP server. It implements the
//! `TextToSpeechService` port and guarantees that whatever it returns is a
//! RIFF/WAVE file of mono 16-bit PCM.

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use sprachwelt_core::ports::{PortError, PortResult, TextToSpeechService};
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Longest text accepted for one synthesis call.
pub const MAX_TTS_CHARS: usize = 1000;

const VOICE_ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,63}$";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `TextToSpeechService` port using Piper.
pub struct PiperTtsAdapter {
    client: reqwest::Client,
    base_url: String,
    default_voice: String,
    voice_pattern: Regex,
    probe_ttl: Duration,
    /// Last probe time and result.
    probe: Mutex<Option<(Instant, bool)>>,
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

impl PiperTtsAdapter {
    /// Creates a new `PiperTtsAdapter`. `base_url` carries no trailing slash.
    pub fn new(
        base_url: impl Into<String>,
        default_voice: impl Into<String>,
        probe_ttl: Duration,
    ) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PortError::Unexpected(format!("Failed to build HTTP client: {e}")))?;
        let voice_pattern =
            Regex::new(VOICE_ID_PATTERN).map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            default_voice: default_voice.into(),
            voice_pattern,
            probe_ttl,
            probe: Mutex::new(None),
        })
    }

    async fn probe_now(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/voices", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Piper probe failed: {}", e);
                false
            }
        }
    }
}

/// Checks that `bytes` is a readable mono 16-bit integer PCM WAV file.
pub fn validate_wav(bytes: &[u8]) -> PortResult<()> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| PortError::InvalidResponse(format!("Not a WAV file: {e}")))?;
    let spec = reader.spec();
    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(PortError::InvalidResponse(format!(
            "Expected mono 16-bit PCM, got {} channel(s) at {} bits",
            spec.channels, spec.bits_per_sample
        )));
    }
    Ok(())
}

//=========================================================================================
// `TextToSpeechService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextToSpeechService for PiperTtsAdapter {
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> PortResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PortError::InvalidInput("text is empty".to_string()));
        }
        if text.chars().count() > MAX_TTS_CHARS {
            return Err(PortError::InvalidInput(format!(
                "text exceeds {MAX_TTS_CHARS} characters"
            )));
        }
        let voice = voice_id.unwrap_or(&self.default_voice);
        if !self.voice_pattern.is_match(voice) {
            return Err(PortError::InvalidInput(format!("invalid voice id '{voice}'")));
        }

        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .json(&SynthesisRequest { text, voice })
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach Piper at {}: {}", self.base_url, e);
                if e.is_timeout() {
                    PortError::Timeout(e.to_string())
                } else {
                    PortError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Piper returned {}: {}", status, body);
            return Err(PortError::Unavailable(format!("Piper returned {status}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        validate_wav(&audio)?;
        Ok(audio.to_vec())
    }

    async fn is_available(&self) -> bool {
        let mut probe = self.probe.lock().await;
        if let Some((at, available)) = *probe {
            if at.elapsed() < self.probe_ttl {
                return available;
            }
        }
        let available = self.probe_now().await;
        *probe = Some((Instant::now(), available));
        available
    }
}
