//! **Text-to-Speech**: turn the assistant reply into playable audio bytes.

use crate::config::ServiceSettings;
use crate::error::{Stage, VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in `language`. An empty payload means there is nothing to play.
    async fn synthesize(&self, text: &str, language: &str) -> VoiceResult<Vec<u8>>;
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    language: &'a str,
}

/// TTS over HTTP: JSON `{text, language}`, answered with a binary audio body.
#[derive(Debug, Clone)]
pub struct HttpTts {
    pub url: String,
    client: reqwest::Client,
}

impl HttpTts {
    pub fn new(url: impl Into<String>, settings: &ServiceSettings) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| VoiceError::network(Stage::Synthesis, e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn from_settings(settings: &ServiceSettings) -> VoiceResult<Self> {
        Self::new(settings.tts_url.clone(), settings)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpTts {
    async fn synthesize(&self, text: &str, language: &str) -> VoiceResult<Vec<u8>> {
        let res = self
            .client
            .post(&self.url)
            .json(&TtsRequest { text, language })
            .send()
            .await
            .map_err(|e| VoiceError::network(Stage::Synthesis, e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::network(
                Stage::Synthesis,
                format!("TTS API error {}: {}", status, body),
            ));
        }
        let bytes = res
            .bytes()
            .await
            .map_err(|e| VoiceError::network(Stage::Synthesis, e.to_string()))?;
        debug!(bytes = bytes.len(), "TTS audio received");
        Ok(bytes.to_vec())
    }
}
