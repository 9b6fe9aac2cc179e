//! **Speech-to-Text**: upload a finalized recording, get its transcript.

use crate::capture::AudioBlob;
use crate::config::ServiceSettings;
use crate::error::{Stage, VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe one recording. An empty string means nothing was recognized.
    async fn transcribe(&self, audio: &AudioBlob) -> VoiceResult<String>;
}

#[derive(Deserialize)]
struct SttResponse {
    text: String,
}

/// STT over HTTP: multipart form with an `audio` file field, answered with `{text}`.
#[derive(Debug, Clone)]
pub struct HttpStt {
    pub url: String,
    client: reqwest::Client,
}

impl HttpStt {
    pub fn new(url: impl Into<String>, settings: &ServiceSettings) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| VoiceError::network(Stage::Transcription, e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn from_settings(settings: &ServiceSettings) -> VoiceResult<Self> {
        Self::new(settings.stt_url.clone(), settings)
    }
}

#[async_trait]
impl SpeechToText for HttpStt {
    async fn transcribe(&self, audio: &AudioBlob) -> VoiceResult<String> {
        let part = reqwest::multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name)
            .mime_str(audio.mime_type)
            .map_err(|e| VoiceError::network(Stage::Transcription, e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        let res = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::network(Stage::Transcription, e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::network(
                Stage::Transcription,
                format!("STT API error {}: {}", status, body),
            ));
        }
        let parsed: SttResponse = res.json().await.map_err(|e| {
            VoiceError::network(Stage::Transcription, format!("malformed STT response: {}", e))
        })?;
        debug!(chars = parsed.text.len(), "STT transcript received");
        Ok(parsed.text)
    }
}
