//! Voice pipeline settings: service endpoints, VAD tuning, capture limits and
//! turn behaviour. Loaded with the `config` crate from defaults, an optional
//! TOML file and `VENOM_VOICE__*` environment variables.

use crate::i18n::Locale;
use serde::Deserialize;
use std::time::Duration;
use venom_core::env_opt_string;

pub const DEFAULT_SYSTEM_PROMPT: &str = "당신은 친절하고 도움이 되는 AI 어시스턴트입니다. \
    사용자의 질문에 정확하고 간결하게 한국어로 답변해 주세요.";

/// Which chat-completion wire format to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatBackend {
    /// OpenAI-compatible `/chat/completions` called directly with the credential.
    Direct,
    /// Relay endpoint taking `{prompt, history}` and answering `{content}`.
    Relay,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub stt_url: String,
    pub tts_url: String,
    pub chat_url: String,
    pub chat_backend: ChatBackend,
    pub chat_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    /// Prior messages sent as context with each prompt.
    pub history_limit: usize,
    /// Language tag sent to TTS.
    pub language: String,
    pub request_timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            stt_url: "http://localhost:8000/api/stt".to_string(),
            tts_url: "http://localhost:8000/api/tts".to_string(),
            chat_url: "https://api.deepseek.com/v1/chat/completions".to_string(),
            chat_backend: ChatBackend::Direct,
            chat_model: "deepseek-chat".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_limit: 10,
            language: "ko".to_string(),
            request_timeout_secs: 60,
            api_key: None,
        }
    }
}

impl ServiceSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Energy-threshold VAD tuning. `threshold` is on the 0–255 byte spectrum scale.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub threshold: f32,
    pub silence_ms: u64,
    pub poll_interval_ms: u64,
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 20.0,
            silence_ms: 1500,
            poll_interval_ms: 16,
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl VadSettings {
    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Hard ceiling on one recording.
    pub max_recording_secs: u64,
    /// Audio a monitoring session keeps so a barge-in recording starts with
    /// the words that triggered it.
    pub pre_roll_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_recording_secs: 30,
            pre_roll_ms: 300,
        }
    }
}

impl CaptureSettings {
    pub fn max_recording(&self) -> Duration {
        Duration::from_secs(self.max_recording_secs)
    }

    /// Pre-roll length in samples at `sample_rate`.
    pub fn pre_roll_samples(&self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.pre_roll_ms / 1000) as usize
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TurnSettings {
    /// Listen while speaking and let the user interrupt by talking.
    pub barge_in: bool,
    pub locale: Locale,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            barge_in: true,
            locale: Locale::Ko,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub services: ServiceSettings,
    pub vad: VadSettings,
    pub capture: CaptureSettings,
    pub turn: TurnSettings,
}

impl VoiceSettings {
    /// Load settings. Precedence: `VENOM_VOICE__*` env (nested keys joined by `__`)
    /// > `VENOM_VOICE_CONFIG` file (default `config/voice.toml`) > defaults.
    /// The chat credential falls back to `VENOM_LLM_API_KEY`, then `DEEPSEEK_API_KEY`.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("VENOM_VOICE_CONFIG").unwrap_or_else(|_| "config/voice".to_string());
        let built = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(config::Environment::with_prefix("VENOM_VOICE").separator("__"))
            .build()?;

        let mut settings: Self = built.try_deserialize()?;
        if settings.services.api_key.is_none() {
            settings.services.api_key =
                env_opt_string("VENOM_LLM_API_KEY").or_else(|| env_opt_string("DEEPSEEK_API_KEY"));
        }
        Ok(settings)
    }
}
