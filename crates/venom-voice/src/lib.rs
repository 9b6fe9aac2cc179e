//! # Venom Voice - voice turn orchestration
//!
//! Microphone capture, energy-threshold VAD, and the turn state machine that
//! sequences speech-to-text, chat completion and text-to-speech against one
//! conversation, with barge-in over the spoken reply.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       TurnController                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐    │
//! │  │ CaptureSess. │→ │ Spectrum+VAD │→ │ silence / cap    │    │
//! │  │ (Microphone) │  │ (16ms tick)  │  │ → STT → LLM → TTS│    │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘    │
//! │         ↑                  │ voice while speaking   ↓        │
//! │         │                  └──── barge-in ──┐ ┌──────────┐   │
//! │         └───────── monitor session ─────────┴─│ Playback │   │
//! │                                               └──────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod analyser;
pub mod capture;
pub mod config;
pub mod error;
pub mod i18n;
pub mod llm;
#[cfg(feature = "native-audio")]
pub mod native;
mod pipeline;
pub mod playback;
pub mod stt;
pub mod text_turn;
pub mod tts;
pub mod turn;
pub mod vad;

pub use analyser::SpectrumAnalyser;
pub use capture::{
    pcm_f32_to_wav, AudioBlob, AudioCaptureSession, CaptureMode, InputStream, Microphone,
};
pub use config::{
    CaptureSettings, ChatBackend, ServiceSettings, TurnSettings, VadSettings, VoiceSettings,
};
pub use error::{Stage, TurnError, VoiceError, VoiceResult};
pub use i18n::{FailureKind, Locale};
pub use llm::{chat_from_settings, ChatCompletion, DirectChat, RelayChat};
#[cfg(feature = "native-audio")]
pub use native::{CpalMicrophone, RodioOutput};
pub use playback::{AudioOutput, NullOutput, PlaybackEvent, PlaybackSession, PlaybackStatus};
pub use stt::{HttpStt, SpeechToText};
pub use text_turn::TextTurnController;
pub use tts::{HttpTts, SpeechSynthesizer};
pub use turn::{TurnController, TurnState, VoiceServices};
pub use vad::{average_level, VadSignal, VoiceActivityDetector};
