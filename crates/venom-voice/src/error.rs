//! Error types for the voice pipeline

use crate::turn::TurnState;
use std::fmt;
use thiserror::Error;
use venom_core::{ChatError, PersistenceError};

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Remote stage a network failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcription,
    Generation,
    Synthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Transcription => "STT",
            Stage::Generation => "chat",
            Stage::Synthesis => "TTS",
        })
    }
}

/// Errors raised by devices and remote services
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Microphone permission denied or no input device.
    #[error("Device access error: {0}")]
    DeviceAccess(String),

    /// STT/chat/TTS request failed, returned non-2xx, or sent a malformed payload.
    #[error("{stage} request failed: {detail}")]
    Network { stage: Stage, detail: String },

    /// A required credential is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Audio encoding error: {0}")]
    Encoding(String),
}

impl VoiceError {
    pub fn network(stage: Stage, detail: impl Into<String>) -> Self {
        VoiceError::Network {
            stage,
            detail: detail.into(),
        }
    }

    /// Text shown to the user after the localized prefix.
    pub fn detail(&self) -> String {
        match self {
            VoiceError::Network { detail, .. } => detail.clone(),
            VoiceError::DeviceAccess(d)
            | VoiceError::Configuration(d)
            | VoiceError::Playback(d)
            | VoiceError::Encoding(d) => d.clone(),
            VoiceError::Persistence(e) => e.to_string(),
        }
    }
}

/// Why a controller rejected a user action.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("A turn is already in flight ({0})")]
    Busy(TurnState),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Chat(#[from] ChatError),
}
