//! Voice turn-taking: the [`TurnController`] state machine.
//!
//! ```text
//! idle ─start─▶ recording ─silence / cap / stop─▶ transcribing ─▶ generating
//!   ▲               ▲                                                  │
//!   │               └──────────── barge-in ─────┐                      ▼
//!   └──── ended / error / failure ──────────── speaking ◀──────── synthesizing
//! ```
//!
//! Exactly one turn is active at a time. User actions are rejected with
//! [`TurnError::Busy`] while a turn is transcribing, generating or
//! synthesizing; talking over the response (barge-in) is the one preemption.

use crate::capture::Microphone;
use crate::config::VoiceSettings;
use crate::error::TurnError;
use crate::llm::ChatCompletion;
use crate::pipeline::{TurnCore, VoiceInput};
use crate::playback::AudioOutput;
use crate::stt::SpeechToText;
use crate::tts::SpeechSynthesizer;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use venom_core::{ChatSession, Conversation};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    #[default]
    Idle,
    Recording,
    Transcribing,
    Generating,
    Synthesizing,
    Speaking,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Recording => "recording",
            TurnState::Transcribing => "transcribing",
            TurnState::Generating => "generating",
            TurnState::Synthesizing => "synthesizing",
            TurnState::Speaking => "speaking",
        }
    }

    /// A remote stage is in flight.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            TurnState::Transcribing | TurnState::Generating | TurnState::Synthesizing
        )
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three remote services a voice turn calls, in order.
#[derive(Clone)]
pub struct VoiceServices {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn ChatCompletion>,
    pub tts: Arc<dyn SpeechSynthesizer>,
}

/// Drives voice and text turns for the current conversation of a [`ChatSession`].
#[derive(Clone)]
pub struct TurnController {
    core: Arc<TurnCore>,
}

impl TurnController {
    pub fn new(
        chat: Arc<ChatSession>,
        services: VoiceServices,
        microphone: Arc<dyn Microphone>,
        output: Arc<dyn AudioOutput>,
        settings: VoiceSettings,
    ) -> Self {
        let voice = VoiceInput {
            microphone,
            stt: services.stt,
        };
        Self {
            core: TurnCore::new(
                chat,
                services.llm,
                services.tts,
                Some(voice),
                output,
                settings,
            ),
        }
    }

    pub fn chat(&self) -> &Arc<ChatSession> {
        &self.core.chat
    }

    pub fn state(&self) -> TurnState {
        self.core.state()
    }

    /// Watch channel of state transitions.
    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.core.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.state().is_processing()
    }

    /// Last failure surfaced by the controller (device, stage, playback or persistence).
    pub async fn last_error(&self) -> Option<String> {
        self.core.last_error().await
    }

    /// Opens the microphone and starts recording. A no-op without a selected
    /// conversation or while already recording. While speaking, this pauses
    /// playback and records right away.
    pub async fn start_recording(&self) -> Result<(), TurnError> {
        self.core.start_recording().await
    }

    /// Stops the recording and starts transcription. Calling it again, or when
    /// nothing is recording, does nothing and returns false.
    pub async fn stop_recording(&self) -> bool {
        self.core.stop_recording().await
    }

    /// Runs a typed message through generate → synthesize → speak.
    pub async fn send_text(&self, text: &str) -> Result<(), TurnError> {
        self.core.send_text(text).await
    }

    pub async fn stop_speaking(&self) -> bool {
        self.core.stop_speaking().await
    }

    pub async fn reset(&self) {
        self.core.reset().await
    }

    pub async fn select_conversation(&self, id: &str) -> Result<Conversation, TurnError> {
        self.core.select_conversation(id).await
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, TurnError> {
        self.core.create_conversation(user_id, title).await
    }

    pub async fn delete_conversation(&self) -> Result<(), TurnError> {
        self.core.delete_conversation().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_states() {
        assert!(!TurnState::Idle.is_processing());
        assert!(!TurnState::Recording.is_processing());
        assert!(TurnState::Transcribing.is_processing());
        assert!(TurnState::Generating.is_processing());
        assert!(TurnState::Synthesizing.is_processing());
        assert!(!TurnState::Speaking.is_processing());
        assert_eq!(TurnState::default(), TurnState::Idle);
    }
}
