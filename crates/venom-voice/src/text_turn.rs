//! Typed-input turns: `idle → generating → synthesizing → speaking → idle`.
//!
//! Same message and failure contract as the voice controller, without a
//! microphone, transcription or VAD.

use crate::config::VoiceSettings;
use crate::error::TurnError;
use crate::llm::ChatCompletion;
use crate::pipeline::TurnCore;
use crate::playback::AudioOutput;
use crate::tts::SpeechSynthesizer;
use crate::turn::TurnState;
use std::sync::Arc;
use tokio::sync::watch;
use venom_core::{ChatSession, Conversation};

#[derive(Clone)]
pub struct TextTurnController {
    core: Arc<TurnCore>,
}

impl TextTurnController {
    pub fn new(
        chat: Arc<ChatSession>,
        llm: Arc<dyn ChatCompletion>,
        tts: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        settings: VoiceSettings,
    ) -> Self {
        Self {
            core: TurnCore::new(chat, llm, tts, None, output, settings),
        }
    }

    pub fn chat(&self) -> &Arc<ChatSession> {
        &self.core.chat
    }

    pub fn state(&self) -> TurnState {
        self.core.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.core.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.state().is_processing()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.core.last_error().await
    }

    /// Appends `text` as the user message and runs the response stages. Returns
    /// once the reply is playing or the turn has fallen back to idle.
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
