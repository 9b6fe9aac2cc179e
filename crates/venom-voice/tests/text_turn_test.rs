//! Integration test: TextTurnController with the null output device.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use venom_core::{ChatSession, MemoryStore, Role};
use venom_voice::{
    chat_from_settings, AudioOutput, NullOutput, PlaybackEvent, Stage, TextTurnController,
    TurnError, TurnState, VoiceError, VoiceResult, VoiceSettings,
};

/// Output whose event channel is already closed when the source loads,
/// as after the output thread has died.
struct DeadOutput;

impl AudioOutput for DeadOutput {
    fn load(&self, _audio: Vec<u8>) -> VoiceResult<mpsc::UnboundedReceiver<PlaybackEvent>> {
        Ok(mpsc::unbounded_channel().1)
    }

    fn play(&self) -> VoiceResult<()> {
        Ok(())
    }

    fn pause(&self) -> VoiceResult<()> {
        Ok(())
    }

    fn stop(&self) -> VoiceResult<()> {
        Ok(())
    }
}

async fn text_controller(
    llm: Arc<ScriptedLlm>,
    settings: VoiceSettings,
) -> (Arc<ChatSession>, TextTurnController) {
    let chat = Arc::new(ChatSession::new(Arc::new(MemoryStore::new())));
    chat.create_conversation(USER_ID, None).await.unwrap();
    let controller = TextTurnController::new(
        chat.clone(),
        llm,
        Arc::new(ScriptedTts::new()),
        Arc::new(NullOutput::new()),
        settings,
    );
    (chat, controller)
}

#[tokio::test(start_paused = true)]
async fn reply_plays_and_settles() {
    init_tracing();
    let (chat, controller) =
        text_controller(Arc::new(ScriptedLlm::new()), VoiceSettings::default()).await;
    let mut states = controller.subscribe();

    controller.send_text("hello").await.unwrap();
    wait_for_state(&mut states, TurnState::Idle).await;

    let messages = chat.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].content, "hi there");
    assert!(controller.last_error().await.is_none());
    assert!(!controller.stop_speaking().await);
}

#[tokio::test(start_paused = true)]
async fn lost_playback_channel_returns_to_idle() {
    let chat = Arc::new(ChatSession::new(Arc::new(MemoryStore::new())));
    chat.create_conversation(USER_ID, None).await.unwrap();
    let controller = TextTurnController::new(
        chat.clone(),
        Arc::new(ScriptedLlm::new()),
        Arc::new(ScriptedTts::new()),
        Arc::new(DeadOutput),
        VoiceSettings::default(),
    );
    let mut states = controller.subscribe();

    controller.send_text("hello").await.unwrap();
    wait_for_state(&mut states, TurnState::Idle).await;

    assert_eq!(
        controller.last_error().await.as_deref(),
        Some("오디오 재생 오류")
    );
    assert_eq!(chat.messages().await.len(), 2);

    // The controller accepts the next turn instead of reporting busy.
    tokio::time::sleep(Duration::from_secs(1)).await;
    controller.send_text("again").await.unwrap();
    wait_for_state(&mut states, TurnState::Idle).await;
    assert_eq!(chat.messages().await.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn network_failure_becomes_one_message() {
    let llm = Arc::new(ScriptedLlm::new());
    llm.push(Err(VoiceError::network(Stage::Generation, "chat API error 500: upstream")));
    let (chat, controller) = text_controller(llm, VoiceSettings::default()).await;

    controller.send_text("hello").await.unwrap();

    assert_eq!(controller.state(), TurnState::Idle);
    let messages = chat.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "처리 오류: chat API error 500: upstream");
    assert!(controller
        .last_error()
        .await
        .is_some_and(|e| e.contains("upstream")));
}

#[tokio::test(start_paused = true)]
async fn missing_api_key_never_reaches_the_network() {
    let settings = VoiceSettings::default();
    assert!(settings.services.api_key.is_none());
    let llm = chat_from_settings(&settings.services).unwrap();

    let chat = Arc::new(ChatSession::new(Arc::new(MemoryStore::new())));
    chat.create_conversation(USER_ID, None).await.unwrap();
    let controller = TextTurnController::new(
        chat.clone(),
        llm,
        Arc::new(ScriptedTts::new()),
        Arc::new(NullOutput::new()),
        settings,
    );

    controller.send_text("hello").await.unwrap();

    let messages = chat.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "API 키가 제공되지 않았습니다.");
    assert_eq!(controller.state(), TurnState::Idle);
}

#[tokio::test(start_paused = true)]
async fn busy_while_generating() {
    let llm = Arc::new(ScriptedLlm::new());
    let gate = llm.hold();
    let (_chat, controller) = text_controller(llm, VoiceSettings::default()).await;
    let mut states = controller.subscribe();

    let first = controller.clone();
    let turn = tokio::spawn(async move { first.send_text("one").await });
    wait_for_state(&mut states, TurnState::Generating).await;

    let err = controller.send_text("two").await.unwrap_err();
    assert!(matches!(err, TurnError::Busy(TurnState::Generating)));

    gate.notify_one();
    turn.await.unwrap().unwrap();
    wait_for_state(&mut states, TurnState::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn no_conversation_is_a_no_op() {
    let chat = Arc::new(ChatSession::new(Arc::new(MemoryStore::new())));
    let llm = Arc::new(ScriptedLlm::new());
    let controller = TextTurnController::new(
        chat.clone(),
        llm.clone(),
        Arc::new(ScriptedTts::new()),
        Arc::new(NullOutput::new()),
        VoiceSettings::default(),
    );

    controller.send_text("hello").await.unwrap();

    assert_eq!(controller.state(), TurnState::Idle);
    assert!(llm.prompts.lock().unwrap().is_empty());

    let created = controller.create_conversation(USER_ID, None).await.unwrap();
    assert_eq!(created.title, "새 대화");
    controller.send_text("hello").await.unwrap();
    assert_eq!(chat.messages().await.len(), 2);
}
