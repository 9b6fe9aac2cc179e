//! Fakes for the devices and remote services the turn controllers drive.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use venom_core::{ChatSession, ConversationStore, MemoryStore};
use venom_voice::{
    AudioBlob, AudioOutput, ChatCompletion, InputStream, Microphone, PlaybackEvent,
    SpeechSynthesizer, SpeechToText, TurnController, TurnState, VoiceError, VoiceResult,
    VoiceServices, VoiceSettings,
};

pub const USER_ID: &str = "user-1";

/// Samples handed out per read; one full analyser frame.
const FRAME: usize = 256;

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

/// Microphone whose level the test flips between loud noise and silence.
#[derive(Default)]
pub struct FakeMicrophone {
    pub loud: Arc<AtomicBool>,
    pub deny: AtomicBool,
    pub opened: AtomicUsize,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    pub fn set_loud(&self, loud: bool) {
        self.loud.store(loud, Ordering::SeqCst);
    }

    /// Streams currently holding the device.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Most streams ever held at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn open(&self) -> VoiceResult<Box<dyn InputStream>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(VoiceError::DeviceAccess("Permission denied".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            loud: self.loud.clone(),
            active: self.active.clone(),
            released: false,
            seed: 0x1234_5678,
        }))
    }
}

struct FakeStream {
    loud: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    released: bool,
    seed: u32,
}

impl InputStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn read(&mut self) -> Vec<f32> {
        if !self.loud.load(Ordering::SeqCst) {
            return vec![0.0; FRAME];
        }
        (0..FRAME)
            .map(|_| {
                self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (((self.seed >> 16) as f32 / 32_768.0) - 1.0) * 0.8
            })
            .collect()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Remote services
// ---------------------------------------------------------------------------

pub struct ScriptedStt {
    replies: Mutex<VecDeque<VoiceResult<String>>>,
    pub calls: Mutex<Vec<(Instant, AudioBlob)>>,
}

impl ScriptedStt {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: VoiceResult<String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn first_call_at(&self) -> Option<Instant> {
        self.calls.lock().unwrap().first().map(|(at, _)| *at)
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn transcribe(&self, audio: &AudioBlob) -> VoiceResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), audio.clone()));
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok("hello".to_string()))
    }
}

pub struct ScriptedLlm {
    replies: Mutex<VecDeque<VoiceResult<String>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub prompts: Mutex<Vec<(String, usize)>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: VoiceResult<String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Makes the next calls wait until the returned notify is signalled.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ChatCompletion for ScriptedLlm {
    async fn complete(
        &self,
        prompt: &str,
        history: &[venom_core::HistoryMessage],
    ) -> VoiceResult<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), history.len()));
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok("hi there".to_string()))
    }
}

pub struct ScriptedTts {
    replies: Mutex<VecDeque<VoiceResult<Vec<u8>>>>,
    pub calls: AtomicUsize,
}

impl ScriptedTts {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, reply: VoiceResult<Vec<u8>>) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedTts {
    async fn synthesize(&self, _text: &str, language: &str) -> VoiceResult<Vec<u8>> {
        assert_eq!(language, "ko");
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(vec![0x52, 0x49, 0x46, 0x46]))
    }
}

// ---------------------------------------------------------------------------
// Audio output
// ---------------------------------------------------------------------------

/// Output that plays until the test calls `finish` or `fail`.
#[derive(Default)]
pub struct FakeOutput {
    calls: Mutex<Vec<&'static str>>,
    events: Mutex<Option<mpsc::UnboundedSender<PlaybackEvent>>>,
    pub paused: AtomicBool,
}

impl FakeOutput {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn finish(&self) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(PlaybackEvent::Ended);
        }
    }

    pub fn fail(&self, reason: &str) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(PlaybackEvent::Failed(reason.to_string()));
        }
    }
}

impl AudioOutput for FakeOutput {
    fn load(&self, _audio: Vec<u8>) -> VoiceResult<mpsc::UnboundedReceiver<PlaybackEvent>> {
        self.calls.lock().unwrap().push("load");
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn play(&self) -> VoiceResult<()> {
        self.calls.lock().unwrap().push("play");
        self.paused.store(false, Ordering::SeqCst);
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(PlaybackEvent::Started);
        }
        Ok(())
    }

    fn pause(&self) -> VoiceResult<()> {
        self.calls.lock().unwrap().push("pause");
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> VoiceResult<()> {
        self.calls.lock().unwrap().push("stop");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub chat: Arc<ChatSession>,
    pub mic: Arc<FakeMicrophone>,
    pub stt: Arc<ScriptedStt>,
    pub llm: Arc<ScriptedLlm>,
    pub tts: Arc<ScriptedTts>,
    pub output: Arc<FakeOutput>,
    pub controller: TurnController,
    pub states: watch::Receiver<TurnState>,
}

/// Controller over a fresh in-memory store with one selected conversation.
pub async fn harness(settings: VoiceSettings) -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()), settings, true).await
}

pub async fn harness_with_store(
    store: Arc<dyn ConversationStore>,
    settings: VoiceSettings,
    select_conversation: bool,
) -> Harness {
    let chat = Arc::new(ChatSession::new(store));
    if select_conversation {
        chat.create_conversation(USER_ID, None).await.unwrap();
    }
    let mic = Arc::new(FakeMicrophone::default());
    let stt = Arc::new(ScriptedStt::new());
    let llm = Arc::new(ScriptedLlm::new());
    let tts = Arc::new(ScriptedTts::new());
    let output = Arc::new(FakeOutput::default());
    let controller = TurnController::new(
        chat.clone(),
        VoiceServices {
            stt: stt.clone(),
            llm: llm.clone(),
            tts: tts.clone(),
        },
        mic.clone(),
        output.clone(),
        settings,
    );
    let states = controller.subscribe();
    Harness {
        chat,
        mic,
        stt,
        llm,
        tts,
        output,
        controller,
        states,
    }
}

/// Waits (in virtual time) until the controller reports `target`.
pub async fn wait_for_state(states: &mut watch::Receiver<TurnState>, target: TurnState) {
    tokio::time::timeout(Duration::from_secs(120), states.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", target))
        .expect("controller dropped");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
