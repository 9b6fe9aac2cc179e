//! Turn engine shared by [`crate::TurnController`] and [`crate::TextTurnController`].
//!
//! All turn state lives in one [`Machine`] behind an async mutex: the state,
//! the epoch, the capture session and the playback session. Every turn carries
//! the epoch it started under; barge-in, reset and stop bump it, and any stage
//! result that arrives under an older epoch is dropped.
//!
//! The VAD loop is a spawned task ticking on a fixed interval. It exits when the
//! capture session's guard flag is cleared, so it may run at most one tick past
//! the end of its session.

use crate::capture::{AudioBlob, AudioCaptureSession, CaptureMode, Microphone};
use crate::config::VoiceSettings;
use crate::error::{Stage, TurnError, VoiceError};
use crate::i18n::FailureKind;
use crate::llm::ChatCompletion;
use crate::playback::{AudioOutput, PlaybackEvent, PlaybackSession};
use crate::stt::SpeechToText;
use crate::tts::SpeechSynthesizer;
use crate::turn::TurnState;
use crate::vad::VadSignal;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use venom_core::{ChatError, ChatSession, Conversation, HistoryMessage, NewMessage};

pub(crate) struct VoiceInput {
    pub microphone: Arc<dyn Microphone>,
    pub stt: Arc<dyn SpeechToText>,
}

pub(crate) struct Machine {
    state: TurnState,
    epoch: u64,
    capture: Option<AudioCaptureSession>,
    playback: PlaybackSession,
    last_error: Option<String>,
}

pub(crate) struct TurnCore {
    pub chat: Arc<ChatSession>,
    llm: Arc<dyn ChatCompletion>,
    tts: Arc<dyn SpeechSynthesizer>,
    voice: Option<VoiceInput>,
    settings: VoiceSettings,
    machine: Mutex<Machine>,
    state_tx: watch::Sender<TurnState>,
}

impl TurnCore {
    pub fn new(
        chat: Arc<ChatSession>,
        llm: Arc<dyn ChatCompletion>,
        tts: Arc<dyn SpeechSynthesizer>,
        voice: Option<VoiceInput>,
        output: Arc<dyn AudioOutput>,
        settings: VoiceSettings,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(TurnState::Idle);
        Arc::new(Self {
            chat,
            llm,
            tts,
            voice,
            settings,
            machine: Mutex::new(Machine {
                state: TurnState::Idle,
                epoch: 0,
                capture: None,
                playback: PlaybackSession::new(output),
                last_error: None,
            }),
            state_tx,
        })
    }

    pub fn state(&self) -> TurnState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.state_tx.subscribe()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.machine.lock().await.last_error.clone()
    }

    fn enter(&self, m: &mut Machine, next: TurnState) {
        if m.state != next {
            info!(from = %m.state, to = %next, epoch = m.epoch, "turn state");
            m.state = next;
            self.state_tx.send_replace(next);
        }
    }

    async fn is_current(&self, epoch: u64) -> bool {
        self.machine.lock().await.epoch == epoch
    }

    /// Moves to `next` only if the turn is still current.
    async fn advance(&self, epoch: u64, next: TurnState) -> bool {
        let mut m = self.machine.lock().await;
        if m.epoch != epoch {
            debug!(epoch, current = m.epoch, %next, "stale turn; transition dropped");
            return false;
        }
        self.enter(&mut m, next);
        true
    }

    async fn settle(&self, epoch: u64) {
        self.advance(epoch, TurnState::Idle).await;
    }

    fn history_limit(&self) -> usize {
        self.settings.services.history_limit
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    /// Starts a text turn and drives it until playback starts or the turn fails.
    pub async fn send_text(self: &Arc<Self>, text: &str) -> Result<(), TurnError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let Some(conversation_id) = self.chat.current_id().await else {
            debug!("no conversation selected; text ignored");
            return Ok(());
        };
        let epoch = {
            let mut m = self.machine.lock().await;
            if m.state != TurnState::Idle {
                return Err(TurnError::Busy(m.state));
            }
            m.epoch += 1;
            m.last_error = None;
            self.enter(&mut m, TurnState::Generating);
            m.epoch
        };

        let history = self.chat.history(self.history_limit()).await;
        if !self.append(epoch, &conversation_id, NewMessage::user(text)).await {
            self.settle(epoch).await;
            return Ok(());
        }
        self.respond(epoch, &conversation_id, text, history).await;
        Ok(())
    }

    /// Opens a recording. While speaking this is a manual barge-in.
    pub async fn start_recording(self: &Arc<Self>) -> Result<(), TurnError> {
        let Some(voice) = &self.voice else {
            return Ok(());
        };
        if self.chat.current_id().await.is_none() {
            debug!("no conversation selected; recording not started");
            return Ok(());
        }

        let mut m = self.machine.lock().await;
        match m.state {
            TurnState::Idle => {}
            TurnState::Recording => return Ok(()),
            TurnState::Speaking => {
                if m.capture.is_some() {
                    self.barge_in(&mut m, Instant::now());
                    return Ok(());
                }
                if let Err(e) = m.playback.pause() {
                    warn!(error = %e, "pause failed before recording");
                }
            }
            busy => return Err(TurnError::Busy(busy)),
        }

        // The device must be free before a new session acquires it.
        if let Some(mut previous) = m.capture.take() {
            previous.stop();
        }

        match AudioCaptureSession::start(
            voice.microphone.as_ref(),
            &self.settings,
            CaptureMode::Recording,
            Instant::now(),
        )
        .await
        {
            Ok(session) => {
                let guard = session.guard();
                m.capture = Some(session);
                m.epoch += 1;
                m.last_error = None;
                self.enter(&mut m, TurnState::Recording);
                tokio::spawn(self.clone().run_vad_loop(guard));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "🎤 Microphone unavailable");
                if let Err(stop_err) = m.playback.stop() {
                    warn!(error = %stop_err, "failed to stop playback");
                }
                m.epoch += 1;
                m.last_error = Some(
                    self.settings
                        .turn
                        .locale
                        .failure_message(FailureKind::Microphone, &e.detail()),
                );
                self.enter(&mut m, TurnState::Idle);
                Err(e.into())
            }
        }
    }

    /// Ends the recording and hands the blob to the pipeline. Returns false
    /// when there was no recording to stop.
    pub async fn stop_recording(self: &Arc<Self>) -> bool {
        let job = {
            let mut m = self.machine.lock().await;
            self.close_recording(&mut m)
        };
        match job {
            Some((epoch, blob)) => {
                tokio::spawn(self.clone().process_audio(epoch, blob));
                true
            }
            None => false,
        }
    }

    /// Stops playback of the current response. Returns false if nothing was speaking.
    pub async fn stop_speaking(&self) -> bool {
        let mut m = self.machine.lock().await;
        if m.state != TurnState::Speaking {
            return false;
        }
        self.interrupt(&mut m);
        true
    }

    /// Abandons whatever is in flight and returns to idle.
    pub async fn reset(&self) {
        let mut m = self.machine.lock().await;
        self.interrupt(&mut m);
        m.last_error = None;
    }

    pub async fn select_conversation(&self, id: &str) -> Result<Conversation, TurnError> {
        let mut m = self.machine.lock().await;
        self.require_settled(&mut m)?;
        Ok(self.chat.select_conversation(id).await?)
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, TurnError> {
        let mut m = self.machine.lock().await;
        self.require_settled(&mut m)?;
        Ok(self.chat.create_conversation(user_id, title).await?)
    }

    pub async fn delete_conversation(&self) -> Result<(), TurnError> {
        let mut m = self.machine.lock().await;
        self.require_settled(&mut m)?;
        Ok(self.chat.delete_current().await?)
    }

    /// Conversation changes are allowed from idle, and from speaking after
    /// the playback is stopped.
    fn require_settled(&self, m: &mut Machine) -> Result<(), TurnError> {
        match m.state {
            TurnState::Idle => Ok(()),
            TurnState::Speaking => {
                self.interrupt(m);
                Ok(())
            }
            busy => Err(TurnError::Busy(busy)),
        }
    }

    fn interrupt(&self, m: &mut Machine) {
        m.epoch += 1;
        if let Some(mut session) = m.capture.take() {
            session.stop();
        }
        if let Err(e) = m.playback.stop() {
            warn!(error = %e, "failed to stop playback");
        }
        self.enter(m, TurnState::Idle);
    }

    // ------------------------------------------------------------------
    // Recording and barge-in
    // ------------------------------------------------------------------

    fn barge_in(&self, m: &mut Machine, now: Instant) {
        if let Err(e) = m.playback.pause() {
            warn!(error = %e, "pause failed during barge-in");
        }
        m.epoch += 1;
        if let Some(session) = m.capture.as_mut() {
            session.restart(now);
        }
        m.last_error = None;
        self.enter(m, TurnState::Recording);
        info!("🛑 Barge-in: playback paused, recording");
    }

    fn close_recording(&self, m: &mut Machine) -> Option<(u64, AudioBlob)> {
        if m.state != TurnState::Recording {
            return None;
        }
        match m.capture.take().and_then(|mut session| session.stop()) {
            Some(blob) => {
                self.enter(m, TurnState::Transcribing);
                Some((m.epoch, blob))
            }
            None => {
                self.enter(m, TurnState::Idle);
                None
            }
        }
    }

    /// Boxed: the loop awaits the stages, which spawn the next loop from `speak`.
    fn run_vad_loop(
        self: Arc<Self>,
        guard: Arc<AtomicBool>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let mut ticker = tokio::time::interval(self.settings.vad.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !guard.load(Ordering::Acquire) {
                    break;
                }
                let job = {
                    let mut m = self.machine.lock().await;
                    if !guard.load(Ordering::Acquire) {
                        break;
                    }
                    let now = Instant::now();
                    let state = m.state;
                    let Some(session) = m.capture.as_mut() else {
                        break;
                    };
                    let signal = session.sample(now);
                    let capped = session.reached_cap(now);
                    match (state, signal) {
                        (TurnState::Recording, _) if capped => {
                            warn!("⏱️ Recording hit the hard cap; stopping");
                            self.close_recording(&mut m)
                        }
                        (TurnState::Recording, Some(VadSignal::Silence)) => {
                            info!("🤫 Silence sustained; stopping recording");
                            self.close_recording(&mut m)
                        }
                        (TurnState::Speaking, Some(VadSignal::Voice { level }))
                            if self.settings.turn.barge_in =>
                        {
                            debug!(level, "voice while speaking");
                            self.barge_in(&mut m, now);
                            None
                        }
                        _ => None,
                    }
                };
                if let Some((epoch, blob)) = job {
                    return self.process_audio(epoch, blob).await;
                }
            }
            debug!("VAD polling stopped");
        })
    }

    // ------------------------------------------------------------------
    // Remote stages
    // ------------------------------------------------------------------

    async fn process_audio(self: Arc<Self>, epoch: u64, blob: AudioBlob) {
        let Some(voice) = &self.voice else {
            return;
        };
        let Some(conversation_id) = self.chat.current_id().await else {
            self.settle(epoch).await;
            return;
        };
        let history = self.chat.history(self.history_limit()).await;

        debug!(bytes = blob.bytes.len(), duration = ?blob.duration, "sending recording to STT");
        let transcript = match voice.stt.transcribe(&blob).await {
            Ok(t) => t,
            Err(e) => {
                return self
                    .fail(epoch, &conversation_id, Stage::Transcription, e)
                    .await
            }
        };
        let transcript = transcript.trim();
        if transcript.is_empty() {
            info!("🤷 Empty transcript; nothing to answer");
            self.settle(epoch).await;
            return;
        }
        if !self.is_current(epoch).await {
            debug!(epoch, "dropping stale transcript");
            return;
        }
        if !self
            .append(epoch, &conversation_id, NewMessage::user(transcript))
            .await
        {
            self.settle(epoch).await;
            return;
        }
        if !self.advance(epoch, TurnState::Generating).await {
            return;
        }
        self.respond(epoch, &conversation_id, transcript, history)
            .await;
    }

    async fn respond(
        self: &Arc<Self>,
        epoch: u64,
        conversation_id: &str,
        prompt: &str,
        history: Vec<HistoryMessage>,
    ) {
        let reply = match self.llm.complete(prompt, &history).await {
            Ok(reply) => reply,
            Err(e) => return self.fail(epoch, conversation_id, Stage::Generation, e).await,
        };
        if !self.is_current(epoch).await {
            debug!(epoch, "dropping stale reply");
            return;
        }
        if !self
            .append(epoch, conversation_id, NewMessage::assistant(reply.clone()))
            .await
        {
            self.settle(epoch).await;
            return;
        }
        if !self.advance(epoch, TurnState::Synthesizing).await {
            return;
        }

        let audio = match self
            .tts
            .synthesize(&reply, &self.settings.services.language)
            .await
        {
            Ok(audio) => audio,
            Err(e) => return self.fail(epoch, conversation_id, Stage::Synthesis, e).await,
        };
        if audio.is_empty() {
            info!("TTS returned no audio; skipping playback");
            self.settle(epoch).await;
            return;
        }
        self.speak(epoch, audio).await;
    }

    /// Converts a stage failure into one assistant message and falls back to idle.
    async fn fail(&self, epoch: u64, conversation_id: &str, stage: Stage, err: VoiceError) {
        if !self.is_current(epoch).await {
            debug!(%stage, error = %err, "stale stage failure ignored");
            return;
        }
        warn!(%stage, error = %err, "❌ Turn stage failed");
        let kind = match (&err, stage) {
            (VoiceError::Configuration(_), _) => FailureKind::MissingCredential,
            (_, Stage::Transcription) => FailureKind::Transcription,
            (_, Stage::Generation) => FailureKind::Generation,
            (_, Stage::Synthesis) => FailureKind::Synthesis,
        };
        let text = self
            .settings
            .turn
            .locale
            .failure_message(kind, &err.detail());
        self.append(epoch, conversation_id, NewMessage::assistant(text))
            .await;

        let mut m = self.machine.lock().await;
        if m.epoch == epoch {
            m.last_error = Some(err.to_string());
            self.enter(&mut m, TurnState::Idle);
        }
    }

    /// Appends to the turn's conversation. False if the conversation changed
    /// underneath the turn; a failed write still counts as appended.
    async fn append(&self, epoch: u64, conversation_id: &str, message: NewMessage) -> bool {
        match self.chat.append_to(conversation_id, message).await {
            Ok(_) => true,
            Err(ChatError::Persistence(e)) => {
                let mut m = self.machine.lock().await;
                if m.epoch == epoch {
                    m.last_error = Some(e.to_string());
                }
                true
            }
            Err(e) => {
                debug!(error = %e, "message dropped");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    async fn speak(self: &Arc<Self>, epoch: u64, audio: Vec<u8>) {
        let mut m = self.machine.lock().await;
        if m.epoch != epoch || m.state != TurnState::Synthesizing {
            debug!(epoch, "dropping stale audio");
            return;
        }
        let events = match m.playback.load(audio) {
            Ok(events) => events,
            Err(e) => return self.playback_failed(&mut m, &e.detail()),
        };
        if let Err(e) = m.playback.play() {
            return self.playback_failed(&mut m, &e.detail());
        }
        self.enter(&mut m, TurnState::Speaking);

        if self.settings.turn.barge_in {
            if let Some(voice) = &self.voice {
                if let Some(mut previous) = m.capture.take() {
                    previous.stop();
                }
                match AudioCaptureSession::start(
                    voice.microphone.as_ref(),
                    &self.settings,
                    CaptureMode::Monitoring,
                    Instant::now(),
                )
                .await
                {
                    Ok(session) => {
                        let guard = session.guard();
                        m.capture = Some(session);
                        tokio::spawn(self.clone().run_vad_loop(guard));
                    }
                    Err(e) => warn!(error = %e, "barge-in monitor unavailable"),
                }
            }
        }
        drop(m);
        tokio::spawn(self.clone().watch_playback(epoch, events));
    }

    async fn watch_playback(
        self: Arc<Self>,
        epoch: u64,
        mut events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                PlaybackEvent::Started => debug!(epoch, "playback started"),
                PlaybackEvent::Ended => return self.finish_speaking(epoch, None).await,
                PlaybackEvent::Failed(reason) => {
                    return self.finish_speaking(epoch, Some(reason)).await
                }
            }
        }
        // Output dropped the source without reporting an end.
        self.finish_speaking(epoch, Some("playback channel closed".to_string()))
            .await;
    }

    async fn finish_speaking(&self, epoch: u64, failure: Option<String>) {
        let mut m = self.machine.lock().await;
        if m.epoch != epoch || m.state != TurnState::Speaking {
            return;
        }
        if let Some(mut monitor) = m.capture.take() {
            monitor.stop();
        }
        match failure {
            None => {
                m.playback.mark_finished();
                info!("✅ Response finished playing");
                self.enter(&mut m, TurnState::Idle);
            }
            Some(reason) => self.playback_failed(&mut m, &reason),
        }
    }

    fn playback_failed(&self, m: &mut Machine, detail: &str) {
        warn!(detail, "🔇 Playback failed");
        if let Some(mut session) = m.capture.take() {
            session.stop();
        }
        if let Err(e) = m.playback.stop() {
            debug!(error = %e, "stop after playback failure");
        }
        m.playback.mark_finished();
        m.last_error = Some(
            self.settings
                .turn
                .locale
                .failure_message(FailureKind::Playback, detail),
        );
        self.enter(m, TurnState::Idle);
    }
}
