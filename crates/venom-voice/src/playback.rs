//! Playback of synthesized responses.
//!
//! [`AudioOutput`] is the device seam. [`PlaybackSession`] holds at most one
//! loaded response, replaces it on each `load`, and makes `play`, `pause` and
//! `stop` idempotent. Every call is a non-blocking command so barge-in can
//! pause from inside the VAD tick.

use crate::error::VoiceResult;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle notifications for one loaded source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started,
    Ended,
    Failed(String),
}

/// An audio sink that plays one source at a time.
pub trait AudioOutput: Send + Sync {
    /// Replaces the current source. Events for the new source arrive on the returned channel.
    fn load(&self, audio: Vec<u8>) -> VoiceResult<mpsc::UnboundedReceiver<PlaybackEvent>>;
    fn play(&self) -> VoiceResult<()>;
    fn pause(&self) -> VoiceResult<()>;
    fn stop(&self) -> VoiceResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Empty,
    Loaded,
    Playing,
    Paused,
    Stopped,
}

pub struct PlaybackSession {
    output: std::sync::Arc<dyn AudioOutput>,
    status: PlaybackStatus,
}

impl PlaybackSession {
    pub fn new(output: std::sync::Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            status: PlaybackStatus::Empty,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    /// Replaces whatever was loaded. The previous source is stopped, not layered.
    pub fn load(&mut self, audio: Vec<u8>) -> VoiceResult<mpsc::UnboundedReceiver<PlaybackEvent>> {
        if matches!(
            self.status,
            PlaybackStatus::Loaded | PlaybackStatus::Playing | PlaybackStatus::Paused
        ) {
            if let Err(e) = self.output.stop() {
                warn!(error = %e, "failed to stop previous playback");
            }
        }
        let bytes = audio.len();
        let events = self.output.load(audio)?;
        self.status = PlaybackStatus::Loaded;
        debug!(bytes, "playback source loaded");
        Ok(events)
    }

    pub fn play(&mut self) -> VoiceResult<()> {
        match self.status {
            PlaybackStatus::Loaded | PlaybackStatus::Paused => {
                self.output.play()?;
                self.status = PlaybackStatus::Playing;
                info!("🔊 Playback started");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn pause(&mut self) -> VoiceResult<()> {
        if self.status == PlaybackStatus::Playing {
            self.output.pause()?;
            self.status = PlaybackStatus::Paused;
            info!("⏸️ Playback paused");
        }
        Ok(())
    }

    pub fn stop(&mut self) -> VoiceResult<()> {
        match self.status {
            PlaybackStatus::Loaded | PlaybackStatus::Playing | PlaybackStatus::Paused => {
                self.status = PlaybackStatus::Stopped;
                self.output.stop()?;
                info!("⏹️ Playback stopped");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Records that the source played to the end (or failed) on its own.
    pub fn mark_finished(&mut self) {
        if self.status != PlaybackStatus::Empty {
            self.status = PlaybackStatus::Stopped;
        }
    }
}

/// Output that plays nothing and reports the source as finished immediately.
#[derive(Debug, Default)]
pub struct NullOutput {
    events: std::sync::Mutex<Option<mpsc::UnboundedSender<PlaybackEvent>>>,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<PlaybackEvent>> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl AudioOutput for NullOutput {
    fn load(&self, _audio: Vec<u8>) -> VoiceResult<mpsc::UnboundedReceiver<PlaybackEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }

    fn play(&self) -> VoiceResult<()> {
        if let Some(tx) = self.sender() {
            let _ = tx.send(PlaybackEvent::Started);
            let _ = tx.send(PlaybackEvent::Ended);
        }
        Ok(())
    }

    fn pause(&self) -> VoiceResult<()> {
        Ok(())
    }

    fn stop(&self) -> VoiceResult<()> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CountingOutput {
        calls: Mutex<Vec<&'static str>>,
    }

    impl AudioOutput for CountingOutput {
        fn load(&self, _audio: Vec<u8>) -> VoiceResult<mpsc::UnboundedReceiver<PlaybackEvent>> {
            self.calls.lock().unwrap().push("load");
            Ok(mpsc::unbounded_channel().1)
        }
        fn play(&self) -> VoiceResult<()> {
            self.calls.lock().unwrap().push("play");
            Ok(())
        }
        fn pause(&self) -> VoiceResult<()> {
            self.calls.lock().unwrap().push("pause");
            Ok(())
        }
        fn stop(&self) -> VoiceResult<()> {
            self.calls.lock().unwrap().push("stop");
            Ok(())
        }
    }

    #[test]
    fn controls_are_idempotent() {
        let output = Arc::new(CountingOutput::default());
        let mut session = PlaybackSession::new(output.clone());
        session.play().unwrap(); // nothing loaded
        session.load(vec![1, 2, 3]).unwrap();
        session.play().unwrap();
        session.play().unwrap();
        session.pause().unwrap();
        session.pause().unwrap();
        session.stop().unwrap();
        session.stop().unwrap();
        assert_eq!(
            *output.calls.lock().unwrap(),
            vec!["load", "play", "pause", "stop"]
        );
    }

    #[test]
    fn load_replaces_current_source() {
        let output = Arc::new(CountingOutput::default());
        let mut session = PlaybackSession::new(output.clone());
        session.load(vec![1]).unwrap();
        session.play().unwrap();
        session.load(vec![2]).unwrap();
        assert_eq!(session.status(), PlaybackStatus::Loaded);
        assert_eq!(
            *output.calls.lock().unwrap(),
            vec!["load", "play", "stop", "load"]
        );
    }

    #[tokio::test]
    async fn null_output_ends_immediately() {
        let output = Arc::new(NullOutput::new());
        let mut session = PlaybackSession::new(output);
        let mut events = session.load(vec![0; 4]).unwrap();
        session.play().unwrap();
        assert_eq!(events.recv().await, Some(PlaybackEvent::Started));
        assert_eq!(events.recv().await, Some(PlaybackEvent::Ended));
    }
}
