//! Microphone capture sessions.
//!
//! An [`AudioCaptureSession`] owns one open input stream for the lifetime of a
//! recording, plus the analysis state the VAD reads. Stopping finalizes the
//! buffered chunks into one WAV blob and releases the device; it is a no-op
//! after the first call.

use crate::analyser::SpectrumAnalyser;
use crate::config::VoiceSettings;
use crate::error::VoiceResult;
use crate::vad::{VadSignal, VoiceActivityDetector};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Source of input streams. Opening may prompt for permission.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Fails with `VoiceError::DeviceAccess` when permission is denied or no device exists.
    async fn open(&self) -> VoiceResult<Box<dyn InputStream>>;
}

/// A live mono f32 input stream.
pub trait InputStream: Send {
    fn sample_rate(&self) -> u32;

    /// Samples captured since the previous call.
    fn read(&mut self) -> Vec<f32>;

    /// Stops all underlying tracks. Must be safe to call more than once.
    fn release(&mut self);
}

/// Finalized recording handed to speech-to-text.
#[derive(Debug, Clone)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub file_name: &'static str,
    pub sample_rate: u32,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Chunks are buffered for the blob.
    Recording,
    /// Only the VAD sees the audio (listening for barge-in while speaking).
    Monitoring,
}

pub struct AudioCaptureSession {
    stream: Box<dyn InputStream>,
    sample_rate: u32,
    chunks: Vec<Vec<f32>>,
    /// Most recent monitored audio, at most `pre_roll_cap` samples.
    pre_roll: VecDeque<f32>,
    pre_roll_cap: usize,
    analyser: SpectrumAnalyser,
    vad: VoiceActivityDetector,
    mode: CaptureMode,
    started_at: Instant,
    max_duration: Duration,
    active: Arc<AtomicBool>,
    finished: bool,
}

impl AudioCaptureSession {
    /// Opens the microphone and starts a session.
    pub async fn start(
        microphone: &dyn Microphone,
        settings: &VoiceSettings,
        mode: CaptureMode,
        now: Instant,
    ) -> VoiceResult<Self> {
        let stream = microphone.open().await?;
        let sample_rate = stream.sample_rate();
        info!(?mode, sample_rate, "🎤 Capture session started");
        Ok(Self {
            stream,
            sample_rate,
            chunks: Vec::new(),
            pre_roll: VecDeque::new(),
            pre_roll_cap: settings.capture.pre_roll_samples(sample_rate),
            analyser: SpectrumAnalyser::new(&settings.vad),
            vad: VoiceActivityDetector::new(&settings.vad, now),
            mode,
            started_at: now,
            max_duration: settings.capture.max_recording(),
            active: Arc::new(AtomicBool::new(true)),
            finished: false,
        })
    }

    /// Flag cleared when the session stops; polling loops check it each tick.
    pub fn guard(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.duration_since(self.started_at)
    }

    /// True once a recording has run for the hard ceiling. Monitoring has no ceiling.
    pub fn reached_cap(&self, now: Instant) -> bool {
        self.mode == CaptureMode::Recording && self.elapsed(now) >= self.max_duration
    }

    /// Pulls new audio, buffers it (whole when recording, the pre-roll tail
    /// when monitoring), and runs one VAD tick.
    pub fn sample(&mut self, now: Instant) -> Option<VadSignal> {
        if self.finished {
            return None;
        }
        let samples = self.stream.read();
        if !samples.is_empty() {
            self.analyser.push(&samples);
            match self.mode {
                CaptureMode::Recording => self.chunks.push(samples),
                CaptureMode::Monitoring => self.keep_pre_roll(&samples),
            }
        }
        let bins = self.analyser.frequency_data();
        self.vad.process(&bins, now)
    }

    fn keep_pre_roll(&mut self, samples: &[f32]) {
        self.pre_roll.extend(samples.iter().copied());
        let excess = self.pre_roll.len().saturating_sub(self.pre_roll_cap);
        self.pre_roll.drain(..excess);
    }

    /// Turns the session into a fresh recording seeded with the pre-roll.
    /// Silence window and hard ceiling restart at `now`. The device stays open.
    pub fn restart(&mut self, now: Instant) {
        self.chunks.clear();
        if !self.pre_roll.is_empty() {
            self.chunks.push(self.pre_roll.drain(..).collect());
        }
        self.mode = CaptureMode::Recording;
        self.started_at = now;
        self.vad.reset(now);
        debug!("capture session restarted as recording");
    }

    /// Releases the device. Returns the finalized blob on the first call of a
    /// recording, `None` afterwards or for a monitoring session.
    pub fn stop(&mut self) -> Option<AudioBlob> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.active.store(false, Ordering::Release);

        if self.mode == CaptureMode::Recording {
            let tail = self.stream.read();
            if !tail.is_empty() {
                self.chunks.push(tail);
            }
        }
        self.stream.release();

        let chunks = std::mem::take(&mut self.chunks);
        if self.mode != CaptureMode::Recording {
            debug!("monitoring session released");
            return None;
        }
        let samples: Vec<f32> = chunks.into_iter().flatten().collect();
        let duration = Duration::from_secs_f64(samples.len() as f64 / self.sample_rate.max(1) as f64);
        info!(samples = samples.len(), ?duration, "⏹️ Recording finalized");
        Some(AudioBlob {
            bytes: pcm_f32_to_wav(&samples, self.sample_rate),
            mime_type: "audio/wav",
            file_name: "recording.wav",
            sample_rate: self.sample_rate,
            duration,
        })
    }
}

impl Drop for AudioCaptureSession {
    fn drop(&mut self) {
        if !self.finished {
            self.active.store(false, Ordering::Release);
            self.stream.release();
        }
    }
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for upload.
pub fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let clamped = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
        buf.extend_from_slice(&((clamped * 32767.0).round() as i16).to_le_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct ConstStream {
        value: f32,
        released: Arc<AtomicUsize>,
    }

    impl InputStream for ConstStream {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn read(&mut self) -> Vec<f32> {
            vec![self.value; 160]
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ConstMic {
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Microphone for ConstMic {
        async fn open(&self) -> VoiceResult<Box<dyn InputStream>> {
            Ok(Box::new(ConstStream {
                value: 0.25,
                released: self.released.clone(),
            }))
        }
    }

    const NOISE_FRAME: usize = 256;

    /// Loud white noise, one analyser frame per read.
    struct NoiseStream {
        seed: u32,
    }

    impl InputStream for NoiseStream {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn read(&mut self) -> Vec<f32> {
            (0..NOISE_FRAME)
                .map(|_| {
                    self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    (((self.seed >> 16) as f32 / 32_768.0) - 1.0) * 0.8
                })
                .collect()
        }

        fn release(&mut self) {}
    }

    struct NoiseMic;

    #[async_trait]
    impl Microphone for NoiseMic {
        async fn open(&self) -> VoiceResult<Box<dyn InputStream>> {
            Ok(Box::new(NoiseStream { seed: 0x1234_5678 }))
        }
    }

    async fn session(mode: CaptureMode) -> (AudioCaptureSession, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let mic = ConstMic {
            released: released.clone(),
        };
        let s = AudioCaptureSession::start(&mic, &VoiceSettings::default(), mode, Instant::now())
            .await
            .unwrap();
        (s, released)
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_once() {
        let (mut s, released) = session(CaptureMode::Recording).await;
        let guard = s.guard();
        s.sample(Instant::now());
        let blob = s.stop().expect("first stop yields a blob");
        assert_eq!(blob.mime_type, "audio/wav");
        // one sampled chunk + tail read, 160 samples each
        assert_eq!(blob.bytes.len(), 44 + 320 * 2);
        assert!(s.stop().is_none());
        assert!(!guard.load(Ordering::SeqCst));
        drop(s);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restart_seeds_the_recording_with_monitored_audio() {
        let (mut s, _) = session(CaptureMode::Monitoring).await;
        for _ in 0..5 {
            s.sample(Instant::now());
        }
        s.restart(Instant::now());
        assert_eq!(s.mode(), CaptureMode::Recording);
        s.sample(Instant::now());
        let blob = s.stop().unwrap();
        // 5 monitored chunks + one recorded chunk + tail read
        assert_eq!(blob.bytes.len(), 44 + 160 * 7 * 2);
    }

    #[tokio::test]
    async fn pre_roll_keeps_only_the_newest_audio() {
        let mut settings = VoiceSettings::default();
        settings.capture.pre_roll_ms = 20;
        let mic = ConstMic {
            released: Arc::new(AtomicUsize::new(0)),
        };
        let mut s =
            AudioCaptureSession::start(&mic, &settings, CaptureMode::Monitoring, Instant::now())
                .await
                .unwrap();
        for _ in 0..10 {
            s.sample(Instant::now());
        }
        s.restart(Instant::now());
        let blob = s.stop().unwrap();
        // 320 pre-roll samples + tail read
        assert_eq!(blob.bytes.len(), 44 + 480 * 2);
    }

    #[tokio::test]
    async fn barge_in_recording_keeps_the_triggering_speech() {
        let mic = NoiseMic;
        let mut s = AudioCaptureSession::start(
            &mic,
            &VoiceSettings::default(),
            CaptureMode::Monitoring,
            Instant::now(),
        )
        .await
        .unwrap();

        let mut heard = 0;
        loop {
            heard += NOISE_FRAME;
            if let Some(VadSignal::Voice { .. }) = s.sample(Instant::now()) {
                break;
            }
            assert!(heard < NOISE_FRAME * 100, "noise never detected as voice");
        }
        s.restart(Instant::now());
        let blob = s.stop().unwrap();

        // Everything heard before detection fits in the pre-roll.
        assert!(heard <= VoiceSettings::default().capture.pre_roll_samples(16_000));
        let recorded = (blob.bytes.len() - 44) / 2;
        assert_eq!(recorded, heard + NOISE_FRAME);
        let first = i16::from_le_bytes([blob.bytes[44], blob.bytes[45]]);
        let onset = NoiseStream { seed: 0x1234_5678 }.read()[0];
        assert_eq!(first, (onset * 32767.0).round() as i16);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_cap_applies_to_recordings_only() {
        let (rec, _) = session(CaptureMode::Recording).await;
        let (mon, _) = session(CaptureMode::Monitoring).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(rec.reached_cap(Instant::now()));
        assert!(!mon.reached_cap(Instant::now()));
    }

    #[tokio::test]
    async fn dropping_an_unstopped_session_releases_the_device() {
        let (s, released) = session(CaptureMode::Recording).await;
        drop(s);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wav_header_describes_mono_16_bit() {
        let wav = pcm_f32_to_wav(&[0.0, 1.0, -1.0, 2.0], 16_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 8);
        assert_eq!(i16::from_le_bytes([wav[46], wav[47]]), 32767);
        assert_eq!(i16::from_le_bytes([wav[50], wav[51]]), 32767);
    }
}
