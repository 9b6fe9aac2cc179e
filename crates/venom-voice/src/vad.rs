//! Energy-threshold Voice Activity Detection.
//!
//! Each tick takes the byte spectrum of the live input and averages it. An
//! average above `threshold` is voice; once no voice has been seen for the
//! silence window (counted from session start or the last voice tick) a single
//! `Silence` signal is emitted.

use crate::config::VadSettings;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadSignal {
    /// Average energy above threshold on this tick.
    Voice { level: f32 },
    /// No voice for the whole silence window.
    Silence,
}

/// Average over a byte spectrum. `None` for an empty buffer.
pub fn average_level(bins: &[u8]) -> Option<f32> {
    if bins.is_empty() {
        return None;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    Some(sum as f32 / bins.len() as f32)
}

pub struct VoiceActivityDetector {
    threshold: f32,
    silence: Duration,
    last_voice: Instant,
    silence_reported: bool,
}

impl VoiceActivityDetector {
    pub fn new(settings: &VadSettings, now: Instant) -> Self {
        Self {
            threshold: settings.threshold,
            silence: settings.silence(),
            last_voice: now,
            silence_reported: false,
        }
    }

    /// Restarts the silence window at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.last_voice = now;
        self.silence_reported = false;
    }

    /// One detection tick. Never fails; an empty buffer is skipped.
    pub fn process(&mut self, bins: &[u8], now: Instant) -> Option<VadSignal> {
        let Some(level) = average_level(bins) else {
            debug!("VAD: empty frequency buffer skipped");
            return None;
        };

        if level > self.threshold {
            self.last_voice = now;
            self.silence_reported = false;
            return Some(VadSignal::Voice { level });
        }

        if !self.silence_reported && now.duration_since(self.last_voice) >= self.silence {
            self.silence_reported = true;
            debug!(level, "VAD: silence sustained");
            return Some(VadSignal::Silence);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(now: Instant) -> VoiceActivityDetector {
        VoiceActivityDetector::new(&VadSettings::default(), now)
    }

    #[test]
    fn energy_above_threshold_is_voice() {
        let t0 = Instant::now();
        let mut vad = detector(t0);
        assert_eq!(
            vad.process(&[25; 128], t0),
            Some(VadSignal::Voice { level: 25.0 })
        );
        // Exactly at threshold is not voice.
        assert_eq!(vad.process(&[20; 128], t0), None);
    }

    #[test]
    fn silence_fires_once_after_window() {
        let t0 = Instant::now();
        let mut vad = detector(t0);
        vad.process(&[25; 128], t0);

        let quiet = [3u8; 128];
        assert_eq!(vad.process(&quiet, t0 + Duration::from_millis(1499)), None);
        assert_eq!(
            vad.process(&quiet, t0 + Duration::from_millis(1500)),
            Some(VadSignal::Silence)
        );
        assert_eq!(vad.process(&quiet, t0 + Duration::from_millis(2500)), None);
    }

    #[test]
    fn silence_window_counts_from_start_without_voice() {
        let t0 = Instant::now();
        let mut vad = detector(t0);
        assert_eq!(
            vad.process(&[0; 128], t0 + Duration::from_millis(1600)),
            Some(VadSignal::Silence)
        );
    }

    #[test]
    fn voice_rearms_silence() {
        let t0 = Instant::now();
        let mut vad = detector(t0);
        vad.process(&[0; 128], t0 + Duration::from_secs(2));
        vad.process(&[90; 128], t0 + Duration::from_secs(3));
        assert_eq!(
            vad.process(&[0; 128], t0 + Duration::from_millis(4500)),
            Some(VadSignal::Silence)
        );
    }

    #[test]
    fn empty_buffer_is_skipped() {
        let t0 = Instant::now();
        let mut vad = detector(t0);
        assert_eq!(vad.process(&[], t0 + Duration::from_secs(5)), None);
        assert_eq!(average_level(&[]), None);
    }
}
