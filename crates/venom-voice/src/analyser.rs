//! Byte frequency spectrum over the most recent samples.
//!
//! Mirrors the analyser-node model the VAD threshold is tuned against: a
//! Hann-windowed DFT of the last `fft_size` samples, magnitudes smoothed over
//! time, converted to decibels and mapped linearly onto `0..=255` between
//! `min_decibels` and `max_decibels`.

use crate::config::VadSettings;
use std::collections::VecDeque;
use std::f32::consts::PI;

pub struct SpectrumAnalyser {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    window: Vec<f32>,
    samples: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new(settings: &VadSettings) -> Self {
        let fft_size = settings.fft_size.max(32);
        let window = (0..fft_size)
            .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f32 / fft_size as f32).cos()))
            .collect();
        Self {
            fft_size,
            smoothing: settings.smoothing.clamp(0.0, 1.0),
            min_decibels: settings.min_decibels,
            max_decibels: settings.max_decibels.max(settings.min_decibels + 1.0),
            window,
            samples: VecDeque::with_capacity(fft_size),
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    /// Number of frequency bins (`fft_size / 2`).
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feeds captured samples. Non-finite samples count as silence.
    pub fn push(&mut self, input: &[f32]) {
        let skip = input.len().saturating_sub(self.fft_size);
        for &s in &input[skip..] {
            if self.samples.len() == self.fft_size {
                self.samples.pop_front();
            }
            self.samples.push_back(if s.is_finite() { s } else { 0.0 });
        }
    }

    /// Forgets buffered samples and smoothing history.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Current byte spectrum; one value per bin.
    pub fn frequency_data(&mut self) -> Vec<u8> {
        let n = self.fft_size;
        // Left-pad with silence until a full frame has been captured.
        let pad = n - self.samples.len();
        let frame: Vec<f32> = std::iter::repeat(0.0)
            .take(pad)
            .chain(self.samples.iter().copied())
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();

        let range = self.max_decibels - self.min_decibels;
        let mut out = Vec::with_capacity(self.bin_count());
        for k in 0..self.bin_count() {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (i, &x) in frame.iter().enumerate() {
                let angle = 2.0 * PI * (k * i % n) as f32 / n as f32;
                re += x * angle.cos();
                im -= x * angle.sin();
            }
            let magnitude = (re * re + im * im).sqrt() / n as f32;
            let value = self.smoothing * self.smoothed[k] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[k] = if value.is_finite() { value } else { 0.0 };

            let db = 20.0 * self.smoothed[k].log10();
            let scaled = 255.0 / range * (db - self.min_decibels);
            out.push(if scaled.is_finite() {
                scaled.clamp(0.0, 255.0) as u8
            } else {
                0
            });
        }
        out
    }
}
