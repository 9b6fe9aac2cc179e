//! Native audio devices: CPAL microphone and Rodio speaker output.
//!
//! Both device handles are `!Send` on some platforms, so each lives on a
//! dedicated thread and is driven over channels.

use crate::capture::{InputStream, Microphone};
use crate::error::{VoiceError, VoiceResult};
use crate::playback::{AudioOutput, PlaybackEvent};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use rodio::{Decoder, OutputStream, Sink};
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Seconds of audio kept if nobody drains the capture buffer.
const MAX_BUFFERED_SECS: usize = 10;

type SampleBuffer = Arc<Mutex<Vec<f32>>>;

/// Default input device via CPAL.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> VoiceResult<Box<dyn InputStream>> {
        let buffer: SampleBuffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<VoiceResult<u32>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        // The cpal Stream stays on this thread until release.
        thread::spawn(move || match build_input(sink) {
            Ok((stream, sample_rate)) => {
                let _ = ready_tx.send(Ok(sample_rate));
                let _ = stop_rx.recv();
                drop(stream);
                debug!("capture thread released the input device");
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        });

        let sample_rate = ready_rx
            .await
            .map_err(|_| VoiceError::DeviceAccess("capture thread exited".to_string()))??;
        Ok(Box::new(CpalInputStream {
            buffer,
            sample_rate,
            stop: Some(stop_tx),
        }))
    }
}

fn build_input(sink: SampleBuffer) -> VoiceResult<(cpal::Stream, u32)> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceAccess("No input device available".to_string()))?;
    info!(
        "📱 Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    let config = device
        .default_input_config()
        .map_err(|e| VoiceError::DeviceAccess(e.to_string()))?;
    let channels = config.channels().max(1) as usize;
    let sample_rate = config.sample_rate().0;
    let limit = sample_rate as usize * MAX_BUFFERED_SECS;
    let stream_config: cpal::StreamConfig = config.clone().into();
    let err_fn = |err| warn!("Audio stream error: {}", err);

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push_mono(&sink, data.iter().copied(), channels, limit)
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                push_mono(
                    &sink,
                    data.iter().map(|&s| s as f32 / i16::MAX as f32),
                    channels,
                    limit,
                )
            },
            err_fn,
            None,
        ),
        other => {
            return Err(VoiceError::DeviceAccess(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| VoiceError::DeviceAccess(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoiceError::DeviceAccess(e.to_string()))?;
    info!("✅ Audio capture started ({}Hz, {} channels)", sample_rate, channels);
    Ok((stream, sample_rate))
}

/// Down-mixes interleaved frames to mono and appends them.
fn push_mono(sink: &SampleBuffer, samples: impl Iterator<Item = f32>, channels: usize, limit: usize) {
    let samples: Vec<f32> = samples.collect();
    let mut buf = sink.lock().unwrap_or_else(PoisonError::into_inner);
    for frame in samples.chunks(channels) {
        buf.push(frame.iter().sum::<f32>() / frame.len() as f32);
    }
    if buf.len() > limit {
        let excess = buf.len() - limit;
        buf.drain(..excess);
    }
}

struct CpalInputStream {
    buffer: SampleBuffer,
    sample_rate: u32,
    stop: Option<std_mpsc::Sender<()>>,
}

impl InputStream for CpalInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self) -> Vec<f32> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.release();
    }
}

enum Command {
    Load(Vec<u8>, mpsc::UnboundedSender<PlaybackEvent>),
    Play,
    Pause,
    Stop,
}

/// Default output device via Rodio. One sink per loaded response.
pub struct RodioOutput {
    commands: std_mpsc::Sender<Command>,
}

impl RodioOutput {
    pub fn new() -> VoiceResult<Self> {
        let (commands, rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
        thread::spawn(move || run_output(rx, ready_tx));
        ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("output thread exited".to_string()))??;
        info!("🔊 Audio output ready");
        Ok(Self { commands })
    }

    fn send(&self, command: Command) -> VoiceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| VoiceError::Playback("output thread is gone".to_string()))
    }
}

impl AudioOutput for RodioOutput {
    fn load(&self, audio: Vec<u8>) -> VoiceResult<mpsc::UnboundedReceiver<PlaybackEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::Load(audio, tx))?;
        Ok(rx)
    }

    fn play(&self) -> VoiceResult<()> {
        self.send(Command::Play)
    }

    fn pause(&self) -> VoiceResult<()> {
        self.send(Command::Pause)
    }

    fn stop(&self) -> VoiceResult<()> {
        self.send(Command::Stop)
    }
}

fn run_output(rx: std_mpsc::Receiver<Command>, ready: std_mpsc::Sender<VoiceResult<()>>) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready.send(Err(VoiceError::Playback(e.to_string())));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut sink: Option<Sink> = None;
    let mut events: Option<mpsc::UnboundedSender<PlaybackEvent>> = None;
    let mut playing = false;

    loop {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(Command::Load(bytes, tx)) => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
                playing = false;
                events = None;
                let decoded = Decoder::new(Cursor::new(bytes))
                    .map_err(|e| format!("Decode failed: {}", e));
                let fresh = Sink::try_new(&handle).map_err(|e| e.to_string());
                match (fresh, decoded) {
                    (Ok(s), Ok(source)) => {
                        s.pause();
                        s.append(source);
                        sink = Some(s);
                        events = Some(tx);
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        let _ = tx.send(PlaybackEvent::Failed(e));
                    }
                }
            }
            Ok(Command::Play) => {
                if let Some(s) = &sink {
                    s.play();
                    if !playing {
                        playing = true;
                        if let Some(tx) = &events {
                            let _ = tx.send(PlaybackEvent::Started);
                        }
                    }
                }
            }
            Ok(Command::Pause) => {
                if let Some(s) = &sink {
                    s.pause();
                }
            }
            Ok(Command::Stop) => {
                if let Some(s) = sink.take() {
                    s.stop();
                }
                events = None;
                playing = false;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if playing && sink.as_ref().is_some_and(|s| s.empty()) {
            playing = false;
            sink = None;
            if let Some(tx) = events.take() {
                let _ = tx.send(PlaybackEvent::Ended);
            }
        }
    }
    debug!("output thread finished");
}
