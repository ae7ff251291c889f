use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AgentError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One recorded utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Source of single utterances for voice input.
#[async_trait]
pub trait UtteranceRecorder: Send + Sync {
    async fn record_utterance(&self) -> Result<AudioClip>;
}

/// Where an utterance starts and ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtteranceLimits {
    /// RMS level above which a frame counts as speech.
    pub speech_threshold: f32,
    /// Silence after speech that ends the utterance.
    pub trailing_silence: Duration,
    /// Give up if nobody speaks within this long.
    pub lead_in: Duration,
    pub max_length: Duration,
}

impl Default for UtteranceLimits {
    fn default() -> Self {
        Self {
            speech_threshold: 0.02,
            trailing_silence: Duration::from_millis(1200),
            lead_in: Duration::from_secs(8),
            max_length: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Listening,
    Ended,
    NoSpeech,
    TooLong,
}

/// Energy-based end-of-utterance detection over mono samples.
#[derive(Debug)]
pub struct Endpointer {
    limits: UtteranceLimits,
    frame_len: usize,
    sample_rate: u32,
    heard_speech: bool,
    silence_run: usize,
    total: usize,
}

fn samples_in(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * sample_rate as f64) as usize
}

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

impl Endpointer {
    pub fn new(limits: UtteranceLimits, sample_rate: u32) -> Self {
        Self {
            limits,
            // 20ms frames
            frame_len: (sample_rate as usize / 50).max(1),
            sample_rate,
            heard_speech: false,
            silence_run: 0,
            total: 0,
        }
    }

    pub fn feed(&mut self, samples: &[f32]) -> Endpoint {
        for frame in samples.chunks(self.frame_len) {
            self.total += frame.len();
            if rms(frame) >= self.limits.speech_threshold {
                self.heard_speech = true;
                self.silence_run = 0;
            } else if self.heard_speech {
                self.silence_run += frame.len();
            }

            if self.heard_speech
                && self.silence_run >= samples_in(self.limits.trailing_silence, self.sample_rate)
            {
                return Endpoint::Ended;
            }
            if !self.heard_speech && self.total >= samples_in(self.limits.lead_in, self.sample_rate) {
                return Endpoint::NoSpeech;
            }
            if self.total >= samples_in(self.limits.max_length, self.sample_rate) {
                return Endpoint::TooLong;
            }
        }
        Endpoint::Listening
    }
}

/// 16-bit mono WAV, the format the transcription call receives.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|e| AgentError::Audio(format!("WAV error: {}", e)))?;
    for &sample in samples {
        let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer
            .write_sample(s)
            .map_err(|e| AgentError::Audio(format!("WAV write error: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| AgentError::Audio(format!("WAV finalize error: {}", e)))?;

    Ok(cursor.into_inner())
}

fn downmix<T: Copy>(data: &[T], channels: usize, to_f32: impl Fn(T) -> f32) -> Vec<f32> {
    data.chunks(channels.max(1))
        .map(|frame| frame.iter().map(|&s| to_f32(s)).sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Records one utterance from the default input device.
#[derive(Debug, Clone, Default)]
pub struct MicrophoneRecorder {
    limits: UtteranceLimits,
}

impl MicrophoneRecorder {
    /// `None` when the host has no input device.
    pub fn detect() -> Option<Self> {
        let device = cpal::default_host().default_input_device()?;
        log::info!(
            "Voice input device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );
        Some(Self::default())
    }
}

/// Sets the stop flag when the recording future is dropped, so an aborted
/// capture releases the device.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl UtteranceRecorder for MicrophoneRecorder {
    async fn record_utterance(&self) -> Result<AudioClip> {
        let stop = Arc::new(AtomicBool::new(false));
        let _stop_on_drop = StopOnDrop(stop.clone());
        let limits = self.limits;

        let (samples, sample_rate) = tokio::task::spawn_blocking(move || capture_blocking(limits, &stop))
            .await
            .map_err(|e| AgentError::Audio(format!("capture thread failed: {}", e)))??;

        log::debug!(
            "Captured {:.1}s of audio at {}Hz",
            samples.len() as f32 / sample_rate as f32,
            sample_rate
        );
        Ok(AudioClip {
            bytes: encode_wav(&samples, sample_rate)?,
            mime_type: "audio/wav".to_string(),
        })
    }
}

/// Runs on a blocking thread; `cpal::Stream` is not `Send` so it is built and
/// dropped here.
fn capture_blocking(limits: UtteranceLimits, stop: &AtomicBool) -> Result<(Vec<f32>, u32)> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| AgentError::CapabilityUnavailable("Microphone input".to_string()))?;
    let config = device
        .default_input_config()
        .map_err(|e| AgentError::Audio(format!("Failed to get input config: {}", e)))?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = buffer.clone();
    let on_error = |err: cpal::StreamError| log::error!("Audio stream error: {}", err);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                sink.lock().extend(downmix(data, channels, |s| s));
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                sink.lock().extend(downmix(data, channels, |s| s as f32 / 32768.0));
            },
            on_error,
            None,
        ),
        format => {
            return Err(AgentError::Audio(format!("Unsupported sample format: {:?}", format)));
        }
    }
    .map_err(|e| AgentError::Audio(format!("Failed to build stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| AgentError::Audio(format!("Failed to start stream: {}", e)))?;

    let mut endpointer = Endpointer::new(limits, sample_rate);
    let mut consumed = 0;
    let endpoint = loop {
        if stop.load(Ordering::SeqCst) {
            return Err(AgentError::Audio("capture stopped".to_string()));
        }
        std::thread::sleep(POLL_INTERVAL);

        let samples = buffer.lock();
        let endpoint = endpointer.feed(&samples[consumed..]);
        consumed = samples.len();
        if endpoint != Endpoint::Listening {
            break endpoint;
        }
    };
    drop(stream);

    if endpoint == Endpoint::NoSpeech {
        return Err(AgentError::Audio("no speech detected".to_string()));
    }
    let samples = std::mem::take(&mut *buffer.lock());
    Ok((samples, sample_rate))
}
