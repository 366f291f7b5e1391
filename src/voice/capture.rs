//! Microphone capture
//!
//! cpal streams are not `Send`, so each capture runs on its own thread and
//! hands raw samples to the async side over a channel. Samples are mixed
//! down to mono, resampled to the decoder rate when the device cannot run
//! at it, and cut into fixed-length frames.

use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tokio::sync::{mpsc, oneshot};

use super::silence::{DEFAULT_ENERGY_THRESHOLD, SilenceDetector};
use crate::session::{AudioEvent, AudioSource};
use crate::{Error, Result};

/// Frame length handed to the session
const FRAME_DURATION: Duration = Duration::from_millis(100);

/// Resampler input chunk size
const RESAMPLE_CHUNK: usize = 1024;

/// Microphone options
#[derive(Debug, Clone, Default)]
pub struct MicrophoneConfig {
    /// Input device name; the host default when unset
    pub device: Option<String>,
    /// Report [`AudioEvent::Silence`] after speech, using this RMS threshold
    pub silence_threshold: Option<f32>,
}

/// Running capture thread
struct Capture {
    stop: std_mpsc::Sender<()>,
    samples: mpsc::UnboundedReceiver<Vec<f32>>,
    thread: Option<thread::JoinHandle<()>>,
    resampler: Option<ChunkResampler>,
}

impl Capture {
    fn stop(mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            tracing::warn!("audio capture thread panicked");
        }
    }
}

/// [`AudioSource`] backed by a cpal input device
pub struct MicrophoneSource {
    config: MicrophoneConfig,
    capture: Option<Capture>,
    sample_rate: u32,
    frame_len: usize,
    pending: Vec<i16>,
    detector: Option<SilenceDetector>,
    silence_pending: bool,
}

impl MicrophoneSource {
    #[must_use]
    pub fn new(config: MicrophoneConfig) -> Self {
        Self {
            config,
            capture: None,
            sample_rate: 0,
            frame_len: 0,
            pending: Vec::new(),
            detector: None,
            silence_pending: false,
        }
    }

    /// Names of the available input devices
    ///
    /// # Errors
    ///
    /// Returns error if the audio host cannot enumerate devices
    pub fn input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| Error::Audio(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn stop_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
            tracing::debug!("audio capture stopped");
        }
        self.pending.clear();
        self.silence_pending = false;
        if let Some(detector) = self.detector.as_mut() {
            detector.reset();
        }
    }

    fn next_frame(&mut self) -> Option<Vec<i16>> {
        if self.frame_len == 0 || self.pending.len() < self.frame_len {
            return None;
        }
        let frame: Vec<i16> = self.pending.drain(..self.frame_len).collect();
        if let Some(detector) = self.detector.as_mut()
            && detector.process(&frame)
        {
            self.silence_pending = true;
        }
        Some(frame)
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    async fn start(&mut self, sample_rate: u32) -> Result<()> {
        if self.capture.is_some() && self.sample_rate == sample_rate {
            return Ok(());
        }
        self.stop_capture();

        let device_name = self.config.device.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                capture_thread(device_name.as_deref(), sample_rate, &samples_tx, ready_tx, &stop_rx);
            })
            .map_err(|e| Error::Audio(format!("failed to spawn capture thread: {e}")))?;

        let device_rate = match ready_rx.await {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::Audio("capture thread exited during startup".to_string()));
            }
        };

        let resampler = if device_rate == sample_rate {
            None
        } else {
            Some(ChunkResampler::new(device_rate, sample_rate)?)
        };

        self.sample_rate = sample_rate;
        self.frame_len = frame_len(sample_rate);
        self.detector = self
            .config
            .silence_threshold
            .map(|threshold| SilenceDetector::new(sample_rate, threshold));
        self.capture = Some(Capture {
            stop: stop_tx,
            samples: samples_rx,
            thread: Some(handle),
            resampler,
        });

        tracing::debug!(device_rate, sample_rate, "audio capture started");
        Ok(())
    }

    async fn next_event(&mut self) -> Result<AudioEvent> {
        loop {
            if self.silence_pending {
                self.silence_pending = false;
                return Ok(AudioEvent::Silence);
            }
            if let Some(frame) = self.next_frame() {
                return Ok(AudioEvent::Frame(frame));
            }

            let Some(capture) = self.capture.as_mut() else {
                return Err(Error::Audio("audio capture not started".to_string()));
            };
            let Some(raw) = capture.samples.recv().await else {
                return Err(Error::Audio("audio capture stopped unexpectedly".to_string()));
            };

            let samples = match capture.resampler.as_mut() {
                Some(resampler) => resampler.process(&raw)?,
                None => raw,
            };
            self.pending.extend(samples.iter().map(|&s| to_i16(s)));
        }
    }

    async fn pause(&mut self) {
        self.stop_capture();
    }
}

/// Body of the capture thread; reports the device rate once streaming
fn capture_thread(
    device_name: Option<&str>,
    wanted_rate: u32,
    samples: &mpsc::UnboundedSender<Vec<f32>>,
    ready: oneshot::Sender<Result<u32>>,
    stop: &std_mpsc::Receiver<()>,
) {
    let stream = match open_stream(device_name, wanted_rate, samples.clone()) {
        Ok((stream, rate)) => {
            let _ = ready.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Blocks until pause or the source is dropped
    let _ = stop.recv();
    drop(stream);
}

fn open_stream(
    device_name: Option<&str>,
    wanted_rate: u32,
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| Error::Audio(format!("input device not found: {name}")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?,
    };

    // Prefer running the device at the decoder rate; otherwise resample
    let native = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.min_sample_rate() <= SampleRate(wanted_rate)
                && c.max_sample_rate() >= SampleRate(wanted_rate)
        })
        .map(|c| c.with_sample_rate(SampleRate(wanted_rate)));

    let supported = match native {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?,
    };
    let config: StreamConfig = supported.config();
    let channels = usize::from(config.channels);
    let rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = rate,
        channels,
        "opening input stream"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = samples.send(downmix(data, channels));
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, rate))
}

#[allow(clippy::cast_possible_truncation)]
fn frame_len(sample_rate: u32) -> usize {
    (u128::from(sample_rate) * FRAME_DURATION.as_millis() / 1000) as usize
}

/// Average interleaved channels into mono
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Mono resampler fed with arbitrary-length input
struct ChunkResampler {
    inner: FastFixedIn<f32>,
    input: Vec<f32>,
}

impl ChunkResampler {
    fn new(from: u32, to: u32) -> Result<Self> {
        let ratio = f64::from(to) / f64::from(from);
        let inner = FastFixedIn::<f32>::new(ratio, 10.0, PolynomialDegree::Septic, RESAMPLE_CHUNK, 1)
            .map_err(|e| Error::Audio(format!("failed to create resampler: {e}")))?;
        Ok(Self {
            inner,
            input: Vec::new(),
        })
    }

    /// Resample whatever full chunks are available; the rest is kept
    fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.input.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.input.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.input.drain(..needed).collect();
            let mut resampled = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
            if let Some(channel) = resampled.pop() {
                output.extend(channel);
            }
        }
        Ok(output)
    }
}

impl Default for MicrophoneSource {
    fn default() -> Self {
        Self::new(MicrophoneConfig {
            device: None,
            silence_threshold: Some(DEFAULT_ENERGY_THRESHOLD),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len() {
        assert_eq!(frame_len(16000), 1600);
        assert_eq!(frame_len(44100), 4410);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.5, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn test_to_i16_clamps() {
        assert_eq!(to_i16(0.0), 0);
        assert_eq!(to_i16(1.0), 32767);
        assert_eq!(to_i16(-2.0), -32768);
    }

    #[test]
    fn test_resampler_halves_length() {
        let mut resampler = ChunkResampler::new(32000, 16000).unwrap();
        let input = vec![0.0_f32; RESAMPLE_CHUNK * 4];
        let output = resampler.process(&input).unwrap();

        assert!(!output.is_empty());
        let expected = input.len() / 2;
        assert!(output.len() <= expected && output.len() + RESAMPLE_CHUNK >= expected);
    }

    #[tokio::test]
    async fn test_next_event_without_start_fails() {
        let mut source = MicrophoneSource::new(MicrophoneConfig::default());
        assert!(source.next_event().await.is_err());
    }
}
