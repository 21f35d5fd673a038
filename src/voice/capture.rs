//! Audio capture from microphone

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleRate, Stream, StreamConfig};

use super::codec::{self, INPUT_SAMPLE_RATE};
use super::device::{AudioInput, CaptureSettings, SampleCallback};
use super::queue::FrameQueue;
use super::resample::StreamResampler;
use crate::{Error, Result};

/// Samples per outbound frame
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Splits the microphone stream into fixed-size encoded frames
///
/// Runs inside the device callback. Input arriving at a rate other than
/// 16 kHz is resampled first.
pub struct CapturePipeline {
    chunk_size: usize,
    pending: Vec<f32>,
    resampler: Option<StreamResampler>,
    scratch: Vec<f32>,
    queue: Arc<FrameQueue>,
}

impl CapturePipeline {
    /// Create a pipeline feeding `queue`
    ///
    /// # Errors
    ///
    /// Returns error if a resampler is needed and cannot be built
    pub fn new(device_rate: u32, chunk_size: usize, queue: Arc<FrameQueue>) -> Result<Self> {
        let resampler = if device_rate == INPUT_SAMPLE_RATE {
            None
        } else {
            tracing::debug!(
                from = device_rate,
                to = INPUT_SAMPLE_RATE,
                "resampling microphone input"
            );
            Some(StreamResampler::new(device_rate, INPUT_SAMPLE_RATE)?)
        };

        let chunk_size = chunk_size.max(1);
        Ok(Self {
            chunk_size,
            pending: Vec::with_capacity(chunk_size * 2),
            resampler,
            scratch: Vec::new(),
            queue,
        })
    }

    /// Feed mono samples at the device rate
    ///
    /// Returns the number of frames emitted.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        if let Some(resampler) = self.resampler.as_mut() {
            self.scratch.clear();
            if let Err(e) = resampler.push(samples, &mut self.scratch) {
                tracing::warn!(error = %e, "dropping microphone block");
                return 0;
            }
            self.pending.extend_from_slice(&self.scratch);
        } else {
            self.pending.extend_from_slice(samples);
        }

        let mut emitted = 0;
        while self.pending.len() >= self.chunk_size {
            let frame = codec::encode(&self.pending[..self.chunk_size]);
            self.pending.drain(..self.chunk_size);
            if !self.queue.push(frame) {
                // Session is going away
                self.pending.clear();
                break;
            }
            emitted += 1;
        }
        emitted
    }
}

/// Captures audio from the default input device
pub struct CpalInput {
    #[allow(dead_code)]
    device: Device,
    sample_rate: u32,
    stream: Option<Stream>,
}

impl CpalInput {
    /// Open the default input device
    ///
    /// Prefers a mono config at the requested rate; otherwise uses the
    /// device default and downmixes.
    ///
    /// # Errors
    ///
    /// Returns error if no input device can be opened
    #[allow(clippy::cast_precision_loss)]
    pub fn open(settings: CaptureSettings, mut on_samples: SampleCallback) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let preferred = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(settings.sample_rate)
                    && c.max_sample_rate() >= SampleRate(settings.sample_rate)
            })
            .map(|c| c.with_sample_rate(SampleRate(settings.sample_rate)).config());

        let config: StreamConfig = match preferred {
            Some(config) => config,
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?
                .config(),
        };

        let channels = usize::from(config.channels.max(1));
        let sample_rate = config.sample_rate.0;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio capture initialized"
        );

        let mut mono = Vec::new();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels == 1 {
                        on_samples(data);
                    } else {
                        mono.clear();
                        mono.extend(
                            data.chunks(channels)
                                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                        );
                        on_samples(mono.as_slice());
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(map_build_error)?;

        Ok(Self {
            device,
            sample_rate,
            stream: Some(stream),
        })
    }
}

impl AudioInput for CpalInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::Audio("capture stream already released".to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            tracing::debug!("audio capture stopped, device released");
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn map_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::BackendSpecific { err }
            if err.description.to_lowercase().contains("permission") =>
        {
            Error::PermissionDenied(err.description)
        }
        other => Error::Audio(other.to_string()),
    }
}
