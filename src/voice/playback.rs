//! Audio playback to speakers
//!
//! The output stream runs continuously from the moment it is opened; the
//! number of frames it has rendered is the session's audio clock. Segments
//! wait in a queue until the clock reaches their start frame.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::analyser::AnalyserTap;
use super::codec::OUTPUT_SAMPLE_RATE;
use super::device::{AudioOutput, PlaybackSegment, SegmentId};
use super::resample::resample;
use crate::{Error, Result};

struct QueuedSegment {
    id: SegmentId,
    start_frame: u64,
    samples: Vec<f32>,
    pos: usize,
}

#[derive(Default)]
struct Shared {
    segments: Mutex<VecDeque<QueuedSegment>>,
    frames_played: AtomicU64,
}

/// Plays scheduled segments on the default output device
pub struct CpalOutput {
    #[allow(dead_code)]
    device: Device,
    sample_rate: u32,
    shared: Arc<Shared>,
    _stream: Stream,
}

impl CpalOutput {
    /// Open the default output device and start its clock
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(finished: mpsc::UnboundedSender<SegmentId>, tap: AnalyserTap) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config = output_config(&device)?;
        let channels = usize::from(config.channels.max(1));
        let sample_rate = config.sample_rate.0;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio playback initialized"
        );

        let shared = Arc::new(Shared::default());
        let callback_shared = Arc::clone(&shared);
        let mut rendered = Vec::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut clock = callback_shared.frames_played.load(Ordering::Acquire);
                    let Ok(mut segments) = callback_shared.segments.lock() else {
                        data.fill(0.0);
                        return;
                    };

                    rendered.clear();
                    for frame in data.chunks_mut(channels) {
                        let sample = next_sample(&mut segments, clock, &finished);
                        frame.fill(sample);
                        rendered.push(sample);
                        clock += 1;
                    }
                    drop(segments);

                    callback_shared.frames_played.store(clock, Ordering::Release);
                    tap.push(&rendered);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            device,
            sample_rate,
            shared,
            _stream: stream,
        })
    }
}

impl AudioOutput for CpalOutput {
    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.shared.frames_played.load(Ordering::Acquire) as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn enqueue(&mut self, segment: PlaybackSegment) -> Result<()> {
        let samples = if segment.sample_rate == self.sample_rate {
            segment.samples
        } else {
            resample(&segment.samples, segment.sample_rate, self.sample_rate)?
        };

        let start_frame = (segment.start_at.max(0.0) * f64::from(self.sample_rate)).round() as u64;

        let mut segments = self
            .shared
            .segments
            .lock()
            .map_err(|_| Error::Audio("playback queue poisoned".to_string()))?;

        let position = segments
            .iter()
            .position(|s| s.start_frame > start_frame)
            .unwrap_or(segments.len());
        segments.insert(
            position,
            QueuedSegment {
                id: segment.id,
                start_frame,
                samples,
                pos: 0,
            },
        );

        Ok(())
    }

    fn stop(&mut self, id: SegmentId) -> Result<()> {
        let mut segments = self
            .shared
            .segments
            .lock()
            .map_err(|_| Error::Audio("playback queue poisoned".to_string()))?;
        segments.retain(|s| s.id != id);
        Ok(())
    }
}

/// Pick an output config: mono at the speech rate, then stereo, then the
/// device default (segments get resampled)
fn output_config(device: &Device) -> Result<StreamConfig> {
    let rate = SampleRate(OUTPUT_SAMPLE_RATE);

    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        })
    };

    if let Some(range) = supports(1).or_else(|| supports(2)) {
        return Ok(range.with_sample_rate(rate).config());
    }

    device
        .default_output_config()
        .map(|c| c.config())
        .map_err(|e| Error::Audio(format!("no suitable output config found: {e}")))
}

/// Produce the next output sample, retiring finished segments
fn next_sample(
    segments: &mut VecDeque<QueuedSegment>,
    clock: u64,
    finished: &mpsc::UnboundedSender<SegmentId>,
) -> f32 {
    loop {
        let Some(front) = segments.front_mut() else {
            return 0.0;
        };

        if front.pos >= front.samples.len() {
            let id = front.id;
            segments.pop_front();
            let _ = finished.send(id);
            continue;
        }

        if front.start_frame > clock {
            return 0.0;
        }

        let sample = front.samples[front.pos];
        front.pos += 1;
        return sample;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: SegmentId, start_frame: u64, len: usize) -> QueuedSegment {
        QueuedSegment {
            id,
            start_frame,
            samples: vec![0.5; len],
            pos: 0,
        }
    }

    #[test]
    fn test_waits_for_start_frame() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut queue = VecDeque::from([segment(1, 2, 1)]);

        assert!(next_sample(&mut queue, 0, &tx).abs() < f32::EPSILON);
        assert!(next_sample(&mut queue, 1, &tx).abs() < f32::EPSILON);
        assert!((next_sample(&mut queue, 2, &tx) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_reports_finished_segments_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = VecDeque::from([segment(1, 0, 2), segment(2, 2, 1), segment(3, 3, 0)]);

        for clock in 0..5 {
            next_sample(&mut queue, clock, &tx);
        }

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), 3);
        assert!(queue.is_empty());
    }
}
