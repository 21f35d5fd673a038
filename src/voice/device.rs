//! Audio device seams
//!
//! The session talks to the microphone and speaker through these traits so
//! that the control flow can run against real cpal devices or test doubles.

use tokio::sync::mpsc;

use super::analyser::AnalyserTap;
use crate::Result;

/// Callback receiving mono microphone samples at the device rate
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Identifier of one scheduled playback segment
pub type SegmentId = u64;

/// Requested microphone setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Preferred sample rate (the wire rate)
    pub sample_rate: u32,
}

/// A decoded unit of playback audio with its start time on the output clock
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSegment {
    /// Segment identifier, reported back on completion
    pub id: SegmentId,
    /// Mono samples
    pub samples: Vec<f32>,
    /// Rate of `samples`
    pub sample_rate: u32,
    /// Clock time (seconds) at which playback starts
    pub start_at: f64,
}

impl PlaybackSegment {
    /// Duration of the segment in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// An opened microphone
pub trait AudioInput {
    /// Rate of the samples handed to the callback
    fn sample_rate(&self) -> u32;

    /// Start delivering samples
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be started
    fn start(&mut self) -> Result<()>;

    /// Stop delivering samples and release the device
    fn stop(&mut self);
}

/// An opened output device with a monotonic clock
pub trait AudioOutput {
    /// Current output clock in seconds (0 when the device was opened)
    fn current_time(&self) -> f64;

    /// Queue a segment for playback at `segment.start_at`
    ///
    /// # Errors
    ///
    /// Returns error if the segment cannot be queued
    fn enqueue(&mut self, segment: PlaybackSegment) -> Result<()>;

    /// Stop a queued or playing segment
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the request
    fn stop(&mut self, id: SegmentId) -> Result<()>;
}

/// Opens audio devices for a session
pub trait AudioBackend {
    /// Open the microphone; samples flow to `on_samples` once started
    ///
    /// # Errors
    ///
    /// Returns error if the microphone is unavailable or access is denied
    fn open_input(
        &self,
        settings: CaptureSettings,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn AudioInput>>;

    /// Open the speaker
    ///
    /// Finished segments are reported on `finished`; played samples are
    /// mirrored into `tap`.
    ///
    /// # Errors
    ///
    /// Returns error if no output device is usable
    fn open_output(
        &self,
        finished: mpsc::UnboundedSender<SegmentId>,
        tap: AnalyserTap,
    ) -> Result<Box<dyn AudioOutput>>;
}

/// Backend using the default cpal input and output devices
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        settings: CaptureSettings,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(super::capture::CpalInput::open(
            settings, on_samples,
        )?))
    }

    fn open_output(
        &self,
        finished: mpsc::UnboundedSender<SegmentId>,
        tap: AnalyserTap,
    ) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(super::playback::CpalOutput::open(finished, tap)?))
    }
}
