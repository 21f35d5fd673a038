//! Voice processing module
//!
//! Handles audio capture, PCM framing, resampling, and scheduled playback.

pub mod analyser;
pub mod codec;
mod capture;
mod device;
mod playback;
mod queue;
pub mod resample;
mod scheduler;

pub use analyser::AnalyserTap;
pub use capture::{CapturePipeline, CpalInput, DEFAULT_CHUNK_SIZE};
pub use codec::{AudioFrame, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, samples_to_wav};
pub use device::{
    AudioBackend, AudioInput, AudioOutput, CaptureSettings, CpalBackend, PlaybackSegment,
    SampleCallback, SegmentId,
};
pub use playback::CpalOutput;
pub use queue::FrameQueue;
pub use scheduler::{DEFAULT_TOLERANCE, PlaybackScheduler, ScheduledSegment};
