//! Gapless playback scheduling
//!
//! Segments are placed back-to-back on the output clock: each one starts at
//! `max(next_start_time, now)` and pushes the horizon forward by its
//! duration, so playback never overlaps and never runs backwards.

use std::collections::BTreeSet;

use super::device::{AudioOutput, PlaybackSegment, SegmentId};
use crate::Result;

/// Default distance (seconds) from the horizon that counts as "caught up"
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Placement of a scheduled segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub start_at: f64,
    pub duration: f64,
}

/// Queues decoded segments onto an output device
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    next_start_time: f64,
    tolerance: f64,
    next_id: SegmentId,
    active: BTreeSet<SegmentId>,
    turn_complete: bool,
}

impl PlaybackScheduler {
    /// Create a scheduler over an opened output device
    #[must_use]
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self::with_tolerance(output, DEFAULT_TOLERANCE)
    }

    /// Create a scheduler with a custom catch-up tolerance
    #[must_use]
    pub fn with_tolerance(output: Box<dyn AudioOutput>, tolerance: f64) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            tolerance: tolerance.max(0.0),
            next_id: 0,
            active: BTreeSet::new(),
            turn_complete: false,
        }
    }

    /// Schedule a decoded buffer right after everything already queued
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses the segment; the horizon is left
    /// untouched in that case
    pub fn schedule(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<ScheduledSegment> {
        let now = self.output.current_time();
        let start_at = self.next_start_time.max(now);

        let id = self.next_id;
        let segment = PlaybackSegment {
            id,
            samples,
            sample_rate,
            start_at,
        };
        let duration = segment.duration();

        self.output.enqueue(segment)?;

        self.next_id += 1;
        self.active.insert(id);
        self.next_start_time = start_at + duration;
        self.turn_complete = false;

        tracing::trace!(id, start_at, duration, now, "segment scheduled");

        Ok(ScheduledSegment {
            id,
            start_at,
            duration,
        })
    }

    /// Record that a segment finished playing
    ///
    /// Returns true when the output clock has caught up with the horizon,
    /// i.e. nothing else is left to play.
    pub fn segment_ended(&mut self, id: SegmentId) -> bool {
        self.active.remove(&id);
        self.is_drained()
    }

    /// Whether the output clock is within tolerance of the horizon
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.output.current_time() >= self.next_start_time - self.tolerance
    }

    /// Stop every queued or playing segment and reset the horizon
    ///
    /// Device failures are logged and counted; the flush always completes.
    pub fn flush(&mut self) -> usize {
        let mut failures = 0;
        for id in std::mem::take(&mut self.active) {
            if let Err(e) = self.output.stop(id) {
                failures += 1;
                tracing::warn!(id, error = %e, "failed to stop playback segment");
            }
        }

        self.next_start_time = 0.0;
        self.turn_complete = false;

        if failures > 0 {
            tracing::debug!(failures, "playback flushed with errors");
        }
        failures
    }

    /// Record the server's explicit end-of-turn signal
    pub const fn mark_turn_complete(&mut self) {
        self.turn_complete = true;
    }

    /// Whether the server signalled end of turn since the last segment
    #[must_use]
    pub const fn turn_complete(&self) -> bool {
        self.turn_complete
    }

    /// Scheduling horizon in seconds
    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Number of segments queued or playing
    #[must_use]
    pub fn pending(&self) -> usize {
        self.active.len()
    }

    /// Current output clock
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }
}
