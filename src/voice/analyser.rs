//! Analysis tap over played audio
//!
//! Keeps the most recent window of output samples for the visualizer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default analysis window (samples)
pub const DEFAULT_WINDOW: usize = 512;

/// Shared ring of the most recent output samples
#[derive(Debug, Clone)]
pub struct AnalyserTap {
    window: usize,
    samples: Arc<Mutex<VecDeque<f32>>>,
}

impl Default for AnalyserTap {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl AnalyserTap {
    /// Create a tap keeping `window` samples
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window))),
        }
    }

    /// Window size in samples
    #[must_use]
    pub const fn window(&self) -> usize {
        self.window
    }

    /// Append samples, discarding the oldest beyond the window
    pub fn push(&self, samples: &[f32]) {
        let Ok(mut buf) = self.samples.lock() else {
            return;
        };

        let keep = samples.len().min(self.window);
        let overflow = (buf.len() + keep).saturating_sub(self.window);
        buf.drain(..overflow);
        buf.extend(&samples[samples.len() - keep..]);
    }

    /// Copy of the current window, zero-padded at the front when short
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.window];
        if let Ok(buf) = self.samples.lock() {
            let offset = self.window - buf.len();
            for (slot, &s) in out[offset..].iter_mut().zip(buf.iter()) {
                *slot = s;
            }
        }
        out
    }

    /// Forget all samples
    pub fn clear(&self) {
        if let Ok(mut buf) = self.samples.lock() {
            buf.clear();
        }
    }
}
