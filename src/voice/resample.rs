//! Sample-rate conversion using rubato

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input chunk size fed to the FFT resampler
const CHUNK_SIZE: usize = 1024;

/// FFT sub-chunks (trades latency for quality)
const SUB_CHUNKS: usize = 2;

fn new_resampler(from_rate: u32, to_rate: u32) -> Result<FftFixedIn<f32>> {
    FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        SUB_CHUNKS,
        1,
    )
    .map_err(|e| Error::Resample(format!("resampler init failed: {e}")))
}

/// Resample one complete mono buffer
///
/// The output is trimmed of the resampler delay and cut to the expected
/// length so that back-to-back buffers keep their durations.
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = new_resampler(from_rate, to_rate)?;
    let expected = samples.len() * to_rate as usize / from_rate as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay);
    let mut chunks = samples.chunks_exact(CHUNK_SIZE);
    for chunk in &mut chunks {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Resample(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let result = resampler
            .process_partial(Some(&[tail]), None)
            .map_err(|e| Error::Resample(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Flush the delay line
    while output.len() < expected + delay {
        let result = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| Error::Resample(format!("resample flush failed: {e}")))?;
        if result[0].is_empty() {
            break;
        }
        output.extend_from_slice(&result[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

/// Streaming resampler for continuous capture
///
/// Accepts arbitrarily sized input blocks and emits output as full
/// resampler chunks become available.
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a streaming resampler
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        Ok(Self {
            inner: new_resampler(from_rate, to_rate)?,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    /// Push input samples, appending any resampled output to `out`
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(samples);

        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }

            let result = self
                .inner
                .process(&[&self.pending[..needed]], None)
                .map_err(|e| Error::Resample(format!("resample failed: {e}")))?;
            out.extend_from_slice(&result[0]);
            self.pending.drain(..needed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 24000, 24000).unwrap(), samples);
    }

    #[test]
    fn test_resample_preserves_duration() {
        let samples = vec![0.25f32; 24000];
        let out = resample(&samples, 24000, 48000).unwrap();
        assert_eq!(out.len(), 48000);
    }

    #[test]
    fn test_resample_short_buffer() {
        // Shorter than one resampler chunk
        let samples = vec![0.0f32; 480];
        let out = resample(&samples, 24000, 48000).unwrap();
        assert_eq!(out.len(), 960);
    }

    #[test]
    fn test_stream_resampler_downsamples() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        let mut out = Vec::new();
        for _ in 0..10 {
            resampler.push(&[0.0f32; 480], &mut out).unwrap();
        }
        // 4800 input frames -> roughly a third, minus what is still pending
        assert!(!out.is_empty());
        assert!(out.len() <= 1600);
    }
}
