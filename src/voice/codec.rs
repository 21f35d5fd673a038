//! PCM sample codec
//!
//! Converts between `f32` samples in `[-1, 1]` and the wire format used by
//! the live API: signed 16-bit little-endian PCM wrapped in base64 and
//! tagged with a `audio/pcm;rate=N` mime label.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Sample rate of outbound microphone audio
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized speech sent by the remote agent
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Mime label for outbound frames
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// One encoded chunk of audio, ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    mime_type: String,
    sample_rate: u32,
    sample_count: usize,
    data: String,
}

impl AudioFrame {
    /// Mime label (e.g. `audio/pcm;rate=16000`)
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Sample rate of the encoded samples
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples carried by this frame
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Base64 payload
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }
}

/// Convert a single `f32` sample to signed 16-bit
///
/// Negative values scale by 32768 and positive values by 32767 so that
/// both ends of `[-1, 1]` land exactly on the i16 range. NaN maps to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Convert `f32` samples to little-endian PCM16 bytes
#[must_use]
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// Convert little-endian PCM16 bytes to `f32` samples
///
/// # Errors
///
/// Returns error if the byte length is odd
pub fn pcm16_to_float(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Codec(format!(
            "PCM16 payload has odd length ({} bytes)",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// Encode microphone samples into a 16 kHz frame
#[must_use]
pub fn encode(samples: &[f32]) -> AudioFrame {
    AudioFrame {
        mime_type: INPUT_MIME_TYPE.to_string(),
        sample_rate: INPUT_SAMPLE_RATE,
        sample_count: samples.len(),
        data: STANDARD.encode(float_to_pcm16(samples)),
    }
}

/// Decode a base64 PCM16 payload into `f32` samples
///
/// # Errors
///
/// Returns error if the payload is not valid base64 or not whole samples
pub fn decode(data: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Codec(format!("invalid base64 payload: {e}")))?;
    pcm16_to_float(&bytes)
}

/// Parse the sample rate out of a mime label like `audio/pcm;rate=24000`
#[must_use]
pub fn pcm_rate(mime_type: &str) -> Option<u32> {
    let mut parts = mime_type.split(';');
    let essence = parts.next()?.trim();
    if !essence.eq_ignore_ascii_case("audio/pcm") {
        return None;
    }

    parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("rate") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample_to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
