//! Decodes incoming audio frames to 16kHz mono 16-bit PCM.
//!
//! Binary WebSocket frames carry either a WAV container (sniffed by the RIFF
//! magic) or, once a client has opted in with `rawPcm`, headerless 16kHz
//! mono little-endian PCM. WAV input at other rates or channel counts is
//! downmixed and resampled.

use crate::defaults::SAMPLE_RATE;
use crate::error::{KikitoriError, Result};
use std::io::Cursor;

/// Decoder for client audio chunks.
///
/// Stateless apart from configuration; one instance is shared per session.
#[derive(Debug, Clone, Default)]
pub struct AudioDecoder;

impl AudioDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode one binary frame to 16kHz mono samples.
    ///
    /// # Arguments
    /// * `data` - Raw frame payload
    /// * `raw_pcm` - Whether the session has opted into headerless PCM
    ///
    /// # Errors
    /// Returns `KikitoriError::Decode` for malformed WAV data, for raw
    /// frames with an odd byte count, and for non-RIFF data without the
    /// `raw_pcm` opt-in.
    pub fn decode(&self, data: &[u8], raw_pcm: bool) -> Result<Vec<i16>> {
        if data.starts_with(b"RIFF") {
            return Self::decode_wav(data);
        }

        if raw_pcm {
            return Self::decode_raw_pcm(data);
        }

        Err(KikitoriError::Decode {
            message: "frame is not a WAV container and rawPcm is not enabled".to_string(),
        })
    }

    /// Parse a WAV container, downmixing and resampling to 16kHz mono.
    fn decode_wav(data: &[u8]) -> Result<Vec<i16>> {
        let mut reader =
            hound::WavReader::new(Cursor::new(data)).map_err(|e| KikitoriError::Decode {
                message: format!("Failed to parse WAV data: {}", e),
            })?;

        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(KikitoriError::Decode {
                message: format!(
                    "Unsupported WAV format: {} bits {:?}",
                    spec.bits_per_sample, spec.sample_format
                ),
            });
        }

        let raw_samples: Vec<i16> = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| KikitoriError::Decode {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        // Convert to mono if stereo
        let mono_samples = if spec.channels == 2 {
            raw_samples
                .chunks_exact(2)
                .map(|chunk| {
                    let left = chunk[0] as i32;
                    let right = chunk[1] as i32;
                    ((left + right) / 2) as i16
                })
                .collect()
        } else if spec.channels == 1 {
            raw_samples
        } else {
            return Err(KikitoriError::Decode {
                message: format!("Unsupported channel count: {}", spec.channels),
            });
        };

        // Resample to 16kHz if needed
        if spec.sample_rate != SAMPLE_RATE {
            Ok(resample(&mono_samples, spec.sample_rate, SAMPLE_RATE))
        } else {
            Ok(mono_samples)
        }
    }

    /// Interpret a headerless frame as 16kHz mono 16-bit little-endian PCM.
    fn decode_raw_pcm(data: &[u8]) -> Result<Vec<i16>> {
        if data.len() % 2 != 0 {
            return Err(KikitoriError::Decode {
                message: format!("raw PCM frame has odd byte count {}", data.len()),
            });
        }

        Ok(data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect())
    }
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
