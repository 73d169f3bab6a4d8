//! PCM16 codec for realtime audio payloads
//!
//! Converts between `f32` sample buffers and base64-encoded little-endian
//! 16-bit PCM, the wire format for both microphone uplink and model audio
//! downlink. Scaling is asymmetric: negative samples map against the full
//! -32768 range while non-negative samples map against 32767, so -1.0 and
//! 1.0 both land on representable values.

use base64::Engine as _;
pub use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// Encode `f32` samples as base64 little-endian PCM16.
///
/// Samples are clamped to [-1.0, 1.0] before scaling. The output decodes
/// to exactly `2 * samples.len()` bytes.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let scaled = if clamped < 0.0 {
            clamped * 32768.0
        } else {
            clamped * 32767.0
        };
        bytes.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    BASE64.encode(&bytes)
}

/// Decode little-endian PCM16 bytes into `f32` samples in [-1.0, 1.0).
///
/// Operates on exactly the supplied byte range. An odd trailing byte is
/// treated as the low byte of a sample whose high byte is zero rather
/// than being discarded.
#[must_use]
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    let mut samples = Vec::with_capacity(bytes.len().div_ceil(2));
    let mut pairs = bytes.chunks_exact(2);
    for pair in &mut pairs {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        samples.push(f32::from(value) / 32768.0);
    }
    if let [dangling] = pairs.remainder() {
        let value = i16::from_le_bytes([*dangling, 0]);
        samples.push(f32::from(value) / 32768.0);
    }
    samples
}

/// Decode a base64 PCM16 payload into `f32` samples.
///
/// # Errors
///
/// Returns [`Error::Codec`] if the payload is not valid base64.
pub fn decode_base64(payload: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| Error::Codec(format!("invalid base64 payload: {e}")))?;
    Ok(decode(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(payload: &str) -> Vec<u8> {
        BASE64.decode(payload).unwrap()
    }

    #[test]
    fn encode_produces_two_bytes_per_sample() {
        let samples = vec![0.0, 0.5, -0.5, 1.0];
        assert_eq!(raw(&encode(&samples)).len(), samples.len() * 2);
    }

    #[test]
    fn scaling_is_asymmetric_at_the_extremes() {
        let bytes = raw(&encode(&[-1.0, 1.0]));
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), -32768);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 32767);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let bytes = raw(&encode(&[-2.5, 2.5]));
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), -32768);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 32767);
    }

    #[test]
    fn round_trip_stays_within_one_quantization_step() {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..1024)
            .map(|i| (i as f32 / 1024.0 * std::f32::consts::TAU).sin() * 0.8)
            .collect();
        let decoded = decode_base64(&encode(&samples)).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn odd_byte_length_pads_the_dangling_low_byte() {
        let samples = decode(&[0, 0, 64]);
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.0).abs() < f32::EPSILON);
        assert!((samples[1] - 64.0 / 32768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn decode_uses_only_the_supplied_range() {
        let bytes = raw(&encode(&[0.25, -0.25, 0.75]));
        let head = decode(&bytes[..2]);
        assert_eq!(head.len(), 1);
        assert!((head[0] - 0.25).abs() <= 1.0 / 32768.0);
    }

    #[test]
    fn invalid_base64_is_a_codec_error() {
        assert!(matches!(decode_base64("@@not-base64@@"), Err(Error::Codec(_))));
    }
}
