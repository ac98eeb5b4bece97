//! # PCM Decoding and Speech Gate
//!
//! Turns raw binary WebSocket frames into i16 samples and classifies
//! each frame as speech or silence with an RMS energy gate. The gate's
//! verdict feeds the turn detector; the samples feed the batcher.

use crate::error::{AppError, AppResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Decode a little-endian 16-bit PCM frame.
///
/// Odd-length payloads are rejected rather than truncated: a half
/// sample means the client framing is broken.
pub fn decode_pcm(data: &[u8]) -> AppResult<Vec<i16>> {
    if data.len() % 2 != 0 {
        return Err(AppError::InvalidState(format!(
            "PCM frame length {} is not sample-aligned",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);

    while cursor.position() < data.len() as u64 {
        let sample = cursor
            .read_i16::<LittleEndian>()
            .map_err(|e| AppError::Internal(format!("Failed to read PCM sample: {}", e)))?;
        samples.push(sample);
    }

    Ok(samples)
}

/// RMS energy of a frame.
pub fn frame_rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Whether a frame carries speech, per the configured RMS threshold.
pub fn frame_has_speech(samples: &[i16], rms_threshold: f64) -> bool {
    frame_rms(samples) >= rms_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_round_values() {
        // -1, 0, 1, 256 little-endian
        let data = [0xFF, 0xFF, 0x00, 0x00, 0x01, 0x00, 0x00, 0x01];
        let samples = decode_pcm(&data).unwrap();
        assert_eq!(samples, vec![-1, 0, 1, 256]);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let err = decode_pcm(&[0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn test_decode_empty_frame() {
        assert!(decode_pcm(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_rms_gate() {
        let silence = vec![0i16; 160];
        let quiet = vec![50i16; 160];
        let loud = vec![2_000i16; 160];

        assert!(!frame_has_speech(&silence, 300.0));
        assert!(!frame_has_speech(&quiet, 300.0));
        assert!(frame_has_speech(&loud, 300.0));
        // Empty frame is never speech
        assert!(!frame_has_speech(&[], 300.0));
    }
}
