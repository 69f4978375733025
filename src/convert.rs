//! Sample-rate and sample-format conversion
//!
//! Stateless numeric helpers shared by the capture and playback paths:
//! box-average resampling, PCM16 quantization and base64 transcoding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Resample `input` from `from_rate` to `to_rate` using a box filter.
///
/// Each output sample averages the input span it covers. This is a plain
/// decimator with no phase correction, adequate for speech-bandwidth
/// downsampling to 16 kHz. When the rates match the input is returned
/// unchanged.
pub fn resample(input: Vec<f32>, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input;
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (input.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let start = (i as f64 * ratio).floor() as usize;
        let end = (((i + 1) as f64) * ratio).floor() as usize;
        let end = end.min(input.len());

        if start >= end {
            output.push(0.0);
            continue;
        }

        let sum: f32 = input[start..end].iter().sum();
        output.push(sum / (end - start) as f32);
    }

    output
}

/// Quantize f32 samples to PCM16.
///
/// Samples are clamped to `[-1, 1]`; negative values scale by 32768 and
/// non-negative by 32767 so that +1.0 cannot overflow. NaN quantizes to
/// zero rather than being rejected.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            if s.is_nan() {
                return 0;
            }
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0).round().max(-32768.0) as i16
            } else {
                (s * 32767.0).round() as i16
            }
        })
        .collect()
}

/// Exact inverse of [`to_pcm16`] up to quantization: divide by 32768.
pub fn from_pcm16(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Pack PCM16 samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(s);
    }
    buf.freeze()
}

/// Unpack little-endian bytes into PCM16 samples.
///
/// Fails if the byte count is odd, which indicates a truncated payload.
pub fn bytes_to_pcm16(mut data: &[u8]) -> Result<Vec<i16>, ProtocolError> {
    if data.len() % 2 != 0 {
        return Err(ProtocolError::InvalidPayload(format!(
            "odd PCM16 payload length: {}",
            data.len()
        )));
    }

    let mut samples = Vec::with_capacity(data.len() / 2);
    while data.has_remaining() {
        samples.push(data.get_i16_le());
    }
    Ok(samples)
}

/// Encode bytes as standard base64.
pub fn encode_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode standard base64 into bytes.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, ProtocolError> {
    BASE64
        .decode(data)
        .map_err(|e| ProtocolError::InvalidPayload(format!("base64 decode: {}", e)))
}

/// Average interleaved multi-channel samples down to mono.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
