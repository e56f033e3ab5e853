//! Sample format conversion and companding for the wire.
//!
//! - Uplink: f32 → PCM16 → mu-law (G.711) → base64
//! - Downlink: base64 → PCM16 little-endian → f32
//!
//! The asymmetry is intentional: the uplink trades fidelity for bandwidth,
//! the downlink carries raw PCM16.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::chunk::AudioChunk;
use crate::error::{LinkError, Result};

/// Bias added to the magnitude before the segment search.
pub const MULAW_BIAS: i32 = 0x84;
/// Magnitudes above this value are clipped so the biased value fits 15 bits.
pub const MULAW_CLIP: i32 = 32_635;

// ======================== PCM16 <-> float ========================

/// Converts a normalized sample to PCM16, clamping to [-1, 1] first.
///
/// Negative values scale by 32768, non-negative by 32767, so both ends of
/// the range map onto the full i16 span.
pub fn float_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * 32_768.0 } else { s * 32_767.0 };
    scaled.round() as i16
}

/// Inverse of [`float_to_pcm16`].
pub fn pcm16_to_float(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32_768.0
    } else {
        sample as f32 / 32_767.0
    }
}

// ======================== mu-law ========================

/// Compresses one PCM16 sample to an 8-bit mu-law code.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = (magnitude >> 8) & 0x80;
    if sign != 0 {
        magnitude = -magnitude;
    }
    if magnitude > MULAW_CLIP {
        magnitude = MULAW_CLIP;
    }
    magnitude += MULAW_BIAS;

    let mut exponent: i32 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Expands an 8-bit mu-law code back to PCM16.
pub fn mulaw_to_linear(code: u8) -> i16 {
    let code = !code;
    let sign = code & 0x80;
    let exponent = ((code >> 4) & 0x07) as i32;
    let mantissa = (code & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

// ======================== Wire payloads ========================

/// Encodes a captured chunk for an outbound media frame: PCM16 → mu-law → base64.
pub fn encode_outbound(chunk: &AudioChunk) -> String {
    let bytes: Vec<u8> = chunk
        .samples
        .iter()
        .map(|&s| linear_to_mulaw(float_to_pcm16(s)))
        .collect();
    STANDARD.encode(bytes)
}

/// Decodes an inbound media payload (base64 of raw PCM16 little-endian).
pub fn decode_inbound(payload: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD.decode(payload.trim())?;
    if bytes.len() % 2 != 0 {
        return Err(LinkError::MalformedPayload(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Encodes samples as base64 PCM16 little-endian, the downlink payload format.
pub fn encode_pcm16_payload(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&float_to_pcm16(s).to_le_bytes());
    }
    STANDARD.encode(bytes)
}

// ======================== Resampling ========================

/// Linear-interpolation resampler.
///
/// Output length is `floor(len * to_rate / from_rate)`. Each output index maps
/// to a fractional input position and blends its floor and ceil neighbours;
/// positions past the end clamp to the last input sample.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx];
            let b = samples[idx + 1];
            a + (b - a) * frac
        })
        .collect()
}

/// All-zero chunk of `round(duration_secs * sample_rate)` samples.
pub fn synthesize_silence(duration_secs: f64, sample_rate: u32) -> AudioChunk {
    let len = (duration_secs * sample_rate as f64).round().max(0.0) as usize;
    AudioChunk::new(vec![0.0; len], sample_rate)
}
