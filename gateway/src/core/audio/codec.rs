//! G.711 companding and PCM16 helpers.
//!
//! The μ-law and A-law decode tables are built at compile time from the
//! ITU-T G.711 segment definitions, so decoding is a single table lookup
//! per byte and encoding follows the reference segment search.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::CodecError;

// =============================================================================
// Encodings
// =============================================================================

/// Wire encoding of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// 16-bit signed little-endian linear PCM
    #[default]
    #[serde(alias = "pcm", alias = "linear16")]
    Pcm16,
    /// G.711 μ-law, 8 bits per sample
    #[serde(alias = "ulaw", alias = "pcm_mulaw")]
    Mulaw,
    /// G.711 A-law, 8 bits per sample
    #[serde(alias = "pcm_alaw")]
    Alaw,
}

impl AudioEncoding {
    /// Bytes used by one sample on the wire.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::Pcm16 => 2,
            AudioEncoding::Mulaw | AudioEncoding::Alaw => 1,
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioEncoding::Pcm16 => write!(f, "pcm16"),
            AudioEncoding::Mulaw => write!(f, "mulaw"),
            AudioEncoding::Alaw => write!(f, "alaw"),
        }
    }
}

/// Sample rates accepted for client and provider audio.
pub const SUPPORTED_SAMPLE_RATES: std::ops::RangeInclusive<u32> = 8000..=192_000;

/// Sample rate and encoding of a mono audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub encoding: AudioEncoding,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, encoding: AudioEncoding) -> Self {
        Self {
            sample_rate,
            encoding,
        }
    }

    /// PCM16 at the given rate.
    pub fn pcm16(sample_rate: u32) -> Self {
        Self::new(sample_rate, AudioEncoding::Pcm16)
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(CodecError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }
}

// =============================================================================
// μ-law
// =============================================================================

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

const fn mulaw_expand(byte: u8) -> i16 {
    let value = !byte;
    let sign = value & 0x80;
    let exponent = ((value >> 4) & 0x07) as i32;
    let mantissa = (value & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

const fn build_mulaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = mulaw_expand(i as u8);
        i += 1;
    }
    table
}

static MULAW_TABLE: [i16; 256] = build_mulaw_table();

/// Decode one μ-law byte to a linear PCM16 sample.
#[inline]
pub fn mulaw_to_linear(byte: u8) -> i16 {
    MULAW_TABLE[byte as usize]
}

/// Encode one linear PCM16 sample as μ-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign: i32 = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };
    magnitude = magnitude.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent: i32 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

// =============================================================================
// A-law
// =============================================================================

const ALAW_SEGMENT_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

const fn alaw_expand(byte: u8) -> i16 {
    let value = byte ^ 0x55;
    let segment = ((value & 0x70) >> 4) as i32;
    let mut magnitude = ((value & 0x0F) as i32) << 4;
    if segment == 0 {
        magnitude += 8;
    } else {
        magnitude = (magnitude + 0x108) << (segment - 1);
    }
    if value & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

const fn build_alaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = alaw_expand(i as u8);
        i += 1;
    }
    table
}

static ALAW_TABLE: [i16; 256] = build_alaw_table();

/// Decode one A-law byte to a linear PCM16 sample.
#[inline]
pub fn alaw_to_linear(byte: u8) -> i16 {
    ALAW_TABLE[byte as usize]
}

/// Encode one linear PCM16 sample as A-law.
pub fn linear_to_alaw(sample: i16) -> u8 {
    let mut value = (sample as i32) >> 3;
    let mask: u8 = if value >= 0 {
        0xD5
    } else {
        value = -value - 1;
        0x55
    };

    let Some(segment) = ALAW_SEGMENT_END.iter().position(|&end| value <= end) else {
        return 0x7F ^ mask;
    };

    let quantized = if segment < 2 {
        (value >> 1) & 0x0F
    } else {
        (value >> segment) & 0x0F
    };
    (((segment as i32) << 4) as u8 | quantized as u8) ^ mask
}

// =============================================================================
// Buffer helpers
// =============================================================================

/// Decode a buffer in `encoding` to linear samples.
///
/// PCM16 input must have an even length; callers streaming PCM16 should
/// carry an odd trailing byte themselves (see [`super::AudioNormalizer`]).
pub fn decode_samples(encoding: AudioEncoding, payload: &[u8]) -> Result<Vec<i16>, CodecError> {
    match encoding {
        AudioEncoding::Pcm16 => pcm16_from_le_bytes(payload),
        AudioEncoding::Mulaw => Ok(payload.iter().map(|&b| mulaw_to_linear(b)).collect()),
        AudioEncoding::Alaw => Ok(payload.iter().map(|&b| alaw_to_linear(b)).collect()),
    }
}

/// Encode linear samples into `encoding`.
pub fn encode_samples(encoding: AudioEncoding, samples: &[i16]) -> Vec<u8> {
    match encoding {
        AudioEncoding::Pcm16 => pcm16_to_le_bytes(samples),
        AudioEncoding::Mulaw => samples.iter().map(|&s| linear_to_mulaw(s)).collect(),
        AudioEncoding::Alaw => samples.iter().map(|&s| linear_to_alaw(s)).collect(),
    }
}

pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Result<Vec<i16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddPcm16Length(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
