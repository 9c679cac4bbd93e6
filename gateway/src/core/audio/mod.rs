//! Audio format conversion for the realtime bridge.
//!
//! Client audio arrives as PCM16, μ-law or A-law at an arbitrary sample
//! rate. [`AudioNormalizer`] turns that into PCM16 at the rate a provider
//! expects, cut into fixed-duration frames.

pub mod codec;
pub mod frames;
pub mod resample;

use bytes::Bytes;
use thiserror::Error;

pub use codec::{
    AudioEncoding, AudioFormat, SUPPORTED_SAMPLE_RATES, alaw_to_linear, decode_samples, encode_samples, linear_to_alaw,
    linear_to_mulaw, mulaw_to_linear, pcm16_from_le_bytes, pcm16_to_le_bytes,
};
pub use frames::FrameAccumulator;
pub use resample::StreamingResampler;

/// Default frame duration forwarded to providers.
pub const DEFAULT_FRAME_MS: u32 = 20;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid sample rate {0} Hz, supported range is 8000 to 192000")]
    InvalidSampleRate(u32),
    #[error("PCM16 payload has odd length {0}")]
    OddPcm16Length(usize),
    #[error("Target format must be PCM16, got {0}")]
    UnsupportedTarget(AudioEncoding),
}

/// Stateful conversion of an inbound audio stream into provider frames.
#[derive(Debug)]
pub struct AudioNormalizer {
    input: AudioFormat,
    output: AudioFormat,
    carry: Option<u8>,
    resampler: StreamingResampler,
    frames: FrameAccumulator,
}

impl AudioNormalizer {
    pub fn new(input: AudioFormat, output: AudioFormat, frame_ms: u32) -> Result<Self, CodecError> {
        input.validate()?;
        output.validate()?;
        if output.encoding != AudioEncoding::Pcm16 {
            return Err(CodecError::UnsupportedTarget(output.encoding));
        }
        Ok(Self {
            input,
            output,
            carry: None,
            resampler: StreamingResampler::new(input.sample_rate, output.sample_rate)?,
            frames: FrameAccumulator::new(output.sample_rate, frame_ms),
        })
    }

    pub fn input_format(&self) -> AudioFormat {
        self.input
    }

    pub fn output_format(&self) -> AudioFormat {
        self.output
    }

    /// Convert one inbound payload and return the complete frames it yields.
    pub fn push(&mut self, payload: &[u8]) -> Vec<Bytes> {
        let samples = match self.input.encoding {
            AudioEncoding::Pcm16 => self.take_pcm16(payload),
            AudioEncoding::Mulaw => payload.iter().map(|&b| mulaw_to_linear(b)).collect(),
            AudioEncoding::Alaw => payload.iter().map(|&b| alaw_to_linear(b)).collect(),
        };
        if samples.is_empty() {
            return Vec::new();
        }
        let resampled = self.resampler.process(&samples);
        self.frames.push(&pcm16_to_le_bytes(&resampled))
    }

    /// Release the trailing partial frame at end of stream.
    pub fn flush(&mut self) -> Option<Bytes> {
        self.carry = None;
        self.frames.flush()
    }

    fn take_pcm16(&mut self, payload: &[u8]) -> Vec<i16> {
        let mut joined;
        let mut bytes = payload;
        if let Some(first) = self.carry.take() {
            joined = Vec::with_capacity(payload.len() + 1);
            joined.push(first);
            joined.extend_from_slice(payload);
            bytes = &joined;
        }
        let even = bytes.len() - bytes.len() % 2;
        if even < bytes.len() {
            self.carry = Some(bytes[even]);
        }
        bytes[..even]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_pcm_target() {
        let result = AudioNormalizer::new(
            AudioFormat::pcm16(16000),
            AudioFormat::new(8000, AudioEncoding::Mulaw),
            DEFAULT_FRAME_MS,
        );
        assert!(matches!(result, Err(CodecError::UnsupportedTarget(_))));
    }

    #[test]
    fn test_odd_byte_is_carried_to_next_payload() {
        let mut normalizer =
            AudioNormalizer::new(AudioFormat::pcm16(8000), AudioFormat::pcm16(8000), 1).unwrap();
        // 1ms at 8kHz = 8 samples = 16 bytes per frame
        let mut payload = pcm16_to_le_bytes(&[1000; 8]);
        let tail = payload.split_off(15);
        assert!(normalizer.push(&payload).is_empty());
        let frames = normalizer.push(&tail);
        assert_eq!(frames.len(), 1);
        assert_eq!(pcm16_from_le_bytes(&frames[0]).unwrap(), vec![1000; 8]);
    }

    #[test]
    fn test_mulaw_8k_to_pcm16_16k() {
        let mut normalizer = AudioNormalizer::new(
            AudioFormat::new(8000, AudioEncoding::Mulaw),
            AudioFormat::pcm16(16000),
            DEFAULT_FRAME_MS,
        )
        .unwrap();
        // 40ms of μ-law silence
        let frames = normalizer.push(&[0xFF; 320]);
        assert!(!frames.is_empty());
        for frame in &frames {
            assert_eq!(frame.len(), 640);
            assert!(pcm16_from_le_bytes(frame).unwrap().iter().all(|&s| s == 0));
        }
    }

    #[test]
    fn test_alaw_decoding_applied() {
        let mut normalizer = AudioNormalizer::new(
            AudioFormat::new(8000, AudioEncoding::Alaw),
            AudioFormat::pcm16(8000),
            1,
        )
        .unwrap();
        let frames = normalizer.push(&[0xD5; 8]);
        assert_eq!(frames.len(), 1);
        assert_eq!(pcm16_from_le_bytes(&frames[0]).unwrap(), vec![8; 8]);
    }

    #[test]
    fn test_flush_returns_partial_frame() {
        let mut normalizer =
            AudioNormalizer::new(AudioFormat::pcm16(8000), AudioFormat::pcm16(8000), 20).unwrap();
        assert!(normalizer.push(&[0u8; 10]).is_empty());
        assert_eq!(normalizer.flush().map(|b| b.len()), Some(10));
    }
}
