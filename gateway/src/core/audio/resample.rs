//! Linear-interpolation resampling for streamed PCM16 audio.

use super::CodecError;

/// Resampler that keeps its phase and the last input sample between calls,
/// so a stream split into arbitrary chunks produces the same output as the
/// whole stream resampled at once.
#[derive(Debug, Clone)]
pub struct StreamingResampler {
    from_rate: u32,
    to_rate: u32,
    step: f64,
    position: f64,
    previous: Option<i16>,
}

impl StreamingResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, CodecError> {
        if from_rate == 0 {
            return Err(CodecError::InvalidSampleRate(from_rate));
        }
        if to_rate == 0 {
            return Err(CodecError::InvalidSampleRate(to_rate));
        }
        Ok(Self {
            from_rate,
            to_rate,
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            previous: None,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Resample the next chunk of the stream.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        // Virtual buffer: the carried sample (if any) followed by `input`.
        let offset = usize::from(self.previous.is_some());
        let total = input.len() + offset;
        let sample_at = |index: usize| -> f64 {
            match (self.previous, index) {
                (Some(previous), 0) => previous as f64,
                _ => input[index - offset] as f64,
            }
        };

        let estimated = ((total as f64) / self.step).ceil() as usize;
        let mut output = Vec::with_capacity(estimated);
        loop {
            let index = self.position.floor() as usize;
            if index + 1 >= total {
                break;
            }
            let frac = self.position - index as f64;
            let value = sample_at(index) * (1.0 - frac) + sample_at(index + 1) * frac;
            output.push(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            self.position += self.step;
        }

        // The last input sample becomes index 0 of the next virtual buffer.
        self.position -= (total - 1) as f64;
        self.previous = input.last().copied();
        output
    }
}
