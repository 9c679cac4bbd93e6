use bytes::{Bytes, BytesMut};

/// Collects PCM16 bytes and releases them in frames of a fixed duration.
#[derive(Debug)]
pub struct FrameAccumulator {
    bytes_per_frame: usize,
    buffer: BytesMut,
}

impl FrameAccumulator {
    /// Frame size is `frame_ms` of mono PCM16 at `sample_rate`.
    pub fn new(sample_rate: u32, frame_ms: u32) -> Self {
        let samples = (sample_rate as u64 * frame_ms as u64 / 1000) as usize;
        let bytes_per_frame = (samples * 2).max(2);
        Self {
            bytes_per_frame,
            buffer: BytesMut::with_capacity(bytes_per_frame * 2),
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append audio and return every complete frame now available.
    pub fn push(&mut self, pcm16: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(pcm16);
        let mut frames = Vec::with_capacity(self.buffer.len() / self.bytes_per_frame);
        while self.buffer.len() >= self.bytes_per_frame {
            frames.push(self.buffer.split_to(self.bytes_per_frame).freeze());
        }
        frames
    }

    /// Release whatever partial frame remains.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }
}
