//! Inbound audio re-framing.
//!
//! The telephony transport delivers caller audio in small packets; the agent
//! transport wants fixed-size frames. [`AudioFramer`] accumulates bytes and
//! hands back whole frames only, keeping any remainder buffered.

use bytes::{Bytes, BytesMut};

#[derive(Debug)]
pub struct AudioFramer {
    frame_size: usize,
    buffer: BytesMut,
}

impl AudioFramer {
    /// Creates a framer producing frames of exactly `frame_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `frame_size` is zero.
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be non-zero");
        Self {
            frame_size,
            buffer: BytesMut::with_capacity(frame_size * 2),
        }
    }

    /// Number of bytes waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a chunk without slicing.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Slices one frame off the front if enough bytes are buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if self.buffer.len() < self.frame_size {
            return None;
        }
        Some(self.buffer.split_to(self.frame_size).freeze())
    }

    /// Drains every complete frame currently buffered, in order.
    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(self.buffer.len() / self.frame_size);
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Discards the buffered remainder, returning how many bytes were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }
}
