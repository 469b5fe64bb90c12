//! Media payloads emitted by a running core

use bitcode::{Decode, Encode};

/// One converted video frame, tightly packed RGBA8888
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct FrameData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FrameData {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// RGBA of the pixel at (`x`, `y`), if inside the frame
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL;
        let p = self.pixels.get(i..i + Self::BYTES_PER_PIXEL)?;
        Some([p[0], p[1], p[2], p[3]])
    }
}

/// A batch of interleaved stereo samples (L, R, L, R, ...)
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct AudioData {
    pub sample_rate: f64,
    pub samples: Vec<i16>,
}

impl AudioData {
    /// Number of stereo frames in the batch
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }
}
