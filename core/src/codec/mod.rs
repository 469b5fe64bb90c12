//! Pixel and audio normalization for transport

pub mod audio;
pub mod pixel;

pub use audio::{sample_batch, sample_pair};
pub use pixel::{CodecError, PixelFormat, convert_frame};
