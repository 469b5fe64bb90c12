//! Native frame buffer to RGBA8888 conversion

use retrohost_shared::FrameData;
use thiserror::Error;

use crate::abi;

/// Source encoding of frames delivered by the plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 0RGB1555, 16 bits per pixel
    Rgb1555,
    /// XRGB8888, 32 bits per pixel, native endian
    Xrgb8888,
    /// RGB565, 16 bits per pixel
    Rgb565,
    /// Unspecified encoding; rows are copied as packed RGBA
    #[default]
    Unknown,
}

impl PixelFormat {
    /// Map an ABI enumerant; returns `None` for values outside the legacy set
    pub fn from_abi(raw: u32) -> Option<Self> {
        match raw {
            abi::PIXEL_FORMAT_0RGB1555 => Some(Self::Rgb1555),
            abi::PIXEL_FORMAT_XRGB8888 => Some(Self::Xrgb8888),
            abi::PIXEL_FORMAT_RGB565 => Some(Self::Rgb565),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb1555 | Self::Rgb565 => 2,
            Self::Xrgb8888 | Self::Unknown => 4,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Rgb1555 => 0,
            Self::Xrgb8888 => 1,
            Self::Rgb565 => 2,
            Self::Unknown => u8::MAX,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        Self::from_abi(raw as u32).unwrap_or(Self::Unknown)
    }

    /// Every row must hold `width` pixels of this format
    pub fn check_pitch(self, width: u32, height: u32, pitch: usize) -> Result<(), CodecError> {
        if height > 0 && pitch < width as usize * self.bytes_per_pixel() {
            return Err(CodecError::PitchTooSmall {
                pitch,
                width,
                format: self,
            });
        }
        Ok(())
    }

    /// Bytes the plugin's buffer must span: every full row but the last,
    /// which only needs its visible pixels.
    pub fn required_len(self, width: u32, height: u32, pitch: usize) -> usize {
        if width == 0 || height == 0 {
            return 0;
        }
        pitch * (height as usize - 1) + width as usize * self.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("row pitch {pitch} is smaller than {width} pixels of {format:?}")]
    PitchTooSmall {
        pitch: usize,
        width: u32,
        format: PixelFormat,
    },
    #[error("frame buffer holds {actual} bytes, {required} needed")]
    BufferTooSmall { actual: usize, required: usize },
}

/// Convert one frame to tightly packed RGBA8888.
///
/// `pitch` is the byte distance between source rows and may include
/// padding. The alpha channel is always opaque for the legacy formats.
pub fn convert_frame(
    src: &[u8],
    width: u32,
    height: u32,
    pitch: usize,
    format: PixelFormat,
) -> Result<FrameData, CodecError> {
    let bpp = format.bytes_per_pixel();
    let row_bytes = width as usize * bpp;
    format.check_pitch(width, height, pitch)?;
    let required = format.required_len(width, height, pitch);
    if src.len() < required {
        return Err(CodecError::BufferTooSmall {
            actual: src.len(),
            required,
        });
    }

    let dst_row = width as usize * FrameData::BYTES_PER_PIXEL;
    let mut pixels = vec![0u8; dst_row * height as usize];

    for y in 0..height as usize {
        let row = &src[y * pitch..y * pitch + row_bytes];
        let out = &mut pixels[y * dst_row..(y + 1) * dst_row];
        match format {
            PixelFormat::Xrgb8888 => {
                for (px, dst) in row.chunks_exact(4).zip(out.chunks_exact_mut(4)) {
                    let v = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                    dst[0] = (v >> 16) as u8;
                    dst[1] = (v >> 8) as u8;
                    dst[2] = v as u8;
                    dst[3] = 0xFF;
                }
            }
            PixelFormat::Rgb565 => {
                for (px, dst) in row.chunks_exact(2).zip(out.chunks_exact_mut(4)) {
                    let v = u16::from_ne_bytes([px[0], px[1]]) as u32;
                    dst[0] = expand((v >> 11) & 0x1F, 31);
                    dst[1] = expand((v >> 5) & 0x3F, 63);
                    dst[2] = expand(v & 0x1F, 31);
                    dst[3] = 0xFF;
                }
            }
            PixelFormat::Rgb1555 => {
                for (px, dst) in row.chunks_exact(2).zip(out.chunks_exact_mut(4)) {
                    let v = u16::from_ne_bytes([px[0], px[1]]) as u32;
                    dst[0] = expand((v >> 10) & 0x1F, 31);
                    dst[1] = expand((v >> 5) & 0x1F, 31);
                    dst[2] = expand(v & 0x1F, 31);
                    dst[3] = 0xFF;
                }
            }
            PixelFormat::Unknown => out.copy_from_slice(row),
        }
    }

    Ok(FrameData {
        width,
        height,
        pixels,
    })
}

#[inline]
fn expand(value: u32, max: u32) -> u8 {
    (value * 255 / max) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_pixel(bytes: &[u8], format: PixelFormat) -> [u8; 4] {
        let frame = convert_frame(bytes, 1, 1, bytes.len(), format).unwrap();
        frame.pixel(0, 0).unwrap()
    }

    #[test]
    fn test_rgb565_pure_green() {
        let px = 0x07E0u16.to_ne_bytes();
        assert_eq!(one_pixel(&px, PixelFormat::Rgb565), [0, 255, 0, 255]);
    }

    #[test]
    fn test_rgb565_white_and_mid_red() {
        let white = 0xFFFFu16.to_ne_bytes();
        assert_eq!(one_pixel(&white, PixelFormat::Rgb565), [255, 255, 255, 255]);

        // 16/31 red, scaled rather than bit-replicated
        let red = (16u16 << 11).to_ne_bytes();
        assert_eq!(one_pixel(&red, PixelFormat::Rgb565), [131, 0, 0, 255]);
    }

    #[test]
    fn test_1555_max_white() {
        let px = 0x7FFFu16.to_ne_bytes();
        assert_eq!(one_pixel(&px, PixelFormat::Rgb1555), [255, 255, 255, 255]);
        let blue = 0x001Fu16.to_ne_bytes();
        assert_eq!(one_pixel(&blue, PixelFormat::Rgb1555), [0, 0, 255, 255]);
    }

    #[test]
    fn test_xrgb_channel_order() {
        let px = 0x00FF_8040u32.to_ne_bytes();
        assert_eq!(one_pixel(&px, PixelFormat::Xrgb8888), [0xFF, 0x80, 0x40, 0xFF]);

        // The unused byte never leaks into alpha
        let px = 0xAB00_0000u32.to_ne_bytes();
        assert_eq!(one_pixel(&px, PixelFormat::Xrgb8888), [0, 0, 0, 0xFF]);
    }

    #[test]
    fn test_unknown_copies_rows() {
        let px = [1, 2, 3, 4];
        assert_eq!(one_pixel(&px, PixelFormat::Unknown), [1, 2, 3, 4]);
    }

    #[test]
    fn test_stride_independence() {
        let (w, h) = (3u32, 2u32);
        let values: [u16; 6] = [0xF800, 0x07E0, 0x001F, 0xFFFF, 0x0000, 0x8410];

        let packed: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();

        // Same pixels with 5 padding bytes after each row
        let pitch = w as usize * 2 + 5;
        let mut padded = Vec::new();
        for row in values.chunks(w as usize) {
            for v in row {
                padded.extend_from_slice(&v.to_ne_bytes());
            }
            padded.extend_from_slice(&[0xEE; 5]);
        }

        let a = convert_frame(&packed, w, h, w as usize * 2, PixelFormat::Rgb565).unwrap();
        let b = convert_frame(&padded, w, h, pitch, PixelFormat::Rgb565).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.pixels.len(), (w * h * 4) as usize);
    }

    #[test]
    fn test_last_row_needs_no_padding() {
        let pitch = 8;
        let src = vec![0u8; pitch + 4];
        assert!(convert_frame(&src, 2, 2, pitch, PixelFormat::Rgb565).is_ok());
    }

    #[test]
    fn test_rejects_short_buffers() {
        assert!(matches!(
            convert_frame(&[0; 4], 4, 1, 4, PixelFormat::Rgb565),
            Err(CodecError::PitchTooSmall { .. })
        ));
        assert!(matches!(
            convert_frame(&[0; 6], 2, 2, 4, PixelFormat::Rgb565),
            Err(CodecError::BufferTooSmall {
                actual: 6,
                required: 8
            })
        ));
    }

    #[test]
    fn test_format_from_abi() {
        assert_eq!(PixelFormat::from_abi(0), Some(PixelFormat::Rgb1555));
        assert_eq!(PixelFormat::from_abi(1), Some(PixelFormat::Xrgb8888));
        assert_eq!(PixelFormat::from_abi(2), Some(PixelFormat::Rgb565));
        assert_eq!(PixelFormat::from_abi(3), None);
        assert_eq!(PixelFormat::default(), PixelFormat::Unknown);
        assert_eq!(PixelFormat::from_u8(PixelFormat::Unknown.to_u8()), PixelFormat::Unknown);
    }
}
