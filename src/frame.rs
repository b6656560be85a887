use crate::error::{Result, SegmentationError};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Pixel dimensions of a frame, mask or model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte length of an RGBA buffer of this size
    pub fn rgba_len(&self) -> usize {
        self.pixels() * FrameBuffer::RGBA_CHANNELS as usize
    }

    pub(crate) fn ensure_non_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(SegmentationError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Colorspaces a host may declare for its pixels.
///
/// Only `Rgba` is implemented; the normalizer rejects the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    Rgba,
    Bgra,
    Rgb,
    Bgr,
    Gray,
}

impl ColorSpace {
    pub fn channels(&self) -> u32 {
        match self {
            ColorSpace::Rgba | ColorSpace::Bgra => 4,
            ColorSpace::Rgb | ColorSpace::Bgr => 3,
            ColorSpace::Gray => 1,
        }
    }
}

/// A rectangular pixel buffer owned by the caller.
///
/// The pipeline only reads input frames and overwrites output frames in
/// place. `data.len()` always equals `width * height * channels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    channels: u32,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub const RGBA_CHANNELS: u32 = 4;

    /// Zeroed (fully transparent) RGBA frame
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    /// RGBA frame where every pixel is `pixel`
    pub fn filled(width: u32, height: u32, pixel: [u8; 4]) -> Self {
        let size = Size::new(width, height);
        Self {
            width,
            height,
            channels: Self::RGBA_CHANNELS,
            data: pixel.repeat(size.pixels()),
        }
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::from_raw(width, height, Self::RGBA_CHANNELS, data)
    }

    pub fn from_raw(width: u32, height: u32, channels: u32, data: Vec<u8>) -> Result<Self> {
        let expected = expected_len(width, height, channels)?;
        if data.len() != expected {
            return Err(SegmentationError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            channels: Self::RGBA_CHANNELS,
            data: image.into_raw(),
        }
    }

    /// View an RGBA frame as an `image` buffer
    pub fn to_image(&self) -> Option<RgbaImage> {
        if self.channels != Self::RGBA_CHANNELS {
            return None;
        }
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// RGBA value at `(x, y)`; panics outside the frame like slice indexing
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[idx..idx + 4]);
        px
    }

    pub(crate) fn ensure_rgba(&self) -> Result<()> {
        if self.channels != Self::RGBA_CHANNELS {
            return Err(SegmentationError::invalid_params(format!(
                "expected an RGBA frame, got {} channels",
                self.channels
            )));
        }
        self.size().ensure_non_empty()
    }

    /// Overwrite the pixel data in place, keeping the frame's dimensions
    pub(crate) fn write_pixels(&mut self, pixels: &[u8]) -> Result<()> {
        if pixels.len() != self.data.len() {
            return Err(SegmentationError::BufferLength {
                expected: self.data.len(),
                actual: pixels.len(),
            });
        }
        self.data.copy_from_slice(pixels);
        Ok(())
    }
}

fn expected_len(width: u32, height: u32, channels: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(channels as usize))
        .ok_or_else(|| SegmentationError::invalid_params("frame size overflows usize"))
}
