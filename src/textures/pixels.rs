//! Uncompressed editable pixel buffer

use image::{DynamicImage, RgbImage, RgbaImage};
use std::path::Path;

use super::error::{CodecError, CodecResult};

/// Row-major 8-bit RGB or RGBA pixels
///
/// `data.len() == width * height * channels` holds for every constructed buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw pixel data, checking its length against the geometry.
    ///
    /// Returns `None` for channel counts other than 3 or 4, or a length mismatch.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Option<Self> {
        if channels != 3 && channels != 4 {
            return None;
        }
        if Some(data.len()) != expected_len(width, height, channels) {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// 4-channel buffer
    pub fn rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        Self::new(width, height, 4, data)
    }

    /// 3-channel buffer
    pub fn rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        Self::new(width, height, 3, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn has_alpha(&self) -> bool {
        self.channels == 4
    }

    /// Convert to RGBA, filling a missing alpha channel with 255.
    pub fn into_rgba(self) -> Self {
        if self.channels == 4 {
            return self;
        }
        let mut data = Vec::with_capacity(self.data.len() / 3 * 4);
        for px in self.data.chunks_exact(3) {
            data.extend_from_slice(px);
            data.push(u8::MAX);
        }
        Self {
            width: self.width,
            height: self.height,
            channels: 4,
            data,
        }
    }

    /// Borrowing variant of [`PixelBuffer::into_rgba`]
    pub fn to_rgba(&self) -> Self {
        self.clone().into_rgba()
    }

    /// Hand the pixels to the `image` crate
    pub fn to_dynamic_image(&self) -> DynamicImage {
        // Length invariant makes from_raw infallible here
        match self.channels {
            3 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgb8),
            _ => RgbaImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgba8),
        }
        .unwrap_or_else(|| DynamicImage::new_rgba8(self.width, self.height))
    }

    /// Take pixels from the `image` crate, keeping RGB when there is no alpha
    pub fn from_dynamic_image(image: DynamicImage) -> Self {
        if image.color().has_alpha() {
            let rgba = image.into_rgba8();
            let (width, height) = rgba.dimensions();
            Self {
                width,
                height,
                channels: 4,
                data: rgba.into_raw(),
            }
        } else {
            let rgb = image.into_rgb8();
            let (width, height) = rgb.dimensions();
            Self {
                width,
                height,
                channels: 3,
                data: rgb.into_raw(),
            }
        }
    }

    /// Load an editable image (PNG or anything `image` can read)
    pub fn load(path: &Path) -> CodecResult<Self> {
        let image = image::open(path).map_err(|source| CodecError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_dynamic_image(image))
    }

    /// Save as an editable image; format follows the extension
    pub fn save(&self, path: &Path) -> CodecResult<()> {
        self.to_dynamic_image()
            .save(path)
            .map_err(|source| CodecError::Image {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn expected_len(width: u32, height: u32, channels: u8) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(channels as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_invariant() {
        assert!(PixelBuffer::rgba(2, 2, vec![0; 16]).is_some());
        assert!(PixelBuffer::rgba(2, 2, vec![0; 15]).is_none());
        assert!(PixelBuffer::rgb(2, 2, vec![0; 12]).is_some());
        assert!(PixelBuffer::new(2, 2, 2, vec![0; 8]).is_none());
        assert!(PixelBuffer::rgba(u32::MAX, u32::MAX, Vec::new()).is_none());
    }

    #[test]
    fn test_alpha_synthesis() {
        let rgb = PixelBuffer::rgb(3, 2, (0..18).collect()).unwrap();
        let rgba = rgb.into_rgba();
        assert_eq!(rgba.channels(), 4);
        assert_eq!(rgba.data().len(), 3 * 2 * 4);
        assert!(rgba.data().chunks_exact(4).all(|px| px[3] == 255));
        assert_eq!(&rgba.data()[..8], &[0, 1, 2, 255, 3, 4, 5, 255]);
    }

    #[test]
    fn test_png_roundtrip_keeps_channels() {
        let dir = tempfile::tempdir().unwrap();

        let rgb = PixelBuffer::rgb(4, 4, vec![10; 48]).unwrap();
        let rgb_path = dir.path().join("rgb.png");
        rgb.save(&rgb_path).unwrap();
        assert_eq!(PixelBuffer::load(&rgb_path).unwrap(), rgb);

        let rgba = PixelBuffer::rgba(4, 4, (0..64).collect()).unwrap();
        let rgba_path = dir.path().join("rgba.png");
        rgba.save(&rgba_path).unwrap();
        assert_eq!(PixelBuffer::load(&rgba_path).unwrap(), rgba);
    }
}
