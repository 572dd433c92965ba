//! The decoded live frame drawn beneath the mask.

use tiny_skia::{IntSize, Pixmap};

use super::{OverlayError, Rgba};

/// A decoded RGBA image ready to be drawn by the compositor.
///
/// Pixels are stored premultiplied, which is what the rasterizer expects.
#[derive(Clone, PartialEq)]
pub struct FrameImage {
    pixmap: Pixmap,
}

impl FrameImage {
    /// Builds an image from straight-alpha RGBA bytes, row-major, no padding.
    ///
    /// # Errors
    ///
    /// - [`OverlayError::EmptySurface`] if either dimension is zero.
    /// - [`OverlayError::PixelDataLength`] if `rgba` is not exactly
    ///   `width * height * 4` bytes.
    pub fn from_rgba(width: u32, height: u32, mut rgba: Vec<u8>) -> Result<Self, OverlayError> {
        let size = IntSize::from_wh(width, height).ok_or(OverlayError::EmptySurface { width, height })?;
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(OverlayError::PixelDataLength {
                expected,
                actual: rgba.len(),
            });
        }

        for px in rgba.chunks_exact_mut(4) {
            let a = u16::from(px[3]);
            if a == 255 {
                continue;
            }
            for c in &mut px[..3] {
                *c = ((u16::from(*c) * a + 127) / 255) as u8;
            }
        }

        let pixmap = Pixmap::from_vec(rgba, size).ok_or(OverlayError::EmptySurface { width, height })?;
        Ok(Self { pixmap })
    }

    /// Decodes a JPEG live-view frame.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Decode`] if the bytes are not a valid JPEG.
    pub fn decode_jpeg(bytes: &[u8]) -> Result<Self, OverlayError> {
        let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        Self::from_rgba(width, height, decoded.into_raw())
    }

    /// An image filled with a single colour.
    pub fn solid(width: u32, height: u32, color: Rgba) -> Result<Self, OverlayError> {
        let mut pixmap = Pixmap::new(width, height).ok_or(OverlayError::EmptySurface { width, height })?;
        pixmap.fill(color.to_skia());
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub(crate) fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }
}

impl std::fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_checks_length() {
        let err = FrameImage::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::PixelDataLength {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    fn test_from_rgba_rejects_empty_dimensions() {
        assert!(matches!(
            FrameImage::from_rgba(0, 4, Vec::new()),
            Err(OverlayError::EmptySurface { width: 0, height: 4 })
        ));
    }

    #[test]
    fn test_from_rgba_premultiplies_translucent_pixels() {
        // Arrange – one half-transparent white pixel
        let image = FrameImage::from_rgba(1, 1, vec![255, 255, 255, 128]).unwrap();

        // Act
        let px = image.pixmap().pixel(0, 0).expect("pixel in range");

        // Assert
        assert_eq!((px.red(), px.green(), px.blue(), px.alpha()), (128, 128, 128, 128));
    }

    #[test]
    fn test_decode_jpeg_rejects_garbage() {
        assert!(matches!(
            FrameImage::decode_jpeg(&[0xFF, 0xD8, 0x00, 0x01, 0xFF, 0xD9]),
            Err(OverlayError::Decode(_))
        ));
    }

    #[test]
    fn test_solid_has_requested_size() {
        let image = FrameImage::solid(3, 5, Rgba::opaque(1, 2, 3)).unwrap();
        assert_eq!((image.width(), image.height()), (3, 5));
    }
}
