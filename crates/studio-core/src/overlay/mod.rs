//! Overlay compositor: alignment guides drawn over the live preview.
//!
//! # How the mask works (for beginners)
//!
//! The overlay is an opaque sheet laid over the camera preview.  Holes are cut
//! into the sheet where the live image should show through, for example an
//! ellipse where the subject's face belongs.
//!
//! Each hole is a closed path.  All holes are merged into a single compound
//! path together with the rectangle that covers the whole surface, and that
//! compound path is filled with the **even-odd** rule:
//!
//! ```text
//! crossings of a ray from the point to infinity
//!   outer rectangle   +1
//!   each hole around  +1
//!
//! odd  total  → filled (masked)
//! even total  → empty  (revealed)
//! ```
//!
//! Because the outer rectangle always contributes one crossing, a point that
//! lies inside an odd number of holes is revealed, and a point inside an even
//! number of holes (including zero) stays masked.  Nesting therefore
//! alternates: a hole drawn inside another hole re-covers its area.
//!
//! # Sub-modules
//!
//! - **`path`** – hole and guide geometry ([`GuidePath`]) plus the
//!   serializable [`HoleShape`] used by configuration files.
//! - **`frame_image`** – the decoded live frame drawn beneath the mask.
//! - **`compositor`** – the [`OverlayCompositor`] itself.
//!
//! [`GuidePath`]: path::GuidePath
//! [`HoleShape`]: path::HoleShape
//! [`OverlayCompositor`]: compositor::OverlayCompositor

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod compositor;
pub mod frame_image;
pub mod path;

/// Errors produced by the overlay compositor and its geometry helpers.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// A shape could not be turned into a closed, finite path.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The compositor surface must be at least one pixel in each direction.
    #[error("surface size {width}x{height} is empty")]
    EmptySurface { width: u32, height: u32 },

    /// Raw RGBA pixel data did not match the declared dimensions.
    #[error("pixel data has {actual} bytes, expected {expected}")]
    PixelDataLength { expected: usize, actual: usize },

    /// A live frame could not be decoded.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),

    /// The painted surface could not be encoded to PNG.
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

/// An 8-bit straight-alpha colour.
///
/// Serializes as a four-element array, e.g. `mask_color = [238, 238, 238, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 4]", into = "[u8; 4]")]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub(crate) fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }
}

impl From<[u8; 4]> for Rgba {
    fn from([r, g, b, a]: [u8; 4]) -> Self {
        Self::new(r, g, b, a)
    }
}

impl From<Rgba> for [u8; 4] {
    fn from(c: Rgba) -> Self {
        [c.r, c.g, c.b, c.a]
    }
}
