//! JPEG frame guard.
//!
//! Live-view frames arrive as JPEG images, sometimes with container padding
//! before the image or trailing bytes after it, and occasionally truncated by
//! a transfer hiccup.  The guard finds the first complete image, delimited by
//! the Start-Of-Image marker (`FF D8`) and the End-Of-Image marker (`FF D9`),
//! and rejects anything that is incomplete or implausibly small.
//!
//! Entropy-coded JPEG data byte-stuffs every `FF` as `FF 00`, so the first
//! `FF D9` after the SOI marks the end of the image.

use std::ops::Range;

/// Start-Of-Image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End-Of-Image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Returns the byte range of the first complete SOI..=EOI span in `bytes`.
pub fn find_jpeg_span(bytes: &[u8]) -> Option<Range<usize>> {
    let start = bytes.windows(2).position(|w| w == SOI)?;
    let tail = bytes.get(start + 2..)?;
    let eoi = tail.windows(2).position(|w| w == EOI)?;
    Some(start..start + 2 + eoi + 2)
}

/// Validates and trims fetched frame bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegGuard {
    /// Frames shorter than this (after trimming) are discarded.
    pub min_frame_bytes: usize,
}

impl JpegGuard {
    pub fn new(min_frame_bytes: usize) -> Self {
        Self { min_frame_bytes }
    }

    /// Returns the complete JPEG image inside `bytes`, or `None` if there is
    /// no complete image or it is shorter than `min_frame_bytes`.
    pub fn extract<'a>(&self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        let span = find_jpeg_span(bytes)?;
        if span.len() < self.min_frame_bytes {
            return None;
        }
        Some(&bytes[span])
    }
}

impl Default for JpegGuard {
    fn default() -> Self {
        Self::new(2048)
    }
}
