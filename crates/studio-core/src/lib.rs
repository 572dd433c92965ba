//! # studio-core
//!
//! Shared library for the studio camera preview containing the overlay
//! compositor, live-view frame buffers, and the drift-corrected poll cadence.
//!
//! This crate is used by the camera application (`studio-camera`).
//! It has zero dependencies on the vendor SDK, OS threads, or UI frameworks.
//!
//! # Architecture overview (for beginners)
//!
//! The studio camera shows a live preview from a tethered camera with pose and
//! face alignment guides drawn on top of it.  The guides are an opaque "mask"
//! covering the whole preview with transparent "holes" punched where the
//! subject should place their face or body.
//!
//! This crate (`studio-core`) is the platform-independent foundation.  It
//! defines:
//!
//! - **`overlay`** – The compositor.  Named hole paths are combined into one
//!   compound path and filled with the *even-odd* rule, so a point inside an
//!   odd number of holes is revealed and a point inside an even number (zero
//!   included) stays masked.
//!
//! - **`frame`** – The reusable byte buffer the poller fetches into, the owned
//!   [`LiveFrame`] copy that crosses the thread boundary, and the JPEG span
//!   guard that discards truncated frames.
//!
//! - **`cadence`** – The absolute-schedule timer that keeps the poller close to
//!   its nominal frame rate even when individual SDK calls vary in latency.

// Declare the three top-level modules.
pub mod cadence;
pub mod frame;
pub mod overlay;

// Re-export the most-used types at the crate root so callers can write
// `studio_core::OverlayCompositor` instead of the full module path.
pub use cadence::PollCadence;
pub use frame::buffer::{FrameBuffer, FrameError, LiveFrame};
pub use frame::jpeg::JpegGuard;
pub use overlay::compositor::{CompositeMask, GuideMark, OverlayCompositor, OverlayStyle, PaintedSurface};
pub use overlay::frame_image::FrameImage;
pub use overlay::path::{fit_ratio_rect, GuidePath, GuidePathBuilder, HoleShape, Point};
pub use overlay::{OverlayError, Rgba};
