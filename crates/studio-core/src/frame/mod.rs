//! Live-view frame storage.
//!
//! Two distinct types model the two sides of the thread boundary:
//!
//! - [`buffer::FrameBuffer`] is the poller's *private*, mutable scratch area.
//!   It is sized to the requirement the SDK reports and reused across polls,
//!   so its contents become stale the instant the next poll overwrites them.
//!
//! - [`buffer::LiveFrame`] is an immutable, owned copy of the used portion of
//!   that buffer.  Only `LiveFrame`s ever leave the poller thread.
//!
//! [`jpeg::JpegGuard`] sits between the two: it locates the complete JPEG
//! image inside the fetched bytes and rejects truncated or undersized frames.

pub mod buffer;
pub mod jpeg;
