//! Reusable fetch buffer and the owned frame copy delivered to consumers.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

/// Errors raised when recording how much of a [`FrameBuffer`] was filled.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The producer reported writing more bytes than the buffer holds.
    #[error("used length {used} exceeds buffer capacity {capacity}")]
    UsedExceedsCapacity { used: usize, capacity: usize },
}

/// A mutable byte region sized to the SDK-reported requirement.
///
/// The buffer only ever grows: a smaller requirement leaves the existing
/// allocation in place, a larger one reallocates.  The "used length" is always
/// less than or equal to the capacity.
#[derive(Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
    used: usize,
}

impl FrameBuffer {
    /// Creates an empty, unallocated buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Returns how many bytes of the last fetch are valid.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Grows the buffer to hold `required` bytes.
    ///
    /// Returns `true` if the buffer was reallocated.  A requirement at or
    /// below the current capacity is a no-op.
    pub fn ensure_capacity(&mut self, required: usize) -> bool {
        if required <= self.data.len() {
            return false;
        }
        self.data = vec![0u8; required];
        self.used = 0;
        true
    }

    /// Returns the whole buffer for the next fetch and marks it empty.
    ///
    /// Anything previously filled is considered stale from this point on.
    pub fn writable(&mut self) -> &mut [u8] {
        self.used = 0;
        &mut self.data
    }

    /// Records that the last fetch wrote `used` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UsedExceedsCapacity`] (and leaves the buffer
    /// empty) if `used` is larger than the capacity.
    pub fn commit(&mut self, used: usize) -> Result<(), FrameError> {
        if used > self.data.len() {
            self.used = 0;
            return Err(FrameError::UsedExceedsCapacity {
                used,
                capacity: self.data.len(),
            });
        }
        self.used = used;
        Ok(())
    }

    /// Returns the valid portion of the last fetch.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.used]
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("capacity", &self.data.len())
            .field("used", &self.used)
            .finish()
    }
}

/// An immutable, owned live-view frame.
///
/// `LiveFrame` is the only frame type that crosses from the poller thread to
/// consumers.  The bytes are copied out of the poller's [`FrameBuffer`] before
/// delivery, so the next poll cannot overwrite what a consumer is holding.
/// Cloning is cheap: the byte slice is reference counted.
#[derive(Clone, PartialEq, Eq)]
pub struct LiveFrame {
    sequence: u64,
    captured_at: Instant,
    bytes: Arc<[u8]>,
}

impl LiveFrame {
    /// Creates a frame by copying `bytes`.
    pub fn copy_from(sequence: u64, captured_at: Instant, bytes: &[u8]) -> Self {
        Self {
            sequence,
            captured_at,
            bytes: Arc::from(bytes),
        }
    }

    /// Monotonically increasing number assigned by the producing poller.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the frame finished arriving from the SDK.
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// The encoded frame bytes (normally a JPEG image).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for LiveFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveFrame")
            .field("sequence", &self.sequence)
            .field("len", &self.bytes.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_unallocated() {
        let buf = FrameBuffer::new();
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.capacity(), 0);
        assert!(buf.filled().is_empty());
    }

    #[test]
    fn test_ensure_capacity_grows_only_on_larger_requirement() {
        // Arrange
        let mut buf = FrameBuffer::new();

        // Act / Assert
        assert!(buf.ensure_capacity(4096));
        assert_eq!(buf.capacity(), 4096);
        assert!(!buf.ensure_capacity(1024), "smaller requirement must not reallocate");
        assert_eq!(buf.capacity(), 4096);
        assert!(!buf.ensure_capacity(4096));
        assert!(buf.ensure_capacity(8192));
        assert_eq!(buf.capacity(), 8192);
    }

    #[test]
    fn test_commit_exposes_only_used_bytes() {
        // Arrange
        let mut buf = FrameBuffer::new();
        buf.ensure_capacity(8);
        buf.writable()[..3].copy_from_slice(&[1, 2, 3]);

        // Act
        buf.commit(3).expect("3 <= 8");

        // Assert
        assert_eq!(buf.filled(), &[1, 2, 3]);
        assert_eq!(buf.used(), 3);
    }

    #[test]
    fn test_commit_rejects_used_beyond_capacity() {
        // Arrange
        let mut buf = FrameBuffer::new();
        buf.ensure_capacity(4);

        // Act
        let result = buf.commit(5);

        // Assert
        assert_eq!(
            result,
            Err(FrameError::UsedExceedsCapacity { used: 5, capacity: 4 })
        );
        assert_eq!(buf.used(), 0);
    }

    #[test]
    fn test_writable_marks_previous_contents_stale() {
        let mut buf = FrameBuffer::new();
        buf.ensure_capacity(4);
        buf.commit(4).unwrap();

        let _ = buf.writable();

        assert_eq!(buf.used(), 0);
    }

    #[test]
    fn test_live_frame_is_independent_of_source_buffer() {
        // Arrange
        let mut buf = FrameBuffer::new();
        buf.ensure_capacity(4);
        buf.writable().copy_from_slice(&[9, 9, 9, 9]);
        buf.commit(4).unwrap();

        // Act – copy out, then overwrite the buffer as the next poll would
        let frame = LiveFrame::copy_from(1, Instant::now(), buf.filled());
        buf.writable().copy_from_slice(&[0, 0, 0, 0]);

        // Assert
        assert_eq!(frame.bytes(), &[9, 9, 9, 9]);
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.len(), 4);
    }
}
