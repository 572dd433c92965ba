//! Consumer side of the poller → UI frame hand-off.
//!
//! The poller thread never calls into UI code.  It hands each owned
//! [`LiveFrame`] to a [`FrameSink`]; the usual sink is a [`ChannelSink`] whose
//! receiving end is drained by the UI loop.
//!
//! The channel is bounded and the sink never blocks.  When the consumer falls
//! behind, the newest frame is dropped rather than queued, so the preview
//! always shows recent frames and memory stays bounded.

use studio_core::LiveFrame;
use thiserror::Error;
use tokio::sync::mpsc;

/// Reasons a frame could not be handed to the consumer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The consumer's queue is full; the frame was dropped.
    #[error("consumer queue full; frame {sequence} dropped")]
    Backpressure { sequence: u64 },

    /// The consumer has gone away.
    #[error("frame consumer closed")]
    Closed,

    /// The consumer refused the frame.
    #[error("frame rejected: {0}")]
    Rejected(String),
}

/// Receives frames on the poller thread.
///
/// Implementations must return quickly: the poller waits for `deliver` before
/// scheduling the next tick.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSink: Send + 'static {
    fn deliver(&mut self, frame: LiveFrame) -> Result<(), SinkError>;
}

impl<F> FrameSink for F
where
    F: FnMut(LiveFrame) -> Result<(), SinkError> + Send + 'static,
{
    fn deliver(&mut self, frame: LiveFrame) -> Result<(), SinkError> {
        self(frame)
    }
}

/// A [`FrameSink`] feeding a bounded Tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<LiveFrame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<LiveFrame>) -> Self {
        Self { tx }
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&mut self, frame: LiveFrame) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(frame) => SinkError::Backpressure {
                sequence: frame.sequence(),
            },
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Creates a bounded frame channel.  A capacity of 0 is treated as 1.
pub fn frame_channel(capacity: usize) -> (ChannelSink, mpsc::Receiver<LiveFrame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn frame(seq: u64) -> LiveFrame {
        LiveFrame::copy_from(seq, Instant::now(), &[0xFF, 0xD8, 0xFF, 0xD9])
    }

    #[test]
    fn test_channel_sink_delivers_in_order() {
        // Arrange
        let (mut sink, mut rx) = frame_channel(4);

        // Act
        sink.deliver(frame(1)).unwrap();
        sink.deliver(frame(2)).unwrap();

        // Assert
        assert_eq!(rx.try_recv().unwrap().sequence(), 1);
        assert_eq!(rx.try_recv().unwrap().sequence(), 2);
    }

    #[test]
    fn test_channel_sink_drops_newest_when_full() {
        // Arrange
        let (mut sink, mut rx) = frame_channel(1);
        sink.deliver(frame(1)).unwrap();

        // Act
        let result = sink.deliver(frame(2));

        // Assert
        assert_eq!(result, Err(SinkError::Backpressure { sequence: 2 }));
        assert_eq!(rx.try_recv().unwrap().sequence(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_reports_closed_receiver() {
        let (mut sink, rx) = frame_channel(1);
        drop(rx);

        assert_eq!(sink.deliver(frame(1)), Err(SinkError::Closed));
    }

    #[test]
    fn test_zero_capacity_is_treated_as_one() {
        let (mut sink, _rx) = frame_channel(0);
        assert!(sink.deliver(frame(1)).is_ok());
    }

    #[test]
    fn test_closure_is_a_sink() {
        let mut owned = move |f: LiveFrame| -> Result<(), SinkError> {
            Err(SinkError::Rejected(format!("frame {}", f.sequence())))
        };
        assert_eq!(
            FrameSink::deliver(&mut owned, frame(3)),
            Err(SinkError::Rejected("frame 3".to_string()))
        );
    }

    #[test]
    fn test_mock_sink_records_deliveries() {
        let mut sink = MockFrameSink::new();
        sink.expect_deliver()
            .withf(|f| f.sequence() == 5)
            .times(1)
            .returning(|_| Ok(()));

        assert!(sink.deliver(frame(5)).is_ok());
    }
}
