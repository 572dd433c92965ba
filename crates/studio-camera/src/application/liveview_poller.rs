//! Background live-view poller.
//!
//! # What the poller does (for beginners)
//!
//! The camera does not push preview frames; they have to be pulled.  The
//! poller owns a dedicated OS thread that repeats one *tick* at a fixed rate:
//!
//! ```text
//! ┌─ tick ───────────────────────────────────────────────────────────────┐
//! │ 1. stopped or superseded?               → exit                       │
//! │ 2. keep-alive due?                      → enable_liveview(on)        │
//! │ 3. query_frame_size                     → 0? retry with backoff      │
//! │ 4. grow FrameBuffer if required                                      │
//! │ 5. fetch_frame into the buffer                                       │
//! │ 6. trim to the JPEG span, drop short or truncated frames             │
//! │ 7. copy into an owned LiveFrame and hand it to the FrameSink         │
//! │ 8. sleep until the next absolute deadline (PollCadence)              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fetch buffer never leaves the thread.  Consumers only ever see owned
//! [`LiveFrame`] copies.
//!
//! # One poller per process
//!
//! A process-wide *generation* number decides which worker is active.
//! [`LiveViewPoller::start`] bumps it, so any older worker (from this
//! controller or another) sees that it has been superseded and exits at its
//! next check.  The worker checks its generation before every native call
//! and again right before each delivery, so after `start` or `stop` returns
//! no new fetch or delivery begins.
//!
//! `stop` never blocks.  A native call or consumer callback that is already
//! running finishes on the poller thread; once
//! [`LiveViewPoller::wait_stopped`] returns `Ok`, no callback can run.  A call
//! that hangs stalls only the poller thread, and `wait_stopped` gives up after
//! its timeout.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use studio_core::{FrameBuffer, JpegGuard, LiveFrame, PollCadence};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::frame_sink::{FrameSink, SinkError};
use crate::infrastructure::sdk::{CameraSdk, Capabilities, DeviceHandle};

/// Process-wide active generation.  Only the worker whose generation matches
/// may deliver frames.
static ACTIVE_GENERATION: AtomicU64 = AtomicU64::new(0);

fn is_current(generation: u64) -> bool {
    ACTIVE_GENERATION.load(Ordering::Acquire) == generation
}

/// Error type for poller control operations.
#[derive(Debug, Error)]
pub enum PollerError {
    /// The loaded library cannot stream live view.
    #[error("camera library does not support live view")]
    LiveViewUnsupported,

    /// The OS refused to create the poller thread.
    #[error("failed to spawn poller thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker was still inside a native call when the wait expired.
    #[error("poller thread did not stop within {0:?}")]
    StopTimeout(Duration),
}

/// Tuning for one poller run.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerSettings {
    /// Target ticks per second, clamped to 1..=60.
    pub fps: u32,
    /// Interval between live-view re-enable calls.
    pub keepalive: Duration,
    /// Extra size queries within one tick while the camera reports 0.
    pub not_ready_retries: u32,
    /// Pause between those queries.
    pub not_ready_backoff: Duration,
    /// Frames shorter than this are dropped.
    pub min_frame_bytes: usize,
    /// Deliver only the SOI..EOI span of each frame.
    pub trim_to_jpeg: bool,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            fps: 15,
            keepalive: Duration::from_secs(2),
            not_ready_retries: 5,
            not_ready_backoff: Duration::from_millis(80),
            min_frame_bytes: 2048,
            trim_to_jpeg: true,
        }
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
}

/// Counters for the current (or most recent) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub ticks: u64,
    pub frames_delivered: u64,
    /// Frames dropped by the JPEG guard or by consumer backpressure.
    pub frames_dropped: u64,
    /// Consumer errors and panics.
    pub sink_failures: u64,
    /// Ticks on which the camera never reported a frame size.
    pub not_ready_ticks: u64,
    pub fetch_failures: u64,
    /// Schedule slots skipped after an overrun.
    pub skipped_slots: u64,
}

/// Owns the live-view worker thread.
///
/// Dropping the controller stops the worker without waiting for it.
pub struct LiveViewPoller {
    sdk: Arc<dyn CameraSdk>,
    generation: Option<u64>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<PollStats>>,
}

impl LiveViewPoller {
    pub fn new(sdk: Arc<dyn CameraSdk>) -> Self {
        Self {
            sdk,
            generation: None,
            workers: Vec::new(),
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    /// Starts polling `handle` and delivering frames to `sink`.
    ///
    /// Supersedes any poller already running in this process.  The handle is
    /// shared with the worker until the worker exits.
    ///
    /// # Errors
    ///
    /// - [`PollerError::LiveViewUnsupported`] if the library lacks the
    ///   live-view exports.
    /// - [`PollerError::Spawn`] if the thread cannot be created.
    pub fn start(
        &mut self,
        handle: Arc<DeviceHandle>,
        sink: impl FrameSink,
        settings: PollerSettings,
    ) -> Result<(), PollerError> {
        if !self.sdk.capabilities().contains(Capabilities::LIVEVIEW) {
            return Err(PollerError::LiveViewUnsupported);
        }
        self.workers.retain(|w| !w.is_finished());

        let generation = ACTIVE_GENERATION.fetch_add(1, Ordering::AcqRel) + 1;
        self.generation = Some(generation);
        // Fresh counters so a superseded worker cannot touch them.
        self.stats = Arc::new(Mutex::new(PollStats::default()));

        let worker = Worker {
            sdk: Arc::clone(&self.sdk),
            handle,
            sink: Box::new(sink),
            settings,
            generation,
            stats: Arc::clone(&self.stats),
        };
        let join = thread::Builder::new()
            .name("liveview-poller".to_string())
            .spawn(move || worker.run())
            .map_err(PollerError::Spawn)?;
        self.workers.push(join);

        info!(generation, "live-view poller started");
        Ok(())
    }

    /// Asks the worker to stop.  Never blocks.
    ///
    /// No new fetch or delivery begins after this returns; a callback that
    /// is already running may still finish.  Use
    /// [`wait_stopped`](Self::wait_stopped) to wait for it.  Does nothing if
    /// another controller has already superseded this one.
    pub fn stop(&mut self) {
        let Some(generation) = self.generation.take() else {
            return;
        };
        if ACTIVE_GENERATION
            .compare_exchange(generation, generation + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(generation, "live-view poller stop requested");
        }
    }

    /// Waits up to `timeout` for every worker this controller started to exit.
    ///
    /// # Errors
    ///
    /// Returns [`PollerError::StopTimeout`] if a worker is still running,
    /// typically because a native call has not returned.
    pub fn wait_stopped(&mut self, timeout: Duration) -> Result<(), PollerError> {
        let deadline = Instant::now() + timeout;
        while self.workers.iter().any(|w| !w.is_finished()) {
            if Instant::now() >= deadline {
                warn!(?timeout, "live-view poller still busy after stop");
                return Err(PollerError::StopTimeout(timeout));
            }
            thread::sleep(Duration::from_millis(2));
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("live-view poller thread panicked");
            }
        }
        Ok(())
    }

    pub fn state(&self) -> PollerState {
        match self.generation {
            Some(g) if is_current(g) && self.workers.last().is_some_and(|w| !w.is_finished()) => {
                PollerState::Running
            }
            _ => PollerState::Idle,
        }
    }

    pub fn stats(&self) -> PollStats {
        *lock_stats(&self.stats)
    }
}

impl Drop for LiveViewPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_stats(stats: &Mutex<PollStats>) -> MutexGuard<'_, PollStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Worker ────────────────────────────────────────────────────────────────────

/// Outcome of handing one frame to the sink.
enum Delivery {
    Done,
    Superseded,
}

struct Worker {
    sdk: Arc<dyn CameraSdk>,
    handle: Arc<DeviceHandle>,
    sink: Box<dyn FrameSink>,
    settings: PollerSettings,
    generation: u64,
    stats: Arc<Mutex<PollStats>>,
}

impl Worker {
    fn run(mut self) {
        let start = Instant::now();
        let mut cadence = PollCadence::new(self.settings.fps, start);
        let mut buffer = FrameBuffer::new();
        let guard = JpegGuard::new(self.settings.min_frame_bytes);
        let mut last_keepalive = start;
        let mut sequence = 0u64;
        let mut reported_closed = false;

        debug!(
            generation = self.generation,
            fps = cadence.fps(),
            handle = ?self.handle,
            "live-view poller running"
        );

        while is_current(self.generation) {
            self.bump(|s| s.ticks += 1);

            let now = Instant::now();
            if now.duration_since(last_keepalive) >= self.settings.keepalive {
                let rc = self.sdk.enable_liveview(&self.handle, true);
                if !rc.is_ok() {
                    debug!(name = %self.sdk.error_name(rc), "live-view keep-alive failed");
                }
                last_keepalive = now;
            }

            if let Some(bytes) = self.poll_once(&mut buffer, &guard) {
                sequence += 1;
                let frame = LiveFrame::copy_from(sequence, Instant::now(), bytes);
                match self.deliver(frame, &mut reported_closed) {
                    Delivery::Done => {}
                    Delivery::Superseded => break,
                }
            }

            let skipped_before = cadence.skipped_slots();
            let pause = cadence.advance(Instant::now());
            let skipped = cadence.skipped_slots() - skipped_before;
            if skipped > 0 {
                self.bump(|s| s.skipped_slots += skipped);
            }
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }

        debug!(generation = self.generation, frames = sequence, "live-view poller exited");
    }

    /// Queries, fetches, and validates one frame.  Returns the bytes to
    /// deliver, borrowed from `buffer`.
    fn poll_once<'b>(&self, buffer: &'b mut FrameBuffer, guard: &JpegGuard) -> Option<&'b [u8]> {
        if !is_current(self.generation) {
            return None;
        }
        let mut required = self.sdk.query_frame_size(&self.handle);
        let mut retries = 0;
        while required == 0 && retries < self.settings.not_ready_retries {
            retries += 1;
            thread::sleep(self.settings.not_ready_backoff);
            if !is_current(self.generation) {
                return None;
            }
            required = self.sdk.query_frame_size(&self.handle);
        }
        if required == 0 {
            trace!(retries, "live view not ready");
            self.bump(|s| s.not_ready_ticks += 1);
            return None;
        }

        if buffer.ensure_capacity(required) {
            debug!(capacity = required, "frame buffer grown");
        }

        if !is_current(self.generation) {
            return None;
        }
        let (rc, used) = self.sdk.fetch_frame(&self.handle, buffer.writable());
        if !rc.is_ok() {
            debug!(code = rc.0, name = %self.sdk.error_name(rc), "frame fetch failed");
            self.bump(|s| s.fetch_failures += 1);
            return None;
        }
        if let Err(e) = buffer.commit(used) {
            warn!("discarding frame: {e}");
            self.bump(|s| s.fetch_failures += 1);
            return None;
        }
        if used == 0 {
            return None;
        }

        let filled = buffer.filled();
        if !self.settings.trim_to_jpeg {
            return Some(filled);
        }
        match guard.extract(filled) {
            Some(jpeg) => Some(jpeg),
            None => {
                trace!(used, "frame has no complete JPEG of the minimum size");
                self.bump(|s| s.frames_dropped += 1);
                None
            }
        }
    }

    /// Hands `frame` to the sink if this worker is still current.
    fn deliver(&mut self, frame: LiveFrame, reported_closed: &mut bool) -> Delivery {
        if !is_current(self.generation) {
            return Delivery::Superseded;
        }

        let sequence = frame.sequence();
        let sink: &mut dyn FrameSink = self.sink.as_mut();
        let outcome = catch_unwind(AssertUnwindSafe(|| sink.deliver(frame)));

        match outcome {
            Ok(Ok(())) => self.bump(|s| s.frames_delivered += 1),
            Ok(Err(SinkError::Backpressure { .. })) => {
                trace!(sequence, "consumer busy; frame dropped");
                self.bump(|s| s.frames_dropped += 1);
            }
            Ok(Err(SinkError::Closed)) => {
                if !*reported_closed {
                    warn!("frame consumer closed; frames will be discarded");
                    *reported_closed = true;
                }
                self.bump(|s| s.sink_failures += 1);
            }
            Ok(Err(e)) => {
                warn!(sequence, "frame consumer failed: {e}");
                self.bump(|s| s.sink_failures += 1);
            }
            Err(panic) => {
                error!(sequence, "frame consumer panicked: {}", panic_message(&*panic));
                self.bump(|s| s.sink_failures += 1);
            }
        }
        Delivery::Done
    }

    fn bump(&self, f: impl FnOnce(&mut PollStats)) {
        f(&mut lock_stats(&self.stats));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use serial_test::serial;

    use super::*;
    use crate::application::frame_sink::frame_channel;
    use crate::infrastructure::sdk::mock::MockCameraSdk;

    fn connected_mock() -> (Arc<MockCameraSdk>, Arc<DeviceHandle>) {
        let sdk = Arc::new(MockCameraSdk::new());
        sdk.initialize();
        let (_, handle) = sdk.connect_first();
        let handle = Arc::new(handle.expect("mock connects"));
        sdk.enable_liveview(&handle, true);
        (sdk, handle)
    }

    fn accept_all(_frame: LiveFrame) -> Result<(), SinkError> {
        Ok(())
    }

    fn fast_settings() -> PollerSettings {
        PollerSettings {
            fps: 60,
            not_ready_backoff: Duration::from_millis(1),
            ..PollerSettings::default()
        }
    }

    #[test]
    #[serial]
    fn test_start_requires_liveview_capability() {
        // Arrange
        let sdk = Arc::new(MockCameraSdk::with_capabilities(Capabilities::CONNECT));
        sdk.initialize();
        let (_, handle) = sdk.connect_first();
        let mut poller = LiveViewPoller::new(sdk);

        // Act
        let result = poller.start(Arc::new(handle.unwrap()), accept_all, PollerSettings::default());

        // Assert
        assert!(matches!(result, Err(PollerError::LiveViewUnsupported)));
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[test]
    #[serial]
    fn test_delivers_sequenced_frames_then_stops() {
        // Arrange
        let (sdk, handle) = connected_mock();
        let (sink, mut rx) = frame_channel(16);
        let mut poller = LiveViewPoller::new(sdk);

        // Act
        poller.start(handle, sink, fast_settings()).unwrap();
        let first = rx.blocking_recv().expect("first frame");
        let second = rx.blocking_recv().expect("second frame");
        poller.stop();
        poller.wait_stopped(Duration::from_secs(2)).unwrap();

        // Assert
        assert_eq!(first.sequence() + 1, second.sequence());
        assert_eq!(&first.bytes()[..2], &[0xFF, 0xD8]);
        assert_eq!(poller.state(), PollerState::Idle);
        assert!(poller.stats().frames_delivered >= 2);
    }

    #[test]
    #[serial]
    fn test_undersized_frames_are_dropped_by_guard() {
        // Arrange
        let (sdk, handle) = connected_mock();
        sdk.set_frame_len(512);
        let delivered = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&delivered);
        let mut poller = LiveViewPoller::new(sdk.clone());

        // Act
        poller
            .start(
                handle,
                move |_f: LiveFrame| -> Result<(), SinkError> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                fast_settings(),
            )
            .unwrap();
        while sdk.fetch_count() < 3 {
            thread::sleep(Duration::from_millis(5));
        }
        poller.stop();
        poller.wait_stopped(Duration::from_secs(2)).unwrap();

        // Assert
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert!(poller.stats().frames_dropped >= 3);
    }

    #[test]
    #[serial]
    fn test_panicking_sink_does_not_stop_acquisition() {
        // Arrange
        let (sdk, handle) = connected_mock();
        let sink = |_f: LiveFrame| -> Result<(), SinkError> { panic!("consumer bug") };
        let mut poller = LiveViewPoller::new(sdk.clone());

        // Act
        poller.start(handle, sink, fast_settings()).unwrap();
        while poller.stats().sink_failures < 3 {
            thread::sleep(Duration::from_millis(5));
        }
        poller.stop();
        poller.wait_stopped(Duration::from_secs(2)).unwrap();

        // Assert
        assert!(poller.stats().sink_failures >= 3);
        assert_eq!(poller.stats().frames_delivered, 0);
    }

    #[test]
    #[serial]
    fn test_not_ready_ticks_are_counted_and_keepalive_continues() {
        // Arrange
        let (sdk, handle) = connected_mock();
        sdk.set_not_ready_polls(u32::MAX);
        let settings = PollerSettings {
            keepalive: Duration::from_millis(20),
            not_ready_retries: 1,
            ..fast_settings()
        };
        let enables_before = sdk.enable_calls();
        let mut poller = LiveViewPoller::new(sdk.clone());

        // Act
        poller.start(handle, accept_all, settings).unwrap();
        thread::sleep(Duration::from_millis(150));
        poller.stop();
        poller.wait_stopped(Duration::from_secs(2)).unwrap();

        // Assert
        let stats = poller.stats();
        assert!(stats.not_ready_ticks > 0);
        assert_eq!(stats.frames_delivered, 0);
        assert!(sdk.enable_calls() > enables_before, "keep-alive must re-enable live view");
    }

    #[test]
    #[serial]
    fn test_slow_sink_does_not_delay_stop() {
        // Arrange: every callback blocks for 800 ms.
        let (sdk, handle) = connected_mock();
        let entered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&entered);
        let sink = move |_f: LiveFrame| -> Result<(), SinkError> {
            flag.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(800));
            Ok(())
        };
        let mut poller = LiveViewPoller::new(sdk.clone());
        poller.start(handle, sink, fast_settings()).unwrap();
        while !entered.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(2));
        }

        // Act
        let started = Instant::now();
        poller.stop();
        let took = started.elapsed();

        // Assert: the in-flight callback finishes, nothing follows it.
        assert!(took < Duration::from_millis(100), "stop() took {took:?}");
        assert_eq!(poller.state(), PollerState::Idle);
        poller.wait_stopped(Duration::from_secs(2)).unwrap();
        let fetches = sdk.fetch_count();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sdk.fetch_count(), fetches);
    }

    #[test]
    #[serial]
    fn test_stop_during_not_ready_backoff_starts_no_fetch() {
        // Arrange: the first size query reports "not ready", then a long backoff.
        let (sdk, handle) = connected_mock();
        sdk.set_not_ready_polls(1);
        let settings = PollerSettings {
            not_ready_backoff: Duration::from_millis(300),
            ..fast_settings()
        };
        let mut poller = LiveViewPoller::new(sdk.clone());
        poller.start(handle, accept_all, settings).unwrap();
        while sdk.query_count() == 0 {
            thread::sleep(Duration::from_millis(2));
        }

        // Act: stop while the worker sleeps in the backoff.
        thread::sleep(Duration::from_millis(100));
        poller.stop();
        let fetches_at_stop = sdk.fetch_count();
        poller.wait_stopped(Duration::from_secs(2)).unwrap();

        // Assert
        assert_eq!(fetches_at_stop, 0);
        assert_eq!(sdk.fetch_count(), 0, "a fetch started after stop() returned");
        assert_eq!(sdk.query_count(), 1);
    }

    #[test]
    #[serial]
    fn test_drop_stops_worker() {
        let (sdk, handle) = connected_mock();
        let (sink, mut rx) = frame_channel(1);
        {
            let mut poller = LiveViewPoller::new(sdk);
            poller.start(handle.clone(), sink, fast_settings()).unwrap();
            rx.blocking_recv().expect("frame while running");
        }

        // The worker exits and drops both its handle clone and its sink.
        let deadline = Instant::now() + Duration::from_secs(2);
        while Arc::strong_count(&handle) > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(Arc::strong_count(&handle), 1);
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let s: Box<dyn Any + Send> = Box::new("static");
        let o: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let n: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*s), "static");
        assert_eq!(panic_message(&*o), "owned");
        assert_eq!(panic_message(&*n), "<non-string panic>");
    }
}
