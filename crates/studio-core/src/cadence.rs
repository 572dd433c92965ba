//! Drift-corrected poll cadence.
//!
//! The live-view poller wants to call the vendor SDK at a fixed rate (for
//! example 15 frames per second).  Each SDK call takes a variable amount of
//! time, so the poller cannot simply sleep `1/fps` after every call.
//!
//! # Why not `sleep(period)`? (for beginners)
//!
//! A loop that does "fetch, then sleep one period" actually runs at
//! `1 / (fetch_time + period)`.  The error compounds: after 1000 ticks with a
//! 5 ms fetch at 15 fps the loop is 5 seconds behind schedule.
//!
//! [`PollCadence`] instead anchors every wake-up to an *absolute* schedule:
//!
//! ```text
//! deadline[n+1] = deadline[n] + period
//! sleep         = max(0, deadline[n+1] - now)
//! ```
//!
//! A slow fetch shortens the next sleep rather than pushing every later tick
//! back, so the long-run rate stays at the nominal fps and the drift stays
//! bounded by a single period.
//!
//! # Missed slots
//!
//! When a call overruns by more than a whole period (a stalled USB transfer,
//! for example), the missed slots are skipped rather than replayed back to
//! back.  Replaying them would hammer the SDK with a burst of calls, which is
//! exactly what the rate limit exists to prevent.  The schedule keeps its
//! phase: the next deadline is still `start + k * period` for some `k`.

use std::time::{Duration, Instant};

use tracing::trace;

/// Lowest supported poll rate.
pub const MIN_FPS: u32 = 1;

/// Highest supported poll rate.
pub const MAX_FPS: u32 = 60;

/// An absolute, drift-corrected tick schedule.
///
/// # Examples
///
/// ```rust
/// use std::time::{Duration, Instant};
/// use studio_core::PollCadence;
///
/// let start = Instant::now();
/// let mut cadence = PollCadence::new(10, start);
///
/// // The fetch took 30 ms, so only 70 ms remain until the next slot.
/// let sleep = cadence.advance(start + Duration::from_millis(30));
/// assert_eq!(sleep, Duration::from_millis(70));
/// ```
#[derive(Debug, Clone)]
pub struct PollCadence {
    fps: u32,
    period: Duration,
    /// The deadline of the most recently scheduled tick.
    deadline: Instant,
    /// Number of whole slots skipped because a tick overran.
    skipped: u64,
}

impl PollCadence {
    /// Creates a cadence whose first tick is due at `start`.
    ///
    /// `fps` is clamped to [`MIN_FPS`]..=[`MAX_FPS`].
    pub fn new(fps: u32, start: Instant) -> Self {
        let fps = fps.clamp(MIN_FPS, MAX_FPS);
        Self {
            fps,
            period: Duration::from_secs(1) / fps,
            deadline: start,
            skipped: 0,
        }
    }

    /// Returns the effective (clamped) tick rate.
    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Returns the nominal interval between ticks.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns the deadline of the most recently scheduled tick.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns how many slots have been skipped after overruns.
    pub fn skipped_slots(&self) -> u64 {
        self.skipped
    }

    /// Schedules the next tick and returns how long to sleep from `now`.
    ///
    /// The next deadline is the previous deadline plus one period.  When
    /// `now` is already past that by a whole period or more, the missed
    /// slots are skipped instead of run back to back: the deadline jumps to
    /// the latest slot not after `now`, keeping the original phase.  A plain
    /// catch-up schedule would instead fire one zero-pause tick per missed
    /// slot.
    ///
    /// Returns [`Duration::ZERO`] when the next tick is already due.
    pub fn advance(&mut self, now: Instant) -> Duration {
        self.deadline += self.period;

        if now <= self.deadline {
            return self.deadline - now;
        }

        let late = now - self.deadline;
        if late >= self.period {
            // Whole periods lost to an overrun: jump forward in period-sized
            // steps so the schedule keeps its phase.
            let missed = late.as_nanos() / self.period.as_nanos().max(1);
            let missed = u32::try_from(missed).unwrap_or(u32::MAX);
            self.deadline += self.period * missed;
            self.skipped += u64::from(missed);
            trace!(missed, "poll cadence skipped overrun slots");
        }
        Duration::ZERO
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
