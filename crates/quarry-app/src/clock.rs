//! Frame delta and fixed-rate tick timing.
//!
//! Rendering runs at whatever rate the platform calls us; simulation ticks
//! at a constant rate. [`FrameClock`] turns wall-clock time between frames
//! into a clamped, 60 Hz-normalized delta for animation and prediction.
//! [`FixedTicker`] says whether a simulation tick is due.

use std::time::{Duration, Instant};

/// Nanoseconds in one 60 Hz frame; a delta of `1.0` means exactly this long.
const NANOS_PER_NORMALIZED_FRAME: f64 = 1_000_000_000.0 / 60.0;

/// Tracks the last frame timestamp and produces clamped deltas.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last_frame: Instant,
    min_delta: f64,
    max_delta: f64,
}

impl FrameClock {
    pub fn new(min_delta: f64, max_delta: f64) -> Self {
        Self::starting_at(Instant::now(), min_delta, max_delta)
    }

    pub fn starting_at(start: Instant, min_delta: f64, max_delta: f64) -> Self {
        Self {
            last_frame: start,
            min_delta,
            max_delta,
        }
    }

    /// Advance to `now` and return the clamped delta since the previous frame.
    ///
    /// A `now` earlier than the previous frame counts as zero elapsed time.
    pub fn advance(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_frame);
        self.last_frame = now;
        self.clamp(normalized(elapsed))
    }

    /// Restart timing from `now`, so the next delta excludes time spent
    /// before the loop began.
    pub fn reset(&mut self, now: Instant) {
        self.last_frame = now;
    }

    /// Clamp a raw normalized delta into `[min_delta, max_delta]`.
    pub fn clamp(&self, raw: f64) -> f64 {
        raw.clamp(self.min_delta, self.max_delta)
    }

    pub fn last_frame(&self) -> Instant {
        self.last_frame
    }
}

/// Elapsed time expressed in 60 Hz frames.
pub fn normalized(elapsed: Duration) -> f64 {
    elapsed.as_nanos() as f64 / NANOS_PER_NORMALIZED_FRAME
}

/// Fires at most once per poll when a tick interval has elapsed.
///
/// Ticks land on a fixed grid (`start + k * interval`). Polling late fires a
/// single tick and skips ahead to the next grid point after `now`: missed
/// ticks are dropped, not replayed. This keeps a slow frame from triggering a
/// burst of catch-up ticks.
#[derive(Debug, Clone)]
pub struct FixedTicker {
    interval: Duration,
    next_due: Instant,
    fired: u64,
    skipped: u64,
}

impl FixedTicker {
    /// A ticker at `rate_hz` ticks per second. A rate of zero is treated as 1 Hz.
    pub fn new(rate_hz: u32) -> Self {
        Self::starting_at(Instant::now(), rate_hz)
    }

    pub fn starting_at(start: Instant, rate_hz: u32) -> Self {
        let interval = Duration::from_secs(1) / rate_hz.max(1);
        Self {
            interval,
            next_due: start + interval,
            fired: 0,
            skipped: 0,
        }
    }

    /// Non-blocking check: returns `true` if a tick is due at `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        let late = now.duration_since(self.next_due);
        let missed = (late.as_nanos() / self.interval.as_nanos()) as u32;
        self.next_due += self.interval * (missed + 1);
        self.fired += 1;
        self.skipped += u64::from(missed);
        true
    }

    /// Move the grid so the next tick is one interval after `now`.
    pub fn reset(&mut self, now: Instant) {
        self.next_due = now + self.interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks reported by [`poll`](Self::poll) so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Ticks dropped because polling fell more than one interval behind.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
