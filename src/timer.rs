//! Precise timing for bit-banged protocols
//!
//! OS sleep primitives overshoot by tens of microseconds or more, which is
//! too coarse for sensor handshakes and pull-resistor timing. `wait` sleeps
//! through a staircase of shrinking granularities and finishes with a busy
//! spin against the monotonic clock, so it never returns early and only
//! overshoots by scheduling noise.
//!
//! The spin phase is CPU-bound. Never call these from an async task; run them
//! on a dedicated thread (`spawn_every`, `once`, or `spawn_blocking`).

use log::debug;
use once_cell::sync::Lazy;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Coarse sleep steps, largest first. The calibrated floor is appended.
const STAIRCASE: [Duration; 4] = [
    Duration::from_millis(500),
    Duration::from_millis(50),
    Duration::from_millis(5),
    Duration::from_micros(500),
];

/// Waits at or below this return immediately
const EPSILON: Duration = Duration::from_nanos(1);

const CALIBRATION_SAMPLES: usize = 10;
const SAFETY_FACTOR: f64 = 1.5;
const MIN_RESOLUTION: Duration = Duration::from_micros(10);

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
static RESOLUTION: Lazy<Duration> = Lazy::new(calibrate);

fn calibrate() -> Duration {
    let mut worst = Duration::ZERO;
    for _ in 0..CALIBRATION_SAMPLES {
        let start = Instant::now();
        thread::sleep(Duration::from_nanos(1));
        worst = worst.max(start.elapsed());
    }
    let resolution = worst.mul_f64(SAFETY_FACTOR).max(MIN_RESOLUTION);
    debug!(
        "Calibrated sleep resolution {:?} (worst of {} samples: {:?})",
        resolution, CALIBRATION_SAMPLES, worst
    );
    resolution
}

/// Rounds up so float conversion can never shorten a wait
fn ms_to_duration(milliseconds: f64) -> Option<Duration> {
    let nanos = (milliseconds * 1_000_000.0).ceil();
    if nanos.is_finite() && nanos >= 0.0 && nanos < u64::MAX as f64 {
        Some(Duration::from_nanos(nanos as u64))
    } else {
        None
    }
}

/// Milliseconds elapsed on the monotonic clock since the first timer use
pub fn now() -> f64 {
    EPOCH.elapsed().as_secs_f64() * 1000.0
}

/// Smallest sleep the OS reliably honours, measured once per process
pub fn resolution() -> Duration {
    *RESOLUTION
}

/// Block for `milliseconds` (fractions allowed)
///
/// Negative, NaN and unrepresentable values return immediately.
pub fn wait(milliseconds: f64) {
    if let Some(duration) = ms_to_duration(milliseconds) {
        wait_duration(duration);
    }
}

/// Block for a number of microseconds
pub fn wait_micros(microseconds: f64) {
    wait(microseconds / 1000.0);
}

/// Block for a number of nanoseconds
pub fn wait_nanos(nanoseconds: f64) {
    wait(nanoseconds / 1_000_000.0);
}

/// Block for `duration`, never returning early
pub fn wait_duration(duration: Duration) {
    let start = Instant::now();
    if duration <= EPSILON {
        return;
    }
    let Some(deadline) = start.checked_add(duration) else {
        return;
    };

    let floor = resolution();
    for step in STAIRCASE.into_iter().chain(std::iter::once(floor)) {
        if step < floor {
            continue;
        }
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining <= step + floor {
                break;
            }
            thread::sleep(step);
        }
    }

    spin_until(deadline);
}

/// Busy-spin for `duration` without yielding to the scheduler
///
/// Used for hardware setup/hold times in the microsecond range where even a
/// single sleep would overshoot by orders of magnitude.
pub fn spin_for(duration: Duration) {
    let start = Instant::now();
    if let Some(deadline) = start.checked_add(duration) {
        spin_until(deadline);
    }
}

fn spin_until(deadline: Instant) {
    // Instant::now is an opaque clock read, so the loop cannot be elided.
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

/// Call `predicate` every `interval_ms` until it returns false
///
/// Each wait targets the next multiple of the interval measured from the
/// start, so slow callbacks do not accumulate drift. A callback that overruns
/// a whole period skips to the following boundary. Returns the number of
/// invocations.
pub fn every<F>(interval_ms: f64, mut predicate: F) -> u64
where
    F: FnMut() -> bool,
{
    let interval = ms_to_duration(interval_ms).unwrap_or(Duration::ZERO);
    let period = interval.as_nanos();
    let start = Instant::now();
    let mut calls = 0u64;

    loop {
        if period > 0 {
            let into_period = start.elapsed().as_nanos() % period;
            let remaining = (period - into_period) as u64;
            wait_duration(Duration::from_nanos(remaining));
        }
        calls += 1;
        if !predicate() {
            return calls;
        }
    }
}

/// Run `every` on a dedicated worker thread
pub fn spawn_every<F>(interval_ms: f64, predicate: F) -> JoinHandle<u64>
where
    F: FnMut() -> bool + Send + 'static,
{
    thread::spawn(move || every(interval_ms, predicate))
}

/// Run `action` once after `delay_ms` on a dedicated worker thread
pub fn once<T, F>(delay_ms: f64, action: F) -> JoinHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::spawn(move || {
        wait(delay_ms);
        action()
    })
}

/// Measures elapsed time from a resettable starting point
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Start a new stopwatch
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Restart from zero
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    pub fn elapsed_us(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1_000_000.0
    }

    pub fn elapsed_ns(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1_000_000_000.0
    }
}
