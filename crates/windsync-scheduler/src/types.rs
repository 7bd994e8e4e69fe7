//! Scheduler types.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Values a scheduler can deliver.
pub trait TimedValue: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> TimedValue for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// Callback that receives each newly active value.
///
/// The returned future runs outside the scheduler's lock and may perform I/O.
/// At most one delivery per scheduler runs at a time.
pub type Delivery<V> =
    Arc<dyn Fn(V) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Sample tolerance used when the player reports positions precisely.
pub const DEFAULT_SAMPLE_TOLERANCE: Duration = Duration::from_millis(50);

/// Waits longer than this are only partially scheduled.
pub const LONG_WAIT_THRESHOLD: Duration = Duration::from_secs(60);

/// Share of a long wait that is actually slept before re-evaluating.
pub const LONG_WAIT_FRACTION: f64 = 0.8;

/// How far samples and the extrapolated clock may disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance {
    /// Samples within this distance of the extrapolated position are ignored.
    pub sample: Duration,
    /// A timer waking this close to its target treats the target as reached.
    pub wake: Duration,
    /// Backward corrections up to this size are treated as drift, not seeks.
    pub skip_window: Duration,
}

impl Tolerance {
    /// Size the tolerances from the player's position resolution.
    pub fn from_resolution(resolution: Duration) -> Self {
        let sample = resolution.max(DEFAULT_SAMPLE_TOLERANCE);
        Self {
            sample,
            wake: sample / 2,
            skip_window: sample * 10,
        }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::from_resolution(Duration::ZERO)
    }
}

/// Wall-clock wait between `from` and `to`.
///
/// Long waits are shortened so the timer wakes early and re-checks its
/// position, bounding how stale the extrapolated clock can get.
pub fn timer_interval(from: Duration, to: Duration) -> Duration {
    let interval = to.saturating_sub(from);
    if interval <= LONG_WAIT_THRESHOLD {
        return interval;
    }

    let adjusted = interval.mul_f64(LONG_WAIT_FRACTION);
    if adjusted < LONG_WAIT_THRESHOLD {
        interval
    } else {
        adjusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tolerance() {
        let tolerance = Tolerance::default();
        assert_eq!(tolerance.sample, Duration::from_millis(50));
        assert_eq!(tolerance.wake, Duration::from_millis(25));
        assert_eq!(tolerance.skip_window, Duration::from_millis(500));
    }

    #[test]
    fn test_tolerance_from_coarse_resolution() {
        let tolerance = Tolerance::from_resolution(Duration::from_millis(200));
        assert_eq!(tolerance.sample, Duration::from_millis(200));
        assert_eq!(tolerance.wake, Duration::from_millis(100));
        assert_eq!(tolerance.skip_window, Duration::from_secs(2));
    }

    #[test]
    fn test_timer_interval_short() {
        let from = Duration::from_secs(10);
        assert_eq!(
            timer_interval(from, Duration::from_secs(15)),
            Duration::from_secs(5)
        );
        assert_eq!(
            timer_interval(from, Duration::from_secs(70)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_timer_interval_backwards_is_zero() {
        assert_eq!(
            timer_interval(Duration::from_secs(5), Duration::from_secs(1)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_timer_interval_long() {
        assert_eq!(
            timer_interval(Duration::ZERO, Duration::from_secs(200)),
            Duration::from_secs(160)
        );
        // 80% of 70s would drop below the threshold, so the full wait is used.
        assert_eq!(
            timer_interval(Duration::ZERO, Duration::from_secs(70)),
            Duration::from_secs(70)
        );
    }
}
