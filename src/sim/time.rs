//! Virtual simulation clock.
//!
//! Time is a nanosecond count since the start of the run, stored as `u64`.
//! Integer timestamps keep event ordering exact and runs reproducible;
//! floating point only appears transiently when air times are derived from
//! byte counts and rates.

use core::time::Duration;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A point on the simulated timeline.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    nanos: u64,
}

impl Instant {
    pub const ZERO: Instant = Instant { nanos: 0 };

    pub fn from_nanos(nanos: u64) -> Self {
        Instant { nanos }
    }

    pub fn from_micros(micros: u64) -> Self {
        Instant { nanos: micros * 1_000 }
    }

    pub fn from_millis(millis: u64) -> Self {
        Instant {
            nanos: millis * 1_000_000,
        }
    }

    pub fn as_nanos(&self) -> u64 {
        self.nanos
    }

    pub fn as_micros(&self) -> u64 {
        self.nanos / 1_000
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 / 1e9
    }

    /// Duration since an earlier instant, or `None` if `earlier` is in fact later.
    pub fn checked_duration_since(&self, earlier: Instant) -> Option<Duration> {
        self.nanos.checked_sub(earlier.nanos).map(Duration::from_nanos)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant {
            nanos: self.nanos + rhs.as_nanos() as u64,
        }
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.nanos += rhs.as_nanos() as u64;
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        match self.checked_duration_since(rhs) {
            Some(d) => d,
            None => panic!("negative duration: {} - {}", self, rhs),
        }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}ns", self.nanos)
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}ns", self.nanos)
    }
}

/// Duration from a (possibly fractional) second count.
///
/// Panics on negative input; a negative duration anywhere in the timing
/// arithmetic is a modeling bug.
pub fn secs(seconds: f64) -> Duration {
    assert!(seconds >= 0.0, "negative duration: {seconds}s");
    Duration::from_secs_f64(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_conversions() {
        let t = Instant::from_micros(34);
        assert_eq!(t.as_nanos(), 34_000);
        assert_eq!((t + Duration::from_micros(9)).as_micros(), 43);
        assert_eq!(t + Duration::ZERO, t);
        assert_eq!(Instant::from_micros(50) - t, Duration::from_micros(16));
    }

    #[test]
    #[should_panic(expected = "negative duration")]
    fn negative_difference_panics() {
        let _ = Instant::ZERO - Instant::from_micros(1);
    }

    #[test]
    fn secs_from_rate_math() {
        // 20 bytes at 750 kB/s is 26.666... us of air time.
        let d = secs(20.0 / 750_000.0);
        assert_eq!(d.as_micros(), 26);
        assert!(d > Duration::from_micros(26) && d < Duration::from_micros(27));
    }
}
