//! Modulation preamble descriptor.

use std::time::Duration;

use crate::sim::secs;

/// Immutable modulation parameters attached to every transmission.
///
/// The rate is expressed in bytes per second (the default corresponds to a
/// 6 Mb/s nominal channel). Control frames always go out at the default
/// rate; only DATA frames use the MAC's configured rate.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Preamble {
    rate: u32,
    bandwidth: u32,
    duration: Duration,
}

impl Default for Preamble {
    fn default() -> Self {
        Preamble {
            rate: 6_000_000 / 8,
            bandwidth: 20_000_000,
            duration: Duration::from_micros(20),
        }
    }
}

impl Preamble {
    /// Default preamble with a different payload rate (bytes/s).
    pub fn with_rate(rate: u32) -> Self {
        Preamble {
            rate,
            ..Preamble::default()
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn bandwidth(&self) -> u32 {
        self.bandwidth
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time a frame of `size` bytes occupies the air, preamble included.
    pub fn air_time(&self, size: usize) -> Duration {
        secs(size as f64 / self.rate as f64) + self.duration
    }
}
