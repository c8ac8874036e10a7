//! Per-component random number streams.
//!
//! Every station component (MAC, PHY, traffic source, channel shadowing)
//! draws from its own seeded stream so that runs are reproducible and no
//! component's consumption perturbs another's. Components expose an
//! `assign_streams(seed, first_stream)`-style hook that returns how many
//! stream indices they consumed, letting the network builder hand out
//! consecutive indices in node order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Mix a base seed and a stream index into an independent 64-bit seed.
///
/// SplitMix64 finalizer; consecutive stream indices map to uncorrelated
/// seeds even when the base seed is small.
fn mix(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// One independent stream of pseudo-random draws.
pub struct RngStream {
    rng: StdRng,
}

impl RngStream {
    pub fn from_stream(seed: u64, stream: u64) -> Self {
        RngStream {
            rng: StdRng::seed_from_u64(mix(seed, stream)),
        }
    }

    /// Uniform draw from [0, 1).
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen_range(0.0..1.0)
    }

    /// Uniform integer from the inclusive range [low, high].
    pub fn uniform_int(&mut self, low: u32, high: u32) -> u32 {
        self.rng.gen_range(low..=high)
    }

    /// Zero-mean normal draw with the given standard deviation.
    pub fn normal(&mut self, sigma: f64) -> f64 {
        let normal = Normal::new(0.0, sigma).expect("invalid normal sigma");
        normal.sample(&mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_stream_reproduces() {
        let mut a = RngStream::from_stream(7, 3);
        let mut b = RngStream::from_stream(7, 3);
        for _ in 0..32 {
            assert_eq!(a.uniform().to_bits(), b.uniform().to_bits());
        }
    }

    #[test]
    fn distinct_streams_diverge() {
        let mut a = RngStream::from_stream(7, 3);
        let mut b = RngStream::from_stream(7, 4);
        let same = (0..16).filter(|_| a.uniform() == b.uniform()).count();
        assert!(same < 16);
    }

    #[test]
    fn uniform_int_stays_in_range() {
        let mut r = RngStream::from_stream(1, 0);
        for _ in 0..200 {
            let v = r.uniform_int(0, 15);
            assert!(v <= 15);
        }
    }

    #[test]
    fn uniform_is_half_open() {
        let mut r = RngStream::from_stream(42, 0);
        for _ in 0..200 {
            let u = r.uniform();
            assert!((0.0..1.0).contains(&u));
        }
    }
}
