//! Propagation models and power unit conversions.
//!
//! Received power comes from a log-distance path loss model with optional
//! log-normal shadowing; propagation delay from a constant-speed model.
//! All link math happens in dB/dBm, converted to watts only at the PHY
//! boundary.

use std::time::Duration;

use serde::Deserialize;

use crate::sim::{RngStream, secs};

/// Propagation speed for the delay model (m/s).
const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Convert power from dBm to watts.
pub fn dbm_to_w(dbm: f64) -> f64 {
    let mw = 10.0_f64.powf(dbm / 10.0);
    mw / 1000.0
}

/// Convert power from watts to dBm.
pub fn w_to_dbm(w: f64) -> f64 {
    10.0 * (w * 1000.0).log10()
}

/// Convert a dB figure to a linear ratio.
pub fn db_to_ratio(db: f64) -> f64 {
    10.0_f64.powf(db / 10.0)
}

/// Log-distance path loss parameters.
///
/// ```text
/// PL(d) = PL(d0) + 10 * n * log10(d / d0) + X_sigma,   d0 = 1 m
/// ```
///
/// `X_sigma` is a zero-mean normal shadowing term in dB, sampled per link
/// per transmission; a sigma of 0 (the default) keeps the channel fully
/// deterministic.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PathLossParameters {
    /// Path loss exponent. 2.0 for free space, 2.7-3.5 urban.
    pub path_loss_exponent: f64,
    /// Path loss at the 1 m reference distance (dB).
    pub reference_loss_db: f64,
    /// Standard deviation of the shadowing term (dB). 0 disables it.
    pub shadowing_sigma_db: f64,
}

impl Default for PathLossParameters {
    fn default() -> Self {
        PathLossParameters {
            path_loss_exponent: 3.0,
            reference_loss_db: 46.6777,
            shadowing_sigma_db: 0.0,
        }
    }
}

/// Log-distance path loss with optional shadowing.
pub struct LogDistanceLoss {
    params: PathLossParameters,
    rng: RngStream,
}

impl LogDistanceLoss {
    pub fn new(params: PathLossParameters) -> Self {
        LogDistanceLoss {
            params,
            rng: RngStream::from_stream(0, 0),
        }
    }

    /// Bind the shadowing draws to one RNG stream. Returns the number of
    /// streams consumed. No draw happens while sigma is 0, so runs without
    /// shadowing are unaffected by this stream's position.
    pub fn assign_streams(&mut self, seed: u64, first_stream: u64) -> u64 {
        self.rng = RngStream::from_stream(seed, first_stream);
        1
    }

    /// Path loss in dB over `distance` meters.
    pub fn path_loss_db(&mut self, distance: f64) -> f64 {
        let p = &self.params;
        let loss = if distance < 1.0 {
            p.reference_loss_db
        } else {
            p.reference_loss_db + 10.0 * p.path_loss_exponent * distance.log10()
        };
        if p.shadowing_sigma_db > 0.0 {
            loss + self.rng.normal(p.shadowing_sigma_db)
        } else {
            loss
        }
    }

    /// Received power at `distance` meters for a given transmit power.
    pub fn rx_power_dbm(&mut self, tx_power_dbm: f64, distance: f64) -> f64 {
        tx_power_dbm - self.path_loss_db(distance)
    }
}

/// Constant-speed propagation delay: distance / c.
pub fn propagation_delay(distance: f64) -> Duration {
    secs(distance / SPEED_OF_LIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbm_watt_conversions() {
        assert!((dbm_to_w(0.0) - 1e-3).abs() < 1e-12);
        assert!((dbm_to_w(20.0) - 0.1).abs() < 1e-9);
        assert!((dbm_to_w(-96.0) - 2.511_886e-13).abs() < 1e-18);
        for dbm in [-120.0, -50.0, 0.0, 20.0] {
            assert!((w_to_dbm(dbm_to_w(dbm)) - dbm).abs() < 1e-9);
        }
        assert!((db_to_ratio(7.0) - 5.011_872).abs() < 1e-5);
    }

    #[test]
    fn path_loss_grows_with_distance() {
        let mut loss = LogDistanceLoss::new(PathLossParameters::default());
        let near = loss.path_loss_db(10.0);
        let far = loss.path_loss_db(100.0);
        // One decade of distance costs 10 * n = 30 dB.
        assert!((far - near - 30.0).abs() < 1e-9);
        // Inside the reference distance only the reference loss applies.
        assert!((loss.path_loss_db(0.5) - 46.6777).abs() < 1e-9);
    }

    #[test]
    fn two_node_link_budget() {
        // 47 m at exponent 3: PL = 46.6777 + 30*log10(47) = 96.84 dB, so a
        // 20 dBm transmitter is received at about -76.8 dBm.
        let mut loss = LogDistanceLoss::new(PathLossParameters::default());
        let rx = loss.rx_power_dbm(20.0, 47.0);
        assert!((rx + 76.84).abs() < 0.05);
    }

    #[test]
    fn shadowing_is_deterministic_per_stream() {
        let params = PathLossParameters {
            shadowing_sigma_db: 4.0,
            ..PathLossParameters::default()
        };
        let mut a = LogDistanceLoss::new(params.clone());
        let mut b = LogDistanceLoss::new(params);
        a.assign_streams(9, 5);
        b.assign_streams(9, 5);
        for _ in 0..8 {
            assert_eq!(a.path_loss_db(50.0).to_bits(), b.path_loss_db(50.0).to_bits());
        }
    }

    #[test]
    fn delay_is_distance_over_c() {
        let d = propagation_delay(299_792_458.0);
        assert_eq!(d, Duration::from_secs(1));
        assert_eq!(propagation_delay(0.0), Duration::ZERO);
        // 47 m is roughly 157 ns.
        let d = propagation_delay(47.0);
        assert!(d > Duration::from_nanos(156) && d < Duration::from_nanos(158));
    }
}
