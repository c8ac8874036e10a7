//! Shared broadcast medium.
//!
//! The channel keeps the list of attached transceivers (as arena indices)
//! and, for every transmission, computes a per-peer delivery: propagation
//! delay from the distance between the stations and received power from
//! the path loss model. The caller schedules each delivery as a future
//! reception carrying its own copy of the frame.

pub mod propagation;

pub use propagation::{LogDistanceLoss, PathLossParameters, propagation_delay};

use std::time::Duration;

use log::debug;
use serde::Deserialize;

/// Station position in meters.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

pub fn distance(a: Point, b: Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// One pending reception produced by a transmission.
#[derive(Debug, PartialEq)]
pub struct Delivery {
    pub node: usize,
    pub delay: Duration,
    pub rx_power_dbm: f64,
}

/// Broadcast channel connecting every attached PHY.
pub struct Channel {
    attached: Vec<usize>,
    loss: LogDistanceLoss,
}

impl Channel {
    pub fn new(params: PathLossParameters) -> Self {
        Channel {
            attached: Vec::new(),
            loss: LogDistanceLoss::new(params),
        }
    }

    /// Attach a transceiver. The list is append-only for the lifetime of a
    /// run; iteration order is attachment order.
    pub fn attach(&mut self, node: usize) {
        self.attached.push(node);
    }

    pub fn attached(&self) -> &[usize] {
        &self.attached
    }

    /// See [`LogDistanceLoss::assign_streams`].
    pub fn assign_streams(&mut self, seed: u64, first_stream: u64) -> u64 {
        self.loss.assign_streams(seed, first_stream)
    }

    /// Fan a transmission out to every attached peer except the sender.
    ///
    /// Positions are polled at send time, indexed like the arena.
    pub fn send(&mut self, sender: usize, tx_power_dbm: f64, positions: &[Point]) -> Vec<Delivery> {
        let sender_pos = positions[sender];
        let mut deliveries = Vec::with_capacity(self.attached.len().saturating_sub(1));
        for &node in &self.attached {
            if node == sender {
                continue;
            }
            let dist = distance(sender_pos, positions[node]);
            let delay = propagation_delay(dist);
            let rx_power_dbm = self.loss.rx_power_dbm(tx_power_dbm, dist);
            debug!("delivery to {node}: distance={dist:.1}m rx_power={rx_power_dbm:.1}dBm delay={delay:?}");
            deliveries.push(Delivery {
                node,
                delay,
                rx_power_dbm,
            });
        }
        deliveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_excludes_sender() {
        let mut channel = Channel::new(PathLossParameters::default());
        for i in 0..3 {
            channel.attach(i);
        }
        let positions = [
            Point { x: 0.0, y: 0.0 },
            Point { x: 0.0, y: 47.0 },
            Point { x: 0.0, y: 94.0 },
        ];
        let deliveries = channel.send(0, 20.0, &positions);
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].node, 1);
        assert_eq!(deliveries[1].node, 2);
        // The farther peer hears a weaker, later copy.
        assert!(deliveries[1].rx_power_dbm < deliveries[0].rx_power_dbm);
        assert!(deliveries[1].delay > deliveries[0].delay);
    }

    #[test]
    fn co_located_peers_share_delay_and_power() {
        let mut channel = Channel::new(PathLossParameters::default());
        for i in 0..3 {
            channel.attach(i);
        }
        let p = Point { x: 10.0, y: 10.0 };
        let positions = [Point { x: 0.0, y: 0.0 }, p, p];
        let deliveries = channel.send(0, 20.0, &positions);
        assert_eq!(deliveries[0].delay, deliveries[1].delay);
        assert_eq!(deliveries[0].rx_power_dbm, deliveries[1].rx_power_dbm);
    }

    #[test]
    fn distance_math() {
        let a = Point { x: 0.0, y: 0.0 };
        let b = Point { x: 3.0, y: 4.0 };
        assert_eq!(distance(a, b), 5.0);
    }
}
