//! Scenario files: the experiment description loaded by the driver binary.
//!
//! A scenario is a JSON document holding the shared MAC/PHY/channel
//! parameters, the station positions, and the traffic each station offers.
//! Parsing is followed by a validation pass that rejects configurations
//! which would only fail (or silently misbehave) mid-run.

use std::fs;

use anyhow::Context;
use serde::Deserialize;

use crate::app::TrafficConfig;
use crate::channel::{PathLossParameters, Point};
use crate::frame::Mac48Address;
use crate::mac::MacConfig;
use crate::network::Network;
use crate::phy::PhyConfig;

fn default_seed() -> u64 {
    1
}

fn default_duration_ms() -> u64 {
    1000
}

/// Traffic block of one station.
#[derive(Deserialize, Clone, Debug)]
pub struct TrafficSpec {
    /// Index of the receiving station.
    #[serde(default)]
    pub destination: Option<usize>,
    /// Send to the broadcast address instead of a station.
    #[serde(default)]
    pub broadcast: bool,
    #[serde(flatten)]
    pub config: TrafficConfig,
}

/// One station of the scenario.
#[derive(Deserialize, Clone, Debug)]
pub struct NodeSpec {
    pub position: Point,
    #[serde(default)]
    pub traffic: Option<TrafficSpec>,
}

/// A complete experiment description.
#[derive(Deserialize, Clone, Debug)]
pub struct Scenario {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    #[serde(default)]
    pub mac: MacConfig,
    #[serde(default)]
    pub phy: PhyConfig,
    #[serde(default)]
    pub channel: PathLossParameters,
    pub nodes: Vec<NodeSpec>,
}

/// Stations beyond this are almost certainly a unit mix-up in the file.
const MAX_NODES: usize = 10_000;

impl Scenario {
    /// Read and parse a scenario file.
    pub fn load(path: &str) -> anyhow::Result<Scenario> {
        let data = fs::read_to_string(path).with_context(|| format!("failed to read scenario file: {path}"))?;
        let scenario: Scenario = serde_json::from_str(&data).context("invalid scenario JSON")?;
        Ok(scenario)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("scenario must contain at least one node".to_string());
        }
        if self.nodes.len() > MAX_NODES {
            return Err(format!("node count {} exceeds maximum of {MAX_NODES}", self.nodes.len()));
        }
        if self.duration_ms == 0 {
            return Err("duration_ms must be positive".to_string());
        }
        if self.mac.rate == 0 {
            return Err("mac.rate must be positive".to_string());
        }
        if self.mac.cw_min > self.mac.cw_max {
            return Err(format!(
                "cw_min {} exceeds cw_max {}",
                self.mac.cw_min, self.mac.cw_max
            ));
        }
        if self.mac.queue_capacity == 0 {
            return Err("mac.queue_capacity must be positive".to_string());
        }
        if self.channel.path_loss_exponent <= 0.0 {
            return Err("channel.path_loss_exponent must be positive".to_string());
        }
        if self.channel.shadowing_sigma_db < 0.0 {
            return Err("channel.shadowing_sigma_db must be non-negative".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if !node.position.x.is_finite() || !node.position.y.is_finite() {
                return Err(format!("node {index} has a non-finite position"));
            }
            if let Some(traffic) = &node.traffic {
                match (traffic.destination, traffic.broadcast) {
                    (Some(_), true) => {
                        return Err(format!("node {index} traffic sets both destination and broadcast"));
                    }
                    (None, false) => {
                        return Err(format!("node {index} traffic needs a destination or broadcast"));
                    }
                    (Some(dest), false) => {
                        if dest >= self.nodes.len() {
                            return Err(format!("node {index} traffic destination {dest} does not exist"));
                        }
                        if dest == index {
                            return Err(format!("node {index} traffic targets itself"));
                        }
                    }
                    (None, true) => {}
                }
                if traffic.config.packet_size == 0 {
                    return Err(format!("node {index} traffic packet_size must be positive"));
                }
            }
        }
        Ok(())
    }

    /// Build the runnable network. Stations are created first so traffic
    /// destinations can be resolved to allocated addresses.
    pub fn build(&self) -> Result<Network, String> {
        self.validate()?;
        let mut network = Network::with_channel(self.seed, self.channel.clone());
        for node in &self.nodes {
            network.add_node(node.position, self.mac.clone(), self.phy.clone());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(traffic) = &node.traffic {
                let destination = match traffic.destination {
                    Some(dest) => network.address(dest),
                    None => Mac48Address::BROADCAST,
                };
                network.install_traffic(index, traffic.config.clone(), destination);
            }
        }
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn minimal(nodes: &str) -> String {
        format!(r#"{{ "seed": 4, "duration_ms": 50, "nodes": [{nodes}] }}"#)
    }

    #[test]
    fn parses_defaults_and_builds() {
        let json = minimal(
            r#"{ "position": { "x": 0, "y": 0 },
                 "traffic": { "destination": 1, "packet_size": 500, "interval_us": 2000, "count": 5 } },
               { "position": { "x": 0, "y": 47 } }"#,
        );
        let scenario: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(scenario.seed, 4);
        assert_eq!(scenario.mac.rate, 750_000);
        assert_eq!(scenario.phy.tx_power_dbm, 20.0);
        scenario.validate().unwrap();

        let mut network = scenario.build().unwrap();
        network.run_for(Duration::from_millis(scenario.duration_ms));
        assert_eq!(network.stats(0).app_tx_packets, 5);
        assert_eq!(network.stats(1).app_rx_packets, 5);
    }

    #[test]
    fn rejects_bad_destinations() {
        let json = minimal(
            r#"{ "position": { "x": 0, "y": 0 },
                 "traffic": { "destination": 7, "packet_size": 100 } },
               { "position": { "x": 0, "y": 10 } }"#,
        );
        let scenario: Scenario = serde_json::from_str(&json).unwrap();
        let err = scenario.validate().unwrap_err();
        assert!(err.contains("does not exist"));

        let json = minimal(
            r#"{ "position": { "x": 0, "y": 0 },
                 "traffic": { "destination": 0, "packet_size": 100 } }"#,
        );
        let scenario: Scenario = serde_json::from_str(&json).unwrap();
        assert!(scenario.validate().unwrap_err().contains("targets itself"));
    }

    #[test]
    fn rejects_ambiguous_traffic() {
        let json = minimal(
            r#"{ "position": { "x": 0, "y": 0 },
                 "traffic": { "packet_size": 100 } },
               { "position": { "x": 0, "y": 10 } }"#,
        );
        let scenario: Scenario = serde_json::from_str(&json).unwrap();
        assert!(scenario.validate().unwrap_err().contains("needs a destination"));

        let json = minimal(
            r#"{ "position": { "x": 0, "y": 0 },
                 "traffic": { "destination": 1, "broadcast": true, "packet_size": 100 } },
               { "position": { "x": 0, "y": 10 } }"#,
        );
        let scenario: Scenario = serde_json::from_str(&json).unwrap();
        assert!(scenario.validate().unwrap_err().contains("both destination and broadcast"));
    }

    #[test]
    fn rejects_empty_and_degenerate_configs() {
        let scenario: Scenario = serde_json::from_str(r#"{ "nodes": [] }"#).unwrap();
        assert!(scenario.validate().is_err());

        let mut scenario: Scenario =
            serde_json::from_str(&minimal(r#"{ "position": { "x": 0, "y": 0 } }"#)).unwrap();
        scenario.mac.cw_min = 1024;
        assert!(scenario.validate().unwrap_err().contains("cw_min"));
    }
}
