//! Scenario driver.
//!
//! Loads a JSON scenario file, runs the network for the configured
//! duration, and prints per-station application counters plus goodput.

use std::time::Duration;

use anyhow::bail;
use env_logger::Builder;
use log::{LevelFilter, info};

use csmaca_radio_simulator::Scenario;

fn main() -> anyhow::Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("csmaca_radio_simulator"), LevelFilter::Info)
        .parse_default_env()
        .init();

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: csmaca-radio-simulator <scenario.json>");
    };

    let scenario = Scenario::load(&path)?;
    if let Err(err) = scenario.validate() {
        bail!("invalid scenario: {err}");
    }

    let mut network = scenario.build().map_err(anyhow::Error::msg)?;
    let duration = Duration::from_millis(scenario.duration_ms);
    info!("running {} nodes for {:?} (seed {})", scenario.nodes.len(), duration, scenario.seed);
    network.run_for(duration);

    let seconds = duration.as_secs_f64();
    println!("{:>4} {:>20} {:>10} {:>10} {:>12}", "node", "address", "app tx", "app rx", "goodput");
    for index in 0..scenario.nodes.len() {
        let stats = network.stats(index);
        let mbps = stats.app_rx_bytes as f64 * 8.0 / seconds / 1e6;
        println!(
            "{index:>4} {:>20} {:>10} {:>10} {mbps:>9.3} Mb/s",
            network.address(index).to_string(),
            stats.app_tx_packets,
            stats.app_rx_packets,
        );
    }
    Ok(())
}
