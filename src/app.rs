//! Constant-size traffic source.
//!
//! Offers fixed-size payloads to the net device on a configurable cadence.
//! With `randomize` on, inter-send gaps are exponentially distributed with
//! the configured interval as mean (next = interval * -ln u), which is the
//! classic memoryless offered load; with it off the source is strictly
//! periodic, which deterministic scenario tests rely on.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::frame::Mac48Address;
use crate::sim::{RngStream, secs};

fn default_packet_size() -> usize {
    1500
}

fn default_interval_us() -> u64 {
    100
}

fn default_protocol() -> u16 {
    0x0800
}

/// Traffic source parameters.
#[derive(Deserialize, Clone, Debug)]
pub struct TrafficConfig {
    /// Payload size in bytes.
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
    /// Mean (or exact, when not randomized) gap between sends.
    #[serde(default = "default_interval_us")]
    pub interval_us: u64,
    /// Exponentially randomize the gaps.
    #[serde(default)]
    pub randomize: bool,
    /// Offset of the first send from the start of the run.
    #[serde(default)]
    pub start_us: u64,
    /// Stop after this many frames; unlimited when absent.
    #[serde(default)]
    pub count: Option<u64>,
    /// Upper-layer protocol number for the LLC/SNAP header.
    #[serde(default = "default_protocol")]
    pub protocol: u16,
}

/// One firing of the source: the payload to offer and when to fire next.
pub struct AppSend {
    pub payload: Arc<[u8]>,
    pub destination: Mac48Address,
    pub protocol: u16,
    /// Gap to the next send; `None` when the source is exhausted.
    pub next_in: Option<Duration>,
}

/// Periodic sender bound to one destination.
pub struct TrafficGenerator {
    config: TrafficConfig,
    destination: Mac48Address,
    rng: RngStream,
    sent: u64,
}

impl TrafficGenerator {
    pub fn new(config: TrafficConfig, destination: Mac48Address) -> Self {
        TrafficGenerator {
            config,
            destination,
            rng: RngStream::from_stream(0, 0),
            sent: 0,
        }
    }

    /// Bind jitter draws to one RNG stream. Returns the number of streams
    /// consumed. Without randomization no draw ever happens.
    pub fn assign_streams(&mut self, seed: u64, first_stream: u64) -> u64 {
        self.rng = RngStream::from_stream(seed, first_stream);
        1
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_micros(self.config.start_us)
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn next_interval(&mut self) -> Duration {
        let interval = Duration::from_micros(self.config.interval_us);
        if self.config.randomize {
            let mut u = self.rng.uniform();
            if u <= 0.0 {
                u = f64::MIN_POSITIVE;
            }
            secs(interval.as_secs_f64() * -u.ln())
        } else {
            interval
        }
    }

    /// Produce the payload for this firing, or `None` if the count limit
    /// was already reached.
    pub fn fire(&mut self) -> Option<AppSend> {
        if self.config.count.is_some_and(|limit| self.sent >= limit) {
            return None;
        }
        self.sent += 1;
        let exhausted = self.config.count.is_some_and(|limit| self.sent >= limit);
        Some(AppSend {
            payload: vec![0u8; self.config.packet_size].into(),
            destination: self.destination,
            protocol: self.config.protocol,
            next_in: if exhausted { None } else { Some(self.next_interval()) },
        })
    }
}
