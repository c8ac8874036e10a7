//! Discrete-event simulator for an IEEE-802.11-style CSMA/CA link layer.
//!
//! The crate models a set of stations sharing one broadcast channel. Each
//! station stacks a traffic source, a net device (LLC framing), a CSMA/CA
//! MAC (carrier sense, binary exponential backoff, RTS/CTS/DATA/ACK, NAV,
//! retries) and a PHY whose reception model is a per-segment Shannon
//! capacity test over an interference ledger. Propagation delay and
//! log-distance path loss connect the stations.
//!
//! Everything runs on a single virtual clock: components suspend by
//! scheduling future events, and runs with the same seed, topology and
//! traffic reproduce bit-identical traces.
//!
//! Typical use goes through [`scenario::Scenario`] (load a JSON experiment
//! description, build, run) or directly through [`network::Network`] for
//! programmatic setups.

pub mod app;
pub mod channel;
pub mod device;
pub mod frame;
pub mod mac;
pub mod network;
pub mod phy;
pub mod scenario;
pub mod sim;

pub use network::{Network, NodeStats, TraceEntry};
pub use scenario::Scenario;
