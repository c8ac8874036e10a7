//! Physical layer: transceiver, interference ledger, and state tracking.
//!
//! The transceiver binds one station to the broadcast channel. Outbound
//! frames switch it to TX and are handed to the channel with the configured
//! power; inbound signals always feed the interference ledger (so they
//! interfere even when undecodable) and are gated against the current state
//! and the energy-detection threshold before a reception is attempted. At
//! end of reception a Shannon-capacity test decides the frame's fate.

pub mod interference;
pub mod preamble;
pub mod state;

pub use interference::{InterferenceLedger, PhyEvent, SnrPer};
pub use preamble::Preamble;
pub use state::{PhyIndication, PhyState, PhyStateTracker};

use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::channel::propagation::{db_to_ratio, dbm_to_w};
use crate::frame::Frame;
use crate::sim::{Instant, RngStream};

/// Transceiver parameters.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PhyConfig {
    /// Transmit power at the antenna port (dBm).
    pub tx_power_dbm: f64,
    pub tx_gain_db: f64,
    pub rx_gain_db: f64,
    /// Receiver noise figure (dB), folded into the thermal noise floor.
    pub rx_noise_figure_db: f64,
    /// Minimum received power for the PHY to lock onto a signal (dBm).
    pub energy_detection_threshold_dbm: f64,
    /// Ambient energy level above which the channel reports busy (dBm).
    pub cca_mode1_threshold_dbm: f64,
}

impl Default for PhyConfig {
    fn default() -> Self {
        PhyConfig {
            tx_power_dbm: 20.0,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            rx_noise_figure_db: 7.0,
            energy_detection_threshold_dbm: -96.0,
            cca_mode1_threshold_dbm: -99.0,
        }
    }
}

/// Result of handing a frame to the transceiver for transmission.
pub struct TxStart {
    /// Air time of the frame, preamble included.
    pub duration: Duration,
    /// Power to hand to the channel (tx power plus tx gain, dBm).
    pub power_dbm: f64,
    pub indications: Vec<PhyIndication>,
}

/// End-of-reception callback data, scheduled by the caller.
pub struct ScheduledRx {
    pub at: Instant,
    pub generation: u64,
    pub frame: Frame,
    pub event: PhyEvent,
}

/// Result of a signal starting to arrive.
pub struct RxAttempt {
    pub indications: Vec<PhyIndication>,
    /// Present only when the PHY locked onto the signal.
    pub scheduled: Option<ScheduledRx>,
}

/// One station's transceiver.
pub struct Phy {
    tx_power_dbm: f64,
    tx_gain_db: f64,
    rx_gain_db: f64,
    ed_threshold_w: f64,
    cca_mode1_threshold_w: f64,
    interference: InterferenceLedger,
    state: PhyStateTracker,
    rng: RngStream,
    end_rx_generation: u64,
    end_rx_armed: bool,
}

impl Phy {
    pub fn new(config: &PhyConfig) -> Self {
        Phy {
            tx_power_dbm: config.tx_power_dbm,
            tx_gain_db: config.tx_gain_db,
            rx_gain_db: config.rx_gain_db,
            ed_threshold_w: dbm_to_w(config.energy_detection_threshold_dbm),
            cca_mode1_threshold_w: dbm_to_w(config.cca_mode1_threshold_dbm),
            interference: InterferenceLedger::new(db_to_ratio(config.rx_noise_figure_db)),
            state: PhyStateTracker::new(),
            rng: RngStream::from_stream(0, 0),
            end_rx_generation: 0,
            end_rx_armed: false,
        }
    }

    /// Bind this PHY's reception draws to one RNG stream. Returns the
    /// number of streams consumed.
    pub fn assign_streams(&mut self, seed: u64, first_stream: u64) -> u64 {
        self.rng = RngStream::from_stream(seed, first_stream);
        1
    }

    pub fn state(&self, now: Instant) -> PhyState {
        self.state.state(now)
    }

    /// Begin transmitting `frame`. Any reception in progress is abandoned:
    /// its end-of-reception event is invalidated and the ledger is told the
    /// reception ended, but the half-received signal keeps interfering.
    pub fn start_send(&mut self, frame: &Frame, preamble: Preamble, now: Instant) -> TxStart {
        if self.state.is_rx(now) {
            self.end_rx_armed = false;
            self.end_rx_generation += 1;
            self.interference.notify_rx_end();
        }
        let duration = preamble.air_time(frame.size());
        let mut indications = Vec::new();
        self.state.switch_to_tx(now, duration, &mut indications);
        TxStart {
            duration,
            power_dbm: self.tx_power_dbm + self.tx_gain_db,
            indications,
        }
    }

    /// A signal starts arriving with the given received power.
    ///
    /// The signal is always entered into the interference ledger. Reception
    /// is only attempted from IDLE or CCA_BUSY and only above the
    /// energy-detection threshold; otherwise the arrival at most marks the
    /// channel busy for as long as ambient energy stays over the CCA
    /// threshold.
    pub fn start_receive(
        &mut self,
        frame: Frame,
        preamble: Preamble,
        rx_power_dbm: f64,
        now: Instant,
    ) -> RxAttempt {
        let rx_power_w = dbm_to_w(rx_power_dbm + self.rx_gain_db);
        let duration = preamble.air_time(frame.size());
        let event = self
            .interference
            .add(frame.size(), duration, rx_power_w, preamble, now);

        let mut indications = Vec::new();
        let mut scheduled = None;
        match self.state.state(now) {
            PhyState::Rx | PhyState::Tx => {
                debug!("drop rx attempt, transceiver busy ({:?})", self.state.state(now));
                self.maybe_cca_busy(now, &mut indications);
            }
            PhyState::Idle | PhyState::CcaBusy => {
                if rx_power_w > self.ed_threshold_w {
                    self.interference.notify_rx_start();
                    self.state.switch_to_rx(now, duration, &mut indications);
                    self.end_rx_generation += 1;
                    self.end_rx_armed = true;
                    scheduled = Some(ScheduledRx {
                        at: now + duration,
                        generation: self.end_rx_generation,
                        frame,
                        event,
                    });
                } else {
                    debug!("drop rx attempt, rx power too small: {rx_power_dbm} dBm");
                    self.maybe_cca_busy(now, &mut indications);
                }
            }
        }
        RxAttempt { indications, scheduled }
    }

    /// True if a pending end-of-reception event with this generation is
    /// still the live one (i.e. was not cancelled by a TX).
    pub fn end_rx_is_current(&self, generation: u64) -> bool {
        self.end_rx_armed && generation == self.end_rx_generation
    }

    /// Finish the reception scheduled by [`Phy::start_receive`]: compute
    /// SNR/PER over the interference the event saw and report success or
    /// error to the MAC.
    pub fn end_receive(
        &mut self,
        frame: Frame,
        event: &PhyEvent,
        now: Instant,
    ) -> (SnrPer, Vec<PhyIndication>) {
        debug_assert_eq!(event.end(), now);
        self.end_rx_armed = false;
        let snr_per = self.interference.calculate_snr_per(event);
        self.interference.notify_rx_end();
        debug!(
            "end rx: rate={} snr={} per={} size={}",
            event.preamble().rate(),
            snr_per.snr,
            snr_per.per,
            frame.size()
        );
        let mut indications = Vec::new();
        if self.rng.uniform() > snr_per.per {
            self.state.end_receive_ok(frame, &mut indications);
        } else {
            self.state.end_receive_error(frame, &mut indications);
        }
        (snr_per, indications)
    }

    fn maybe_cca_busy(&mut self, now: Instant, indications: &mut Vec<PhyIndication>) {
        let delay = self.interference.energy_duration(self.cca_mode1_threshold_w, now);
        if !delay.is_zero() {
            self.state.switch_maybe_cca_busy(now, delay, indications);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameType, MacHeader};

    fn data_frame(size: usize) -> Frame {
        let hdr = MacHeader::new(FrameType::Data);
        Frame::data(hdr, vec![0u8; size].into())
    }

    fn phy() -> Phy {
        let mut p = Phy::new(&PhyConfig::default());
        p.assign_streams(1, 0);
        p
    }

    #[test]
    fn strong_signal_locks_reception() {
        let mut p = phy();
        let frame = data_frame(100);
        let attempt = p.start_receive(frame, Preamble::default(), -70.0, Instant::ZERO);
        let scheduled = attempt.scheduled.expect("reception should start");
        assert_eq!(p.state(Instant::ZERO), PhyState::Rx);
        assert_eq!(scheduled.at, Instant::ZERO + Preamble::default().air_time(120));
        assert!(p.end_rx_is_current(scheduled.generation));
        assert!(matches!(attempt.indications[0], PhyIndication::RxStart(_)));

        let (snr_per, indications) = p.end_receive(scheduled.frame, &scheduled.event, scheduled.at);
        assert_eq!(snr_per.per, 0.0);
        assert!(matches!(indications[0], PhyIndication::RxEndOk(_)));
        assert_eq!(p.state(scheduled.at), PhyState::Idle);
    }

    #[test]
    fn weak_signal_only_marks_cca_busy() {
        let mut p = phy();
        // Below the -96 dBm energy-detection threshold but above the
        // -99 dBm CCA threshold.
        let attempt = p.start_receive(data_frame(100), Preamble::default(), -97.0, Instant::ZERO);
        assert!(attempt.scheduled.is_none());
        assert!(matches!(attempt.indications[0], PhyIndication::CcaBusyStart(_)));
        assert_eq!(p.state(Instant::ZERO), PhyState::CcaBusy);
    }

    #[test]
    fn inaudible_signal_leaves_idle() {
        let mut p = phy();
        let attempt = p.start_receive(data_frame(100), Preamble::default(), -120.0, Instant::ZERO);
        assert!(attempt.scheduled.is_none());
        assert!(attempt.indications.is_empty());
        assert_eq!(p.state(Instant::ZERO), PhyState::Idle);
    }

    #[test]
    fn tx_cancels_pending_reception() {
        let mut p = phy();
        let attempt = p.start_receive(data_frame(1000), Preamble::default(), -70.0, Instant::ZERO);
        let scheduled = attempt.scheduled.unwrap();

        let frame = data_frame(50);
        let tx = p.start_send(&frame, Preamble::default(), Instant::from_micros(5));
        assert!(!p.end_rx_is_current(scheduled.generation));
        assert_eq!(p.state(Instant::from_micros(5)), PhyState::Tx);
        assert_eq!(tx.power_dbm, 20.0);
        assert!(matches!(tx.indications[0], PhyIndication::TxStart(_)));
    }

    #[test]
    fn arrival_during_tx_is_not_received() {
        let mut p = phy();
        let frame = data_frame(500);
        p.start_send(&frame, Preamble::default(), Instant::ZERO);
        let attempt = p.start_receive(data_frame(100), Preamble::default(), -60.0, Instant::from_micros(10));
        assert!(attempt.scheduled.is_none());
        // The arrival still raises channel energy past the CCA threshold.
        assert!(matches!(attempt.indications[0], PhyIndication::CcaBusyStart(_)));
    }
}
