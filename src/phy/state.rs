//! PHY state tracking and the indications that drive the MAC.
//!
//! The state is never stored directly: it is derived on demand from the
//! scheduled endpoints (end of TX, end of CCA-busy) and the reception flag,
//! so there is a single source of truth and no transition can be missed.
//! Every state entry emits an indication that the per-node glue hands to
//! the MAC, mirroring a registered-listener setup with one listener.

use std::time::Duration;

use log::debug;

use crate::frame::Frame;
use crate::sim::Instant;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PhyState {
    Idle,
    CcaBusy,
    Rx,
    Tx,
}

/// What the PHY tells its MAC. Start indications fire when a state is
/// entered and carry the scheduled duration; end indications carry the
/// frame and the reception verdict.
#[derive(Debug)]
pub enum PhyIndication {
    CcaBusyStart(Duration),
    TxStart(Duration),
    RxStart(Duration),
    RxEndOk(Frame),
    RxEndError(Frame),
}

/// Scheduled state endpoints for one transceiver.
pub struct PhyStateTracker {
    start_tx: Instant,
    start_rx: Instant,
    start_cca_busy: Instant,
    end_tx: Instant,
    end_rx: Instant,
    end_cca_busy: Instant,
    rxing: bool,
}

impl PhyStateTracker {
    pub fn new() -> Self {
        PhyStateTracker {
            start_tx: Instant::ZERO,
            start_rx: Instant::ZERO,
            start_cca_busy: Instant::ZERO,
            end_tx: Instant::ZERO,
            end_rx: Instant::ZERO,
            end_cca_busy: Instant::ZERO,
            rxing: false,
        }
    }

    /// Derive the state at `now`: TX wins while a transmission is
    /// scheduled, then an in-progress reception, then residual CCA energy.
    pub fn state(&self, now: Instant) -> PhyState {
        if self.end_tx > now {
            PhyState::Tx
        } else if self.rxing {
            PhyState::Rx
        } else if self.end_cca_busy > now {
            PhyState::CcaBusy
        } else {
            PhyState::Idle
        }
    }

    pub fn is_rx(&self, now: Instant) -> bool {
        self.state(now) == PhyState::Rx
    }

    /// Extend the CCA-busy window to at least `now + duration`.
    pub fn switch_maybe_cca_busy(
        &mut self,
        now: Instant,
        duration: Duration,
        indications: &mut Vec<PhyIndication>,
    ) {
        debug!("cca busy until {}", now + duration);
        indications.push(PhyIndication::CcaBusyStart(duration));
        if self.state(now) != PhyState::CcaBusy {
            self.start_cca_busy = now;
        }
        self.end_cca_busy = self.end_cca_busy.max(now + duration);
    }

    /// Enter TX, aborting any reception in progress. The caller is
    /// responsible for cancelling the end-of-reception event and telling
    /// the ledger the reception ended.
    pub fn switch_to_tx(
        &mut self,
        now: Instant,
        duration: Duration,
        indications: &mut Vec<PhyIndication>,
    ) {
        indications.push(PhyIndication::TxStart(duration));
        if self.state(now) == PhyState::Rx {
            self.rxing = false;
            self.end_rx = now;
        }
        self.start_tx = now;
        self.end_tx = now + duration;
    }

    /// Enter RX for the duration of the arriving frame.
    ///
    /// Panics unless the transceiver is IDLE or CCA_BUSY; the reception
    /// gate must never lock onto a signal mid-TX or mid-RX.
    pub fn switch_to_rx(
        &mut self,
        now: Instant,
        duration: Duration,
        indications: &mut Vec<PhyIndication>,
    ) {
        let state = self.state(now);
        assert!(
            state == PhyState::Idle || state == PhyState::CcaBusy,
            "illegal transition to RX from {state:?}"
        );
        assert!(!self.rxing, "reception already in progress");
        indications.push(PhyIndication::RxStart(duration));
        self.rxing = true;
        self.start_rx = now;
        self.end_rx = now + duration;
    }

    pub fn end_receive_ok(&mut self, frame: Frame, indications: &mut Vec<PhyIndication>) {
        indications.push(PhyIndication::RxEndOk(frame));
        self.rxing = false;
    }

    pub fn end_receive_error(&mut self, frame: Frame, indications: &mut Vec<PhyIndication>) {
        indications.push(PhyIndication::RxEndError(frame));
        self.rxing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn us(n: u64) -> Instant {
        Instant::from_micros(n)
    }

    #[test]
    fn state_derivation_follows_decision_tree() {
        let mut t = PhyStateTracker::new();
        assert_eq!(t.state(Instant::ZERO), PhyState::Idle);

        t.end_tx = us(100);
        t.rxing = true;
        t.end_cca_busy = us(200);
        // TX dominates while scheduled.
        assert_eq!(t.state(us(50)), PhyState::Tx);
        // After end_tx, an in-progress reception wins.
        assert_eq!(t.state(us(100)), PhyState::Rx);
        t.rxing = false;
        // Then residual channel energy.
        assert_eq!(t.state(us(150)), PhyState::CcaBusy);
        assert_eq!(t.state(us(200)), PhyState::Idle);
    }

    #[test]
    fn cca_busy_extends_never_shrinks() {
        let mut t = PhyStateTracker::new();
        let mut ind = Vec::new();
        t.switch_maybe_cca_busy(us(0), Duration::from_micros(100), &mut ind);
        assert_eq!(t.start_cca_busy, us(0));
        t.switch_maybe_cca_busy(us(10), Duration::from_micros(20), &mut ind);
        // Already busy: the start is kept and the shorter window is ignored.
        assert_eq!(t.start_cca_busy, us(0));
        assert_eq!(t.end_cca_busy, us(100));
        t.switch_maybe_cca_busy(us(50), Duration::from_micros(100), &mut ind);
        assert_eq!(t.end_cca_busy, us(150));
        assert_eq!(ind.len(), 3);
    }

    #[test]
    fn tx_aborts_reception() {
        let mut t = PhyStateTracker::new();
        let mut ind = Vec::new();
        t.switch_to_rx(us(0), Duration::from_micros(100), &mut ind);
        assert_eq!(t.start_rx, us(0));
        assert_eq!(t.state(us(10)), PhyState::Rx);
        t.switch_to_tx(us(10), Duration::from_micros(50), &mut ind);
        assert!(!t.rxing);
        assert_eq!(t.start_tx, us(10));
        // The aborted reception is truncated at the switch instant.
        assert_eq!(t.end_rx, us(10));
        assert_eq!(t.state(us(20)), PhyState::Tx);
        assert_eq!(t.state(us(60)), PhyState::Idle);
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    fn rx_from_tx_is_fatal() {
        let mut t = PhyStateTracker::new();
        let mut ind = Vec::new();
        t.switch_to_tx(us(0), Duration::from_micros(100), &mut ind);
        t.switch_to_rx(us(10), Duration::from_micros(10), &mut ind);
    }

    #[test]
    fn rx_end_clears_flag_and_reports() {
        use crate::frame::{FrameType, MacHeader};
        let mut t = PhyStateTracker::new();
        let mut ind = Vec::new();
        t.switch_to_rx(us(0), Duration::from_micros(10), &mut ind);
        t.end_receive_ok(Frame::control(MacHeader::new(FrameType::Ack)), &mut ind);
        assert!(!t.rxing);
        assert!(matches!(ind.last(), Some(PhyIndication::RxEndOk(_))));
    }
}
