//! CSMA/CA access state machine.
//!
//! The MAC drains its transmit queue one frame at a time. Each send cycle:
//!
//! 1) wait until the backoff grant instant (latest of rx/tx/busy/NAV ends
//!    and ack/cts timeout ends, plus DIFS),
//! 2) count down a random number of backoff slots,
//! 3) transmit: directly for group destinations, via RTS/CTS for large
//!    unicast payloads, or DATA-with-ACK for small ones,
//! 4) on CTS/ACK timeout, grow the contention window and retry until the
//!    retry limit drops the frame.
//!
//! The MAC never calls into its PHY or device. Every externally visible
//! step is returned as a [`MacAction`] that the per-node dispatch applies:
//! timers to arm, frames to put on the air, payloads to hand upward. This
//! keeps the mutual MAC/PHY/channel references out of the type graph while
//! preserving the exact ordering of the reference state machine.
//!
//! Cancellable timers (backoff grant, CTS timeout, ACK timeout) carry a
//! generation counter; a firing with a stale generation is a no-op, which
//! is how "cancel" is expressed in a scheduler without removal.

pub mod queue;

pub use queue::{MacQueue, QueueItem};

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::frame::{FCS_LENGTH, Frame, FrameType, Mac48Address, MacHeader};
use crate::phy::Preamble;
use crate::sim::{Instant, RngStream, secs};

/// MAC parameters.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MacConfig {
    /// Payload transmission rate in bytes per second.
    pub rate: u32,
    /// Transmit queue capacity in frames.
    pub queue_capacity: usize,
    /// Unicast payloads at or above this size go through RTS/CTS.
    pub rts_threshold: usize,
    /// Retry limits for the RTS and DATA stages.
    pub resend_rts_max: u16,
    pub resend_data_max: u16,
    /// Contention window bounds (slots).
    pub cw_min: u32,
    pub cw_max: u32,
    /// Interframe spacings and slot length, microseconds.
    pub sifs_us: u64,
    pub difs_us: u64,
    pub slot_time_us: u64,
}

impl Default for MacConfig {
    fn default() -> Self {
        MacConfig {
            rate: 6_000_000 / 8,
            queue_capacity: 400,
            rts_threshold: 1000,
            resend_rts_max: 7,
            resend_data_max: 7,
            cw_min: 15,
            cw_max: 1023,
            sifs_us: 16,
            difs_us: 34,
            slot_time_us: 9,
        }
    }
}

/// Identifies a scheduled MAC callback. SIFS-deferred responses carry the
/// data the response frame needs; they are one-shot and never cancelled.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerKind {
    BackoffGrantStart,
    BackoffTimeout,
    AckTimeout,
    CtsTimeout,
    SendCtsAfterRts {
        source: Mac48Address,
        duration: Duration,
    },
    SendDataAfterCts,
    SendAckAfterData {
        source: Mac48Address,
    },
}

/// Externally visible step requested by the MAC, applied in order by the
/// per-node dispatch.
#[derive(Debug)]
pub enum MacAction {
    /// Schedule a MAC timer. `generation` 0 marks a one-shot that is never
    /// checked for staleness.
    Arm {
        kind: TimerKind,
        delay: Duration,
        generation: u64,
    },
    /// Hand a frame to the PHY for transmission.
    Transmit { frame: Frame, preamble: Preamble },
    /// Deliver a received payload to the net device.
    Deliver {
        payload: Arc<[u8]>,
        to: Mac48Address,
        from: Mac48Address,
    },
    /// Reset the send cycle and pull the next queued frame, after the
    /// preceding transmit has been applied (so the grant calculation sees
    /// the transmission that was just started).
    RestartSendCycle,
}

/// Generation-counted cancellable timer.
#[derive(Default)]
struct Timer {
    generation: u64,
    armed: bool,
}

impl Timer {
    fn arm(&mut self) -> u64 {
        self.generation += 1;
        self.armed = true;
        self.generation
    }

    fn cancel(&mut self) {
        self.generation += 1;
        self.armed = false;
    }

    /// Accept a firing only if it is the live one.
    fn try_fire(&mut self, generation: u64) -> bool {
        if self.armed && generation == self.generation {
            self.armed = false;
            true
        } else {
            false
        }
    }

    fn is_armed(&self) -> bool {
        self.armed
    }
}

/// One station's CSMA/CA MAC.
pub struct Mac {
    address: Mac48Address,
    config: MacConfig,
    queue: MacQueue,
    rng: RngStream,
    current: Option<QueueItem>,

    sifs: Duration,
    difs: Duration,
    slot_time: Duration,
    max_propagation_delay: Duration,
    rts_send_and_sifs: Duration,
    cts_send_and_sifs: Duration,
    ack_send_and_sifs: Duration,

    resend_rts_n: u16,
    resend_data_n: u16,
    cw: u32,
    backoff_slots: u32,
    backoff_start: Instant,

    last_rx_start: Instant,
    last_rx_duration: Duration,
    last_busy_start: Instant,
    last_busy_duration: Duration,
    last_tx_start: Instant,
    last_tx_duration: Duration,
    last_nav_start: Instant,
    last_nav_duration: Duration,
    last_ack_timeout_end: Instant,
    last_cts_timeout_end: Instant,
    rxing: bool,

    backoff_grant_timer: Timer,
    backoff_timer: Timer,
    ack_timer: Timer,
    cts_timer: Timer,
}

impl Mac {
    pub fn new(address: Mac48Address, config: MacConfig) -> Self {
        let sifs = Duration::from_micros(config.sifs_us);
        let difs = Duration::from_micros(config.difs_us);
        let slot_time = Duration::from_micros(config.slot_time_us);

        // Control frame timings are fixed by the default preamble rate.
        let preamble = Preamble::default();
        let rts_air = preamble.air_time(MacHeader::new(FrameType::Rts).size() + FCS_LENGTH);
        let cts_air = preamble.air_time(MacHeader::new(FrameType::Cts).size() + FCS_LENGTH);
        let ack_air = preamble.air_time(MacHeader::new(FrameType::Ack).size() + FCS_LENGTH);
        let max_propagation_delay = secs(1000.0 / 300_000_000.0);

        let queue = MacQueue::new(config.queue_capacity);
        let cw = config.cw_min;
        Mac {
            address,
            queue,
            rng: RngStream::from_stream(0, 0),
            current: None,
            sifs,
            difs,
            slot_time,
            max_propagation_delay,
            rts_send_and_sifs: rts_air + max_propagation_delay + sifs,
            cts_send_and_sifs: cts_air + max_propagation_delay + sifs,
            ack_send_and_sifs: ack_air + max_propagation_delay + sifs,
            resend_rts_n: 0,
            resend_data_n: 0,
            cw,
            backoff_slots: 0,
            backoff_start: Instant::ZERO,
            last_rx_start: Instant::ZERO,
            last_rx_duration: Duration::ZERO,
            last_busy_start: Instant::ZERO,
            last_busy_duration: Duration::ZERO,
            last_tx_start: Instant::ZERO,
            last_tx_duration: Duration::ZERO,
            last_nav_start: Instant::ZERO,
            last_nav_duration: Duration::ZERO,
            last_ack_timeout_end: Instant::ZERO,
            last_cts_timeout_end: Instant::ZERO,
            rxing: false,
            backoff_grant_timer: Timer::default(),
            backoff_timer: Timer::default(),
            ack_timer: Timer::default(),
            cts_timer: Timer::default(),
            config,
        }
    }

    /// Bind backoff draws to one RNG stream. Returns the number of streams
    /// consumed.
    pub fn assign_streams(&mut self, seed: u64, first_stream: u64) -> u64 {
        self.rng = RngStream::from_stream(seed, first_stream);
        1
    }

    pub fn address(&self) -> Mac48Address {
        self.address
    }

    pub fn cw(&self) -> u32 {
        self.cw
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// End of the most recent NAV reservation, for inspection.
    pub fn nav_end(&self) -> Instant {
        self.last_nav_start + self.last_nav_duration
    }

    /// Accept a send request from the net device and start a send cycle if
    /// the MAC is idle.
    pub fn enqueue(&mut self, payload: Arc<[u8]>, header: MacHeader, now: Instant) -> Vec<MacAction> {
        self.queue.enqueue(payload, header, now);
        self.start_backoff_if_needed(now)
    }

    /// Pull the next frame into the send cycle if nothing is in flight and
    /// no grant wait is already pending.
    pub fn start_backoff_if_needed(&mut self, now: Instant) -> Vec<MacAction> {
        let mut actions = Vec::new();
        if self.current.is_none() && !self.queue.is_empty() && !self.backoff_grant_timer.is_armed() {
            self.current = self.queue.dequeue();
            self.backoff_grant_start(now, &mut actions);
        }
        actions
    }

    /// Reset retry state and release the current frame.
    pub fn init_send(&mut self) {
        self.resend_rts_n = 0;
        self.resend_data_n = 0;
        self.current = None;
        self.cw = self.config.cw_min;
    }

    /// Earliest instant backoff slot countdown may begin: every busy
    /// condition must have ended a full DIFS ago.
    pub fn backoff_grant_start_time(&self) -> Instant {
        let rx = self.last_rx_start + self.last_rx_duration + self.difs;
        let tx = self.last_tx_start + self.last_tx_duration + self.difs;
        let busy = self.last_busy_start + self.last_busy_duration + self.difs;
        let nav = self.last_nav_start + self.last_nav_duration + self.difs;
        let ack_timeout = self.last_ack_timeout_end + self.difs;
        let cts_timeout = self.last_cts_timeout_end + self.difs;
        rx.max(tx).max(busy).max(nav).max(ack_timeout).max(cts_timeout)
    }

    /// Earliest instant an already-armed transmission may fire: the same
    /// maximum without the DIFS term.
    pub fn send_grant_start_time(&self) -> Instant {
        let rx = self.last_rx_start + self.last_rx_duration;
        let tx = self.last_tx_start + self.last_tx_duration;
        let busy = self.last_busy_start + self.last_busy_duration;
        let nav = self.last_nav_start + self.last_nav_duration;
        rx.max(tx)
            .max(busy)
            .max(nav)
            .max(self.last_ack_timeout_end)
            .max(self.last_cts_timeout_end)
    }

    fn backoff_grant_start(&mut self, now: Instant, actions: &mut Vec<MacAction>) {
        let grant = self.backoff_grant_start_time();
        if grant <= now {
            self.start_backoff(now, actions);
        } else {
            let generation = self.backoff_grant_timer.arm();
            actions.push(MacAction::Arm {
                kind: TimerKind::BackoffGrantStart,
                delay: grant - now,
                generation,
            });
        }
    }

    fn start_backoff(&mut self, now: Instant, actions: &mut Vec<MacAction>) {
        self.backoff_slots = self.rng.uniform_int(0, self.cw);
        self.backoff_start = now;
        let duration = self.slot_time * self.backoff_slots;
        debug!(
            "backoff: slots={} start={} end={}",
            self.backoff_slots,
            self.backoff_start,
            self.backoff_start + duration
        );
        let generation = self.backoff_timer.arm();
        actions.push(MacAction::Arm {
            kind: TimerKind::BackoffTimeout,
            delay: duration,
            generation,
        });
    }

    /// Entry point for every scheduled MAC callback.
    pub fn handle_timer(&mut self, kind: TimerKind, generation: u64, now: Instant) -> Vec<MacAction> {
        let mut actions = Vec::new();
        match kind {
            TimerKind::BackoffGrantStart => {
                if self.backoff_grant_timer.try_fire(generation) {
                    self.backoff_grant_start(now, &mut actions);
                }
            }
            TimerKind::BackoffTimeout => {
                if self.backoff_timer.try_fire(generation) {
                    self.backoff_timeout(now, &mut actions);
                }
            }
            TimerKind::AckTimeout => {
                if self.ack_timer.try_fire(generation) {
                    self.ack_timeout(now, &mut actions);
                }
            }
            TimerKind::CtsTimeout => {
                if self.cts_timer.try_fire(generation) {
                    self.cts_timeout(now, &mut actions);
                }
            }
            TimerKind::SendCtsAfterRts { source, duration } => {
                self.send_cts_after_rts(source, duration, &mut actions);
            }
            TimerKind::SendDataAfterCts => {
                self.send_data_after_cts(now, &mut actions);
            }
            TimerKind::SendAckAfterData { source } => {
                self.send_ack_after_data(source, &mut actions);
            }
        }
        actions
    }

    fn backoff_timeout(&mut self, now: Instant, actions: &mut Vec<MacAction>) {
        if self.send_grant_start_time() <= now {
            let current = self.current.as_ref().expect("backoff completed with no pending frame");
            if !current.header.addr1().is_group() {
                if current.payload.len() >= self.config.rts_threshold {
                    self.send_rts(now, actions);
                } else {
                    // Small unicast skips the RTS/CTS exchange entirely and
                    // behaves as if the CTS had just been received.
                    self.send_data_after_cts(now, actions);
                }
            } else {
                self.send_data_no_ack(actions);
            }
        } else {
            let grant = self.backoff_grant_start_time();
            let generation = self.backoff_grant_timer.arm();
            actions.push(MacAction::Arm {
                kind: TimerKind::BackoffGrantStart,
                delay: grant - now,
                generation,
            });
        }
    }

    /// Air time of the current DATA frame plus the worst-case propagation
    /// delay, at the given preamble's rate.
    fn data_send_time(&self, preamble: &Preamble) -> Duration {
        let current = self.current.as_ref().expect("no pending frame");
        let size = current.payload.len() + current.header.size() + FCS_LENGTH;
        preamble.air_time(size) + self.max_propagation_delay
    }

    fn send_rts(&mut self, now: Instant, actions: &mut Vec<MacAction>) {
        debug_assert!(!self.cts_timer.is_armed());
        let preamble = Preamble::default();

        let timer_delay = self.rts_send_and_sifs + self.cts_send_and_sifs;
        let generation = self.cts_timer.arm();
        self.last_cts_timeout_end = now + timer_delay;
        debug!("cts timeout armed for {}", self.last_cts_timeout_end);
        actions.push(MacAction::Arm {
            kind: TimerKind::CtsTimeout,
            delay: timer_delay,
            generation,
        });

        // The reservation covers CTS, the DATA frame at the reference rate,
        // and the closing ACK.
        let tx_duration = self.data_send_time(&preamble);
        let current = self.current.as_ref().expect("no pending frame");
        let mut rts = MacHeader::new(FrameType::Rts);
        rts.set_addr1(current.header.addr1());
        rts.set_addr2(self.address);
        rts.set_duration(self.cts_send_and_sifs + tx_duration + self.ack_send_and_sifs);
        actions.push(MacAction::Transmit {
            frame: Frame::control(rts),
            preamble,
        });
    }

    fn send_cts_after_rts(&mut self, source: Mac48Address, duration: Duration, actions: &mut Vec<MacAction>) {
        let preamble = Preamble::default();
        let mut cts = MacHeader::new(FrameType::Cts);
        cts.set_addr1(source);
        let remaining = duration
            .checked_sub(self.cts_send_and_sifs)
            .expect("RTS reservation shorter than the CTS budget");
        cts.set_duration(remaining);
        actions.push(MacAction::Transmit {
            frame: Frame::control(cts),
            preamble,
        });
    }

    fn send_data_no_ack(&mut self, actions: &mut Vec<MacAction>) {
        let preamble = Preamble::with_rate(self.config.rate);
        let current = self.current.as_mut().expect("no pending frame");
        current.header.set_duration(Duration::ZERO);
        let frame = Frame::data(current.header, current.payload.clone());
        actions.push(MacAction::Transmit { frame, preamble });
        actions.push(MacAction::RestartSendCycle);
    }

    fn send_data_after_cts(&mut self, now: Instant, actions: &mut Vec<MacAction>) {
        debug_assert!(!self.ack_timer.is_armed());
        let preamble = Preamble::with_rate(self.config.rate);

        let tx_duration = self.data_send_time(&preamble);
        let timer_delay = tx_duration + self.ack_send_and_sifs;
        let generation = self.ack_timer.arm();
        self.last_ack_timeout_end = now + timer_delay;
        debug!("ack timeout armed for {}", self.last_ack_timeout_end);
        actions.push(MacAction::Arm {
            kind: TimerKind::AckTimeout,
            delay: timer_delay,
            generation,
        });

        let current = self.current.as_mut().expect("no pending frame");
        current.header.set_duration(self.ack_send_and_sifs);
        let frame = Frame::data(current.header, current.payload.clone());
        actions.push(MacAction::Transmit { frame, preamble });
    }

    fn send_ack_after_data(&mut self, source: Mac48Address, actions: &mut Vec<MacAction>) {
        let preamble = Preamble::default();
        let mut ack = MacHeader::new(FrameType::Ack);
        ack.set_addr1(source);
        actions.push(MacAction::Transmit {
            frame: Frame::control(ack),
            preamble,
        });
    }

    fn set_nav(&mut self, duration: Duration, now: Instant) {
        self.last_nav_start = Instant::ZERO;
        if self.last_nav_start + self.last_nav_duration < now + duration {
            self.last_nav_duration = duration;
            self.last_nav_start = now;
        }
    }

    /// A frame survived the PHY reception test.
    pub fn receive_ok(&mut self, frame: &Frame, now: Instant) -> Vec<MacAction> {
        self.rxing = false;
        let hdr = frame.header;
        debug!("rx ok: {:?} to {} dur {:?}", hdr.frame_type(), hdr.addr1(), hdr.duration());

        // Overheard traffic updates the virtual carrier sense.
        if hdr.addr1() != self.address {
            self.set_nav(hdr.duration(), now);
        }

        let mut actions = Vec::new();
        match hdr.frame_type() {
            FrameType::Data => {
                if hdr.addr1() == self.address && !hdr.addr1().is_group() {
                    actions.push(MacAction::Arm {
                        kind: TimerKind::SendAckAfterData { source: hdr.addr2() },
                        delay: self.sifs,
                        generation: 0,
                    });
                }
                actions.push(MacAction::Deliver {
                    payload: frame.payload.clone(),
                    to: hdr.addr1(),
                    from: hdr.addr2(),
                });
            }
            FrameType::Ack => {
                if hdr.addr1() == self.address {
                    self.ack_timer.cancel();
                    self.last_ack_timeout_end = now;
                    self.init_send();
                    let follow_up = self.start_backoff_if_needed(now);
                    actions.extend(follow_up);
                }
            }
            FrameType::Rts => {
                if hdr.addr1() == self.address {
                    actions.push(MacAction::Arm {
                        kind: TimerKind::SendCtsAfterRts {
                            source: hdr.addr2(),
                            duration: hdr.duration(),
                        },
                        delay: self.sifs,
                        generation: 0,
                    });
                }
            }
            FrameType::Cts => {
                if hdr.addr1() == self.address {
                    self.cts_timer.cancel();
                    self.last_cts_timeout_end = now;
                    actions.push(MacAction::Arm {
                        kind: TimerKind::SendDataAfterCts,
                        delay: self.sifs,
                        generation: 0,
                    });
                }
            }
        }
        actions
    }

    /// A frame failed the reception test. Only the reception flag changes;
    /// a corrupt frame must not influence NAV or the send cycle.
    pub fn receive_error(&mut self, frame: &Frame) {
        self.rxing = false;
        debug!("rx error: {:?}", frame.header.frame_type());
    }

    pub fn notify_cca_busy_start(&mut self, now: Instant, duration: Duration) {
        self.last_busy_start = now;
        self.last_busy_duration = duration;
    }

    pub fn notify_tx_start(&mut self, now: Instant, duration: Duration) {
        if self.rxing {
            // A transmission may only pre-empt a reception that began
            // within the last SIFS (a response fired while a new arrival
            // was still in its preamble).
            debug_assert!(now - self.last_rx_start <= self.sifs);
            self.last_rx_duration = now - self.last_rx_start;
            self.rxing = false;
        }
        self.last_tx_start = now;
        self.last_tx_duration = duration;
    }

    pub fn notify_rx_start(&mut self, now: Instant, duration: Duration) {
        self.last_rx_start = now;
        self.last_rx_duration = duration;
        self.rxing = true;
    }

    fn cts_timeout(&mut self, now: Instant, actions: &mut Vec<MacAction>) {
        debug!("cts timeout, rts retries so far: {}", self.resend_rts_n);
        if self.resend_rts_n < self.config.resend_rts_max {
            self.resend_rts_n += 1;
            self.update_cw();
            self.backoff_grant_start(now, actions);
        } else {
            debug!("rts retry limit reached, dropping frame");
            self.init_send();
            let follow_up = self.start_backoff_if_needed(now);
            actions.extend(follow_up);
        }
    }

    fn ack_timeout(&mut self, now: Instant, actions: &mut Vec<MacAction>) {
        debug!("ack timeout, data retries so far: {}", self.resend_data_n);
        if self.resend_data_n < self.config.resend_data_max {
            self.resend_data_n += 1;
            self.update_cw();
            self.backoff_grant_start(now, actions);
        } else {
            debug!("data retry limit reached, dropping frame");
            self.init_send();
            let follow_up = self.start_backoff_if_needed(now);
            actions.extend(follow_up);
        }
    }

    fn update_cw(&mut self) {
        self.cw = (2 * (self.cw + 1) - 1).min(self.config.cw_max);
    }
}
