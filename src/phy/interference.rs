//! Interference ledger and the Shannon-capacity reception test.
//!
//! The ledger records every arriving signal as a pair of power change
//! points (+P at the start, -P at the end), kept sorted by time. From this
//! it answers three questions:
//!
//! 1) What SNR did a given event see against the interference that
//!    overlapped it?
//! 2) Did any constant-interference segment of the event carry more
//!    information than Shannon capacity allows (-> the frame is lost)?
//! 3) How long until ambient energy falls below a CCA threshold?
//!
//! While no reception is in progress, change points that have already
//! passed are collapsed into a rolling baseline power so the ledger stays
//! bounded through idle periods. During a reception the history is kept so
//! the packet-error walk can replay the exact interference profile.

use std::time::Duration;

use log::debug;

use super::preamble::Preamble;
use crate::sim::Instant;

/// Thermal noise density coefficient (J/K).
const BOLTZMANN: f64 = 1.3803e-23;

/// One arriving signal, as seen by a receiver.
#[derive(Clone, Debug)]
pub struct PhyEvent {
    size: usize,
    start: Instant,
    end: Instant,
    rx_power_w: f64,
    preamble: Preamble,
}

impl PhyEvent {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn rx_power_w(&self) -> f64 {
        self.rx_power_w
    }

    pub fn preamble(&self) -> Preamble {
        self.preamble
    }
}

/// SNR at the start of an event plus the 0/1 packet error verdict.
#[derive(Clone, Copy, Debug)]
pub struct SnrPer {
    pub snr: f64,
    pub per: f64,
}

#[derive(Clone, Copy, Debug)]
struct PowerChange {
    at: Instant,
    delta_w: f64,
}

/// Time-ordered record of received power changes at one transceiver.
pub struct InterferenceLedger {
    /// Receiver noise figure as a linear ratio.
    noise_figure: f64,
    changes: Vec<PowerChange>,
    /// Power already accumulated from change points collapsed out of the
    /// list; baseline for every replay.
    first_power_w: f64,
    rxing: bool,
}

impl InterferenceLedger {
    pub fn new(noise_figure: f64) -> Self {
        InterferenceLedger {
            noise_figure,
            changes: Vec::new(),
            first_power_w: 0.0,
            rxing: false,
        }
    }

    pub fn noise_figure(&self) -> f64 {
        self.noise_figure
    }

    /// Record a signal arriving now; it contributes as interference whether
    /// or not the receiver ever locks onto it.
    pub fn add(
        &mut self,
        size: usize,
        duration: Duration,
        rx_power_w: f64,
        preamble: Preamble,
        now: Instant,
    ) -> PhyEvent {
        let event = PhyEvent {
            size,
            start: now,
            end: now + duration,
            rx_power_w,
            preamble,
        };
        self.append(&event, now);
        event
    }

    pub fn notify_rx_start(&mut self) {
        self.rxing = true;
    }

    pub fn notify_rx_end(&mut self) {
        self.rxing = false;
    }

    /// First index whose change point lies strictly after `moment`.
    fn position(&self, moment: Instant) -> usize {
        self.changes.partition_point(|c| c.at <= moment)
    }

    fn insert_sorted(&mut self, change: PowerChange) {
        let pos = self.position(change.at);
        self.changes.insert(pos, change);
    }

    fn append(&mut self, event: &PhyEvent, now: Instant) {
        if !self.rxing {
            // Idle: fold everything up to now into the baseline so the list
            // only ever holds pending change points.
            let pos = self.position(now);
            for change in &self.changes[..pos] {
                self.first_power_w += change.delta_w;
            }
            self.changes.drain(..pos);
            self.changes.insert(
                0,
                PowerChange {
                    at: event.start,
                    delta_w: event.rx_power_w,
                },
            );
        } else {
            self.insert_sorted(PowerChange {
                at: event.start,
                delta_w: event.rx_power_w,
            });
        }
        self.insert_sorted(PowerChange {
            at: event.end,
            delta_w: -event.rx_power_w,
        });
    }

    /// Signal-to-noise ratio against thermal noise plus interference.
    ///
    /// Noise floor = F * k * T * B at T = 290 K, with B taken from the
    /// preamble the segment is being decoded with.
    fn snr(&self, signal_w: f64, noise_interference_w: f64, preamble: &Preamble) -> f64 {
        let thermal = BOLTZMANN * 290.0 * preamble.bandwidth() as f64;
        let noise_floor = self.noise_figure * thermal;
        signal_w / (noise_floor + noise_interference_w)
    }

    /// Interference baseline for `event` plus the change points overlapping
    /// its lifetime, bracketed for the per-segment walk.
    fn noise_interference(&self, event: &PhyEvent) -> (f64, Vec<PowerChange>) {
        debug_assert!(self.rxing);
        let noise_interference_w = self.first_power_w;
        let mut overlapping = Vec::new();
        for change in &self.changes[1..] {
            if change.at == event.end && change.delta_w == -event.rx_power_w {
                break;
            }
            overlapping.push(*change);
        }
        overlapping.insert(
            0,
            PowerChange {
                at: event.start,
                delta_w: noise_interference_w,
            },
        );
        overlapping.push(PowerChange {
            at: event.end,
            delta_w: 0.0,
        });
        (noise_interference_w, overlapping)
    }

    /// Deterministic chunk test: the bytes the nominal rate pushes through
    /// a constant-SNR segment must not exceed what Shannon capacity admits.
    fn chunk_within_capacity(&self, snir: f64, duration: Duration, preamble: &Preamble) -> bool {
        if duration.is_zero() {
            return true;
        }
        let seconds = duration.as_secs_f64();
        let nominal = (preamble.rate() as f64 * seconds) as u64;
        let mut shannon = (preamble.bandwidth() as f64 * (1.0 + snir).log2()) as u64;
        shannon /= 8;
        shannon = (shannon as f64 * seconds) as u64;
        debug!("chunk capacity={shannon} nominal={nominal} snir={snir} duration={duration:?}");
        shannon >= nominal
    }

    /// Walk the event split into a preamble segment (decoded with the
    /// default-preamble rate reference) and a payload segment (the event's
    /// own preamble), each subdivided at every interference change point.
    /// Any segment over capacity loses the whole frame.
    fn per(&self, event: &PhyEvent, overlapping: &[PowerChange]) -> f64 {
        let header_preamble = Preamble::default();
        let power_w = event.rx_power_w;

        let mut previous = overlapping[0].at;
        let payload_start = overlapping[0].at + event.preamble.duration();
        let mut noise_interference_w = overlapping[0].delta_w;

        for change in &overlapping[1..] {
            let current = change.at;
            if payload_start > previous && payload_start < current {
                let snr = self.snr(power_w, noise_interference_w, &header_preamble);
                if !self.chunk_within_capacity(snr, payload_start - previous, &header_preamble) {
                    return 1.0;
                }
                let snr = self.snr(power_w, noise_interference_w, &event.preamble);
                if !self.chunk_within_capacity(snr, current - payload_start, &event.preamble) {
                    return 1.0;
                }
            } else if payload_start >= current {
                let snr = self.snr(power_w, noise_interference_w, &header_preamble);
                if !self.chunk_within_capacity(snr, current - previous, &header_preamble) {
                    return 1.0;
                }
            } else {
                let snr = self.snr(power_w, noise_interference_w, &event.preamble);
                if !self.chunk_within_capacity(snr, current - previous, &event.preamble) {
                    return 1.0;
                }
            }
            noise_interference_w += change.delta_w;
            previous = change.at;
        }

        0.0
    }

    /// SNR at the start of the event and the deterministic 0/1 PER.
    pub fn calculate_snr_per(&self, event: &PhyEvent) -> SnrPer {
        let (noise_interference_w, overlapping) = self.noise_interference(event);
        let snr = self.snr(event.rx_power_w, noise_interference_w, &event.preamble);
        let per = self.per(event, &overlapping);
        SnrPer { snr, per }
    }

    /// How long from `now` until ambient energy drops below `threshold_w`.
    /// Zero if it is already below.
    pub fn energy_duration(&self, threshold_w: f64, now: Instant) -> Duration {
        let mut noise_interference_w = self.first_power_w;
        let mut end = now;
        for change in &self.changes {
            noise_interference_w += change.delta_w;
            end = change.at;
            if end < now {
                continue;
            }
            if noise_interference_w < threshold_w {
                break;
            }
        }
        if end > now { end - now } else { Duration::ZERO }
    }

    #[cfg(test)]
    fn total_delta_w(&self) -> f64 {
        self.first_power_w + self.changes.iter().map(|c| c.delta_w).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOISE_FIGURE: f64 = 5.011_872_336_272_722; // 7 dB

    fn ledger() -> InterferenceLedger {
        InterferenceLedger::new(NOISE_FIGURE)
    }

    fn noise_floor_w() -> f64 {
        NOISE_FIGURE * BOLTZMANN * 290.0 * 20_000_000.0
    }

    #[test]
    fn change_points_stay_sorted_and_balanced() {
        let mut l = ledger();
        let p = Preamble::default();
        l.add(100, Duration::from_millis(1), 1e-10, p, Instant::ZERO);
        l.add(100, Duration::from_millis(3), 2e-10, p, Instant::from_micros(400));
        l.add(100, Duration::from_millis(1), 4e-10, p, Instant::from_micros(900));
        let times: Vec<_> = l.changes.iter().map(|c| c.at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert!(l.total_delta_w().abs() < 1e-24);
    }

    #[test]
    fn idle_history_collapses_into_baseline() {
        let mut l = ledger();
        let p = Preamble::default();
        l.add(100, Duration::from_micros(10), 1e-10, p, Instant::ZERO);
        // The first event is fully over; adding a new one while idle folds
        // its change points away.
        l.add(100, Duration::from_micros(10), 2e-10, p, Instant::from_micros(50));
        assert_eq!(l.changes.len(), 2);
        assert!(l.total_delta_w().abs() < 1e-24);
    }

    #[test]
    fn snr_matches_closed_form() {
        let mut l = ledger();
        let p = Preamble::default();
        let signal = 1e-12;
        let event = l.add(100, Duration::from_millis(1), signal, p, Instant::ZERO);
        l.notify_rx_start();
        let snr_per = l.calculate_snr_per(&event);
        let expected = signal / noise_floor_w();
        assert!((snr_per.snr - expected).abs() / expected < 1e-12);
        l.notify_rx_end();
    }

    #[test]
    fn clean_reception_has_zero_per() {
        let mut l = ledger();
        let p = Preamble::default();
        // SNR of 1 gives 20 MHz * 1 bit = 20 Mb/s capacity, comfortably
        // above the 6 Mb/s nominal rate.
        let event = l.add(1000, Duration::from_millis(2), noise_floor_w(), p, Instant::ZERO);
        l.notify_rx_start();
        assert_eq!(l.calculate_snr_per(&event).per, 0.0);
    }

    #[test]
    fn weak_signal_has_unit_per() {
        let mut l = ledger();
        let p = Preamble::default();
        let event = l.add(
            1000,
            Duration::from_millis(2),
            noise_floor_w() * 0.01,
            p,
            Instant::ZERO,
        );
        l.notify_rx_start();
        assert_eq!(l.calculate_snr_per(&event).per, 1.0);
    }

    #[test]
    fn overlapping_interferer_decides_fate_per_segment() {
        // The wanted event alone passes the capacity test (SNR = 1); a
        // strong interferer overlapping its tail drops the segment SNR to
        // ~1/11, whose capacity (~2.5 Mb/s) is below the nominal 6 Mb/s.
        let signal = noise_floor_w();
        let p = Preamble::default();

        let mut l = ledger();
        let event = l.add(1000, Duration::from_millis(10), signal, p, Instant::ZERO);
        l.notify_rx_start();
        l.add(
            1000,
            Duration::from_millis(10),
            10.0 * signal,
            p,
            Instant::from_millis(5),
        );
        assert_eq!(l.calculate_snr_per(&event).per, 1.0);

        // A 10x weaker interferer leaves every segment within capacity.
        let mut l = ledger();
        let event = l.add(1000, Duration::from_millis(10), signal, p, Instant::ZERO);
        l.notify_rx_start();
        l.add(
            1000,
            Duration::from_millis(10),
            0.1 * signal,
            p,
            Instant::from_millis(5),
        );
        assert_eq!(l.calculate_snr_per(&event).per, 0.0);
    }

    #[test]
    fn energy_duration_tracks_pending_power() {
        let mut l = ledger();
        let p = Preamble::default();
        assert_eq!(l.energy_duration(1e-13, Instant::ZERO), Duration::ZERO);

        l.add(100, Duration::from_micros(500), 1e-10, p, Instant::ZERO);
        // Above threshold until the event ends.
        assert_eq!(l.energy_duration(1e-13, Instant::ZERO), Duration::from_micros(500));
        // Threshold above the event power: already "below".
        assert_eq!(l.energy_duration(1e-9, Instant::ZERO), Duration::ZERO);
    }

    #[test]
    fn energy_duration_spans_stacked_events() {
        let mut l = ledger();
        let p = Preamble::default();
        l.add(100, Duration::from_micros(300), 1e-10, p, Instant::ZERO);
        l.add(100, Duration::from_micros(400), 1e-10, p, Instant::from_micros(100));
        // Ambient stays above 1e-13 until the second event ends at 500us.
        assert_eq!(l.energy_duration(1e-13, Instant::from_micros(100)), Duration::from_micros(400));
    }
}
