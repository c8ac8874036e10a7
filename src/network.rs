//! Simulation arena and event dispatch.
//!
//! The MAC, PHY, channel and device of one station refer to each other
//! mutually, so the stacks live in an arena indexed by node id and every
//! cross-component step goes through this module:
//!
//! 1) The scheduler pops the next (time, event) pair.
//! 2) The event is dispatched to the owning component, which returns the
//!    steps it wants taken (MAC actions, PHY indications, deliveries).
//! 3) Those steps are applied in order, which may schedule further events.
//!
//! Applying steps in their returned order is what preserves the reference
//! timing semantics: a transmission is recorded by the MAC's listener hooks
//! before the follow-up grant computation runs, deliveries are scheduled
//! with per-peer propagation delay, and so on.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::app::TrafficGenerator;
use crate::channel::{Channel, PathLossParameters, Point};
use crate::device::{NetDevice, PacketType};
use crate::frame::{Frame, FrameType, Mac48Address, Mac48Allocator};
use crate::mac::{Mac, MacAction, MacConfig, TimerKind};
use crate::phy::{Phy, PhyConfig, PhyEvent, PhyIndication, Preamble};
use crate::sim::{Instant, Scheduler};

/// Everything the scheduler can carry. Frames in flight are owned by the
/// event that will deliver them.
pub enum Event {
    MacTimer {
        node: usize,
        kind: TimerKind,
        generation: u64,
    },
    EndReceive {
        node: usize,
        generation: u64,
        frame: Frame,
        event: PhyEvent,
    },
    Deliver {
        node: usize,
        frame: Frame,
        preamble: Preamble,
        rx_power_dbm: f64,
    },
    AppSend {
        node: usize,
    },
}

/// One entry of the run trace. Traces are the observable output of a run:
/// two runs are equivalent iff their traces are equal.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TraceEntry {
    PhyTxStart {
        time: Instant,
        node: usize,
        frame_type: FrameType,
        size: usize,
        to: Mac48Address,
    },
    MacRxDeliver {
        time: Instant,
        node: usize,
        from: Mac48Address,
        to: Mac48Address,
        size: usize,
    },
    AppTx {
        time: Instant,
        node: usize,
        size: usize,
    },
    AppRx {
        time: Instant,
        node: usize,
        size: usize,
    },
}

/// Per-node application-level counters.
#[derive(Clone, Copy, Default, Debug)]
pub struct NodeStats {
    pub app_tx_packets: u64,
    pub app_tx_bytes: u64,
    pub app_rx_packets: u64,
    pub app_rx_bytes: u64,
}

/// One station: its link stack, position, and optional traffic source.
pub struct NodeStack {
    pub mac: Mac,
    pub phy: Phy,
    pub device: NetDevice,
    pub position: Point,
    pub app: Option<TrafficGenerator>,
}

/// The whole simulated network.
pub struct Network {
    scheduler: Scheduler<Event>,
    nodes: Vec<NodeStack>,
    channel: Channel,
    stats: Vec<NodeStats>,
    trace: Vec<TraceEntry>,
    allocator: Mac48Allocator,
    seed: u64,
    next_stream: u64,
}

impl Network {
    pub fn new(seed: u64) -> Self {
        Self::with_channel(seed, PathLossParameters::default())
    }

    pub fn with_channel(seed: u64, params: PathLossParameters) -> Self {
        let mut channel = Channel::new(params);
        let next_stream = channel.assign_streams(seed, 0);
        Network {
            scheduler: Scheduler::new(),
            nodes: Vec::new(),
            channel,
            stats: Vec::new(),
            trace: Vec::new(),
            allocator: Mac48Allocator::new(),
            seed,
            next_stream,
        }
    }

    /// Create a station at `position` and attach it to the channel. The MAC
    /// and PHY each take the next RNG stream, in node order.
    pub fn add_node(&mut self, position: Point, mac_config: MacConfig, phy_config: PhyConfig) -> usize {
        let index = self.nodes.len();
        let address = self.allocator.allocate();
        let mut mac = Mac::new(address, mac_config);
        self.next_stream += mac.assign_streams(self.seed, self.next_stream);
        let mut phy = Phy::new(&phy_config);
        self.next_stream += phy.assign_streams(self.seed, self.next_stream);
        let device = NetDevice::new(address);
        self.nodes.push(NodeStack {
            mac,
            phy,
            device,
            position,
            app: None,
        });
        self.stats.push(NodeStats::default());
        self.channel.attach(index);
        info!("node {index} at ({:.1}, {:.1}) is {address}", position.x, position.y);
        index
    }

    /// Install a traffic source on `node` and schedule its first firing.
    pub fn install_traffic(&mut self, node: usize, config: crate::app::TrafficConfig, destination: Mac48Address) {
        let mut app = TrafficGenerator::new(config, destination);
        self.next_stream += app.assign_streams(self.seed, self.next_stream);
        let start = app.start_delay();
        self.nodes[node].app = Some(app);
        self.scheduler.schedule_in(start, Event::AppSend { node });
    }

    pub fn now(&self) -> Instant {
        self.scheduler.now()
    }

    pub fn node(&self, index: usize) -> &NodeStack {
        &self.nodes[index]
    }

    pub fn address(&self, index: usize) -> Mac48Address {
        self.nodes[index].device.address()
    }

    pub fn stats(&self, index: usize) -> NodeStats {
        self.stats[index]
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Submit an upper-layer payload on a node, as its device would.
    /// Returns false if the device rejects the request.
    pub fn send(&mut self, node: usize, payload: &[u8], destination: Mac48Address, protocol: u16) -> bool {
        let now = self.scheduler.now();
        match self.nodes[node].device.prepare_send(payload, destination, protocol) {
            Some((payload, header)) => {
                let actions = self.nodes[node].mac.enqueue(payload, header, now);
                self.apply_mac_actions(node, actions, now);
                true
            }
            None => false,
        }
    }

    /// Run every event up to and including `end`, then park the clock there.
    pub fn run_until(&mut self, end: Instant) {
        while let Some(at) = self.scheduler.peek_time() {
            if at > end {
                break;
            }
            let (now, event) = self.scheduler.pop().expect("peeked event vanished");
            self.dispatch(now, event);
        }
        self.scheduler.advance_to(end);
    }

    pub fn run_for(&mut self, duration: Duration) {
        let end = self.scheduler.now() + duration;
        self.run_until(end);
    }

    fn dispatch(&mut self, now: Instant, event: Event) {
        match event {
            Event::MacTimer { node, kind, generation } => {
                let actions = self.nodes[node].mac.handle_timer(kind, generation, now);
                self.apply_mac_actions(node, actions, now);
            }
            Event::EndReceive {
                node,
                generation,
                frame,
                event,
            } => {
                // A transmission may have pre-empted this reception after
                // the event was scheduled.
                if !self.nodes[node].phy.end_rx_is_current(generation) {
                    return;
                }
                let (_, indications) = self.nodes[node].phy.end_receive(frame, &event, now);
                self.apply_phy_indications(node, indications, now);
            }
            Event::Deliver {
                node,
                frame,
                preamble,
                rx_power_dbm,
            } => {
                let attempt = self.nodes[node].phy.start_receive(frame, preamble, rx_power_dbm, now);
                if let Some(rx) = attempt.scheduled {
                    self.scheduler.schedule_at(
                        rx.at,
                        Event::EndReceive {
                            node,
                            generation: rx.generation,
                            frame: rx.frame,
                            event: rx.event,
                        },
                    );
                }
                self.apply_phy_indications(node, attempt.indications, now);
            }
            Event::AppSend { node } => self.app_send(node, now),
        }
    }

    fn app_send(&mut self, node: usize, now: Instant) {
        let Some(app) = self.nodes[node].app.as_mut() else {
            return;
        };
        let Some(send) = app.fire() else {
            return;
        };
        if let Some(next_in) = send.next_in {
            self.scheduler.schedule_in(next_in, Event::AppSend { node });
        }
        self.stats[node].app_tx_packets += 1;
        self.stats[node].app_tx_bytes += send.payload.len() as u64;
        self.trace.push(TraceEntry::AppTx {
            time: now,
            node,
            size: send.payload.len(),
        });
        if let Some((payload, header)) =
            self.nodes[node]
                .device
                .prepare_send(&send.payload, send.destination, send.protocol)
        {
            let actions = self.nodes[node].mac.enqueue(payload, header, now);
            self.apply_mac_actions(node, actions, now);
        }
    }

    fn apply_mac_actions(&mut self, node: usize, actions: Vec<MacAction>, now: Instant) {
        for action in actions {
            match action {
                MacAction::Arm { kind, delay, generation } => {
                    self.scheduler.schedule_in(delay, Event::MacTimer { node, kind, generation });
                }
                MacAction::Transmit { frame, preamble } => {
                    self.transmit(node, frame, preamble, now);
                }
                MacAction::Deliver { payload, to, from } => {
                    self.deliver_up(node, &payload, to, from, now);
                }
                MacAction::RestartSendCycle => {
                    self.nodes[node].mac.init_send();
                    let follow_up = self.nodes[node].mac.start_backoff_if_needed(now);
                    self.apply_mac_actions(node, follow_up, now);
                }
            }
        }
    }

    fn apply_phy_indications(&mut self, node: usize, indications: Vec<PhyIndication>, now: Instant) {
        for indication in indications {
            match indication {
                PhyIndication::CcaBusyStart(duration) => {
                    self.nodes[node].mac.notify_cca_busy_start(now, duration);
                }
                PhyIndication::TxStart(duration) => {
                    self.nodes[node].mac.notify_tx_start(now, duration);
                }
                PhyIndication::RxStart(duration) => {
                    self.nodes[node].mac.notify_rx_start(now, duration);
                }
                PhyIndication::RxEndOk(frame) => {
                    let actions = self.nodes[node].mac.receive_ok(&frame, now);
                    self.apply_mac_actions(node, actions, now);
                }
                PhyIndication::RxEndError(frame) => {
                    self.nodes[node].mac.receive_error(&frame);
                }
            }
        }
    }

    /// Put a frame on the air from `node` and schedule its arrival at every
    /// peer.
    fn transmit(&mut self, node: usize, frame: Frame, preamble: Preamble, now: Instant) {
        self.trace.push(TraceEntry::PhyTxStart {
            time: now,
            node,
            frame_type: frame.header.frame_type(),
            size: frame.size(),
            to: frame.header.addr1(),
        });
        let tx = self.nodes[node].phy.start_send(&frame, preamble, now);
        self.apply_phy_indications(node, tx.indications, now);

        let positions: Vec<Point> = self.nodes.iter().map(|n| n.position).collect();
        for delivery in self.channel.send(node, tx.power_dbm, &positions) {
            self.scheduler.schedule_in(
                delivery.delay,
                Event::Deliver {
                    node: delivery.node,
                    frame: frame.clone(),
                    preamble,
                    rx_power_dbm: delivery.rx_power_dbm,
                },
            );
        }
    }

    fn deliver_up(&mut self, node: usize, payload: &Arc<[u8]>, to: Mac48Address, from: Mac48Address, now: Instant) {
        let Some(received) = self.nodes[node].device.receive(payload, to, from) else {
            return;
        };
        self.trace.push(TraceEntry::MacRxDeliver {
            time: now,
            node,
            from,
            to,
            size: payload.len(),
        });
        if received.packet_type == PacketType::Host {
            self.stats[node].app_rx_packets += 1;
            self.stats[node].app_rx_bytes += received.payload.len() as u64;
            self.trace.push(TraceEntry::AppRx {
                time: now,
                node,
                size: received.payload.len(),
            });
        }
    }
}
