use crate::connection::rtx_scan;
use crate::device::Device;
use crate::drivers::bulk::{BulkPacketGenerator, BulkPacketSource, ConstantRateSource, ExponentialSource, SpikySource};
use crate::drivers::flow::{ConstantRateFlowDriver, IndependentFlowDriver, RateKeyFrame};
use crate::linkqueue::{FifoQueue, RandomQueue};
use crate::pipe::Pipe;
use crate::queue::{raw_millis_to_time, ConsumerId, EventQueue};
use crate::tcp::TcpSourceState;
use netsim_graph::{LinkIndex, NodeIndex, PathStorage};
use netsim_types::{
    BulkSourceKind, FiveTuple, ForwardingRule, Packet, Scenario, ScenarioAction, ScenarioAssertion,
    SimulatorConfig,
};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::{error, info, warn};

/// A future-time effect waiting for simulated time to reach it, dispatched
/// through the single `DeferredSend` consumer rather than one consumer per
/// pending effect.
enum PendingAction {
    Send { node: NodeIndex, packet: Packet },
    InstallRule { device_index: usize, rule: ForwardingRule },
}

struct PendingEntry {
    time: netsim_types::VirtualTime,
    action: PendingAction,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
    }
}
impl Eq for PendingEntry {}
impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.time.cmp(&self.time)
    }
}

/// Either flavor of bandwidth-limited queue a link can be configured with.
pub enum LinkQueueKind {
    Fifo(FifoQueue),
    Random(RandomQueue),
}

impl LinkQueueKind {
    fn enqueue(&mut self, packet: Packet, events: &mut EventQueue) {
        match self {
            LinkQueueKind::Fifo(q) => q.enqueue(packet, events),
            LinkQueueKind::Random(q) => q.enqueue(packet, events),
        }
    }

    fn drain_fired(&mut self, events: &mut EventQueue) -> Option<Packet> {
        match self {
            LinkQueueKind::Fifo(q) => q.drain_fired(events),
            LinkQueueKind::Random(q) => q.drain_fired(events),
        }
    }
}

/// Everything the simulator owns for one directed graph link: the
/// bandwidth-limited queue feeding a propagation-delay pipe, plus where
/// the packet lands once it arrives.
pub struct LinkDatapath {
    queue: LinkQueueKind,
    pipe: Pipe,
    dst_node: NodeIndex,
    dst_port: u16,
}

/// Identifies what a fired `ConsumerId` actually is, so the dispatch loop
/// can route back into the right component without any of them knowing
/// about each other.
#[derive(Debug, Clone, Copy)]
enum ConsumerRole {
    QueueDrain(LinkIndex),
    PipeArrival(LinkIndex),
    RtxScan,
    DeferredSend,
}

const RTX_SCAN_INTERVAL_NS: u64 = 10_000_000;

/// Owns the whole simulated network: the event queue, the interned graph,
/// one `Device` per node, and one `LinkDatapath` per directed link.
/// Dispatch is index-based throughout — nothing here holds a pointer or
/// trait object into another component, sidestepping the aliasing
/// problems a `Box<dyn Consumer>` design would run into once devices,
/// queues and pipes all need to reach back into each other.
pub struct Simulator {
    pub events: EventQueue,
    pub storage: PathStorage,
    pub devices: Vec<Device>,
    node_of_device: HashMap<NodeIndex, usize>,
    links: Vec<LinkDatapath>,
    roles: Vec<ConsumerRole>,
    pending: BinaryHeap<PendingEntry>,
    deferred_consumer: Option<ConsumerId>,
    pub config: SimulatorConfig,
    pub trace: Vec<String>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Simulator {
        let mut events = EventQueue::new();
        if let Some(ns) = config.stop_time_override_ns {
            events.stop_in(raw_millis_to_time(config.clock_resolution, ns / 1_000_000));
        }
        Simulator {
            events,
            storage: PathStorage::new(),
            devices: Vec::new(),
            node_of_device: HashMap::new(),
            links: Vec::new(),
            roles: Vec::new(),
            pending: BinaryHeap::new(),
            deferred_consumer: None,
            config,
            trace: Vec::new(),
        }
    }

    fn deferred_consumer(&mut self) -> ConsumerId {
        if let Some(id) = self.deferred_consumer {
            return id;
        }
        let id = self.register(ConsumerRole::DeferredSend);
        self.deferred_consumer = Some(id);
        id
    }

    fn register(&mut self, role: ConsumerRole) -> ConsumerId {
        let id = self.events.register_consumer();
        assert_eq!(id.0, self.roles.len(), "consumer ids must be dense");
        self.roles.push(role);
        id
    }

    /// Adds a device at the named node, interning the node if new.
    pub fn add_device(&mut self, node_id: &str, address: u32) -> NodeIndex {
        let node = self.storage.intern_node(node_id);
        let device_index = self.devices.len();
        let mut device = Device::new(address);
        device.configure_sampling(self.config.sample_denominator, self.config.seed ^ address as u64);
        self.devices.push(device);
        self.node_of_device.insert(node, device_index);
        node
    }

    pub fn device_mut(&mut self, node: NodeIndex) -> &mut Device {
        let idx = self.node_of_device[&node];
        &mut self.devices[idx]
    }

    fn device_index(&self, node: NodeIndex) -> usize {
        self.node_of_device[&node]
    }

    /// Wires a bandwidth-limited, propagation-delayed directed link from
    /// `src` to `dst`. `random_queue_threshold_bytes` set to `Some` makes
    /// the link's queue a RED-like `RandomQueue`, otherwise a plain FIFO.
    #[allow(clippy::too_many_arguments)]
    pub fn add_link(
        &mut self,
        src: NodeIndex,
        dst: NodeIndex,
        src_port: u16,
        dst_port: u16,
        bandwidth_bps: u64,
        delay_ns: u64,
        max_queue_bytes: u64,
        random_queue_threshold_bytes: Option<u64>,
    ) -> LinkIndex {
        let link_index = self
            .storage
            .add_link(src, dst, src_port, dst_port, bandwidth_bps, delay_ns);
        assert_eq!(link_index.index(), self.links.len(), "link ids must be dense");

        let queue_consumer = self.register(ConsumerRole::QueueDrain(link_index));
        let pipe_consumer = self.register(ConsumerRole::PipeArrival(link_index));

        let queue = match random_queue_threshold_bytes {
            Some(threshold) => LinkQueueKind::Random(RandomQueue::new(
                self.config.clock_resolution,
                bandwidth_bps,
                max_queue_bytes,
                threshold,
                self.config.seed ^ (link_index.index() as u64),
                queue_consumer,
            )),
            None => LinkQueueKind::Fifo(FifoQueue::new(
                self.config.clock_resolution,
                bandwidth_bps,
                max_queue_bytes,
                queue_consumer,
            )),
        };

        self.links.push(LinkDatapath {
            queue,
            pipe: Pipe::new(crate::queue::from_nanos(self.config.clock_resolution, delay_ns), pipe_consumer),
            dst_node: dst,
            dst_port,
        });

        let src_index = self.device_index(src);
        self.devices[src_index].attach_output(src_port, link_index);
        link_index
    }

    pub fn link_pipe_bytes_tx(&self, link_index: LinkIndex) -> u64 {
        self.links[link_index.index()].pipe.bytes_tx
    }

    pub fn link_pipe_bytes_in_flight(&self, link_index: LinkIndex) -> u64 {
        self.links[link_index.index()].pipe.bytes_in_flight()
    }

    pub fn link_queue_occupancy_bytes(&self, link_index: LinkIndex) -> u64 {
        match &self.links[link_index.index()].queue {
            LinkQueueKind::Fifo(q) => q.occupancy_bytes(),
            LinkQueueKind::Random(q) => q.occupancy_bytes(),
        }
    }

    pub fn link_queue_max_size_bytes(&self, link_index: LinkIndex) -> u64 {
        match &self.links[link_index.index()].queue {
            LinkQueueKind::Fifo(q) => q.max_size_bytes(),
            LinkQueueKind::Random(q) => q.max_size_bytes(),
        }
    }

    pub fn link_queue_packets_dropped(&self, link_index: LinkIndex) -> u64 {
        match &self.links[link_index.index()].queue {
            LinkQueueKind::Fifo(q) => q.packets_dropped,
            LinkQueueKind::Random(q) => q.packets_dropped(),
        }
    }

    pub fn link_pipe_packets_tx(&self, link_index: LinkIndex) -> u64 {
        self.links[link_index.index()].pipe.packets_tx
    }

    fn rtx_consumer(&mut self) -> ConsumerId {
        self.register(ConsumerRole::RtxScan)
    }

    /// Starts the coalesced retransmit-timer scanner, rescheduling itself
    /// every `RTX_SCAN_INTERVAL_NS` for as long as the simulation runs.
    pub fn start_rtx_timer(&mut self) {
        let consumer = self.rtx_consumer();
        let fire_at = self
            .events
            .now()
            .saturating_add(crate::queue::from_nanos(self.config.clock_resolution, RTX_SCAN_INTERVAL_NS));
        self.events.enqueue(fire_at, consumer);
    }

    /// Emits a packet on `output_port` of the device at `node`, feeding it
    /// through that port's outgoing link queue.
    fn emit(&mut self, node: NodeIndex, output_port: u16, packet: Packet) {
        let device_index = self.device_index(node);
        let Some(&link_index) = self.devices[device_index].output_links.get(&output_port) else {
            warn!(node = %node, port = output_port, "no link attached to output port, dropping");
            return;
        };
        self.links[link_index.index()]
            .queue
            .enqueue(packet, &mut self.events);
    }

    fn dispatch_queue_drain(&mut self, link_index: LinkIndex) {
        if let Some(packet) = self.links[link_index.index()].queue.drain_fired(&mut self.events) {
            self.links[link_index.index()].pipe.admit(packet, &mut self.events);
        }
    }

    fn dispatch_pipe_arrival(&mut self, link_index: LinkIndex) {
        let (dst_node, dst_port) = {
            let link = &self.links[link_index.index()];
            (link.dst_node, link.dst_port)
        };
        let Some(packet) = self.links[link_index.index()].pipe.pop_arrived() else {
            return;
        };
        let device_index = self.device_index(dst_node);
        let now = self.events.now();
        let outputs = self.devices[device_index].handle_packet_from_port(dst_port, packet, now);
        for (port, reply) in outputs {
            self.emit(dst_node, port, reply);
        }
    }

    fn dispatch_rtx_scan(&mut self, consumer: ConsumerId) {
        let now = self.events.now();
        let mut to_emit: Vec<(NodeIndex, Packet)> = Vec::new();
        for (&node, &device_index) in self.node_of_device.clone().iter() {
            let device = &mut self.devices[device_index];
            for connection in device.connections.values_mut() {
                if let crate::connection::Connection::TcpSource(source) = connection {
                    for packet in rtx_scan(source, now) {
                        to_emit.push((node, packet));
                    }
                }
            }
        }
        for (node, packet) in to_emit {
            self.send_local(node, packet);
        }
        let fire_at = now.saturating_add(crate::queue::from_nanos(
            self.config.clock_resolution,
            RTX_SCAN_INTERVAL_NS,
        ));
        self.events.enqueue(fire_at, consumer);
    }

    /// Injects a packet at `node`'s local-origin port and emits whatever
    /// the matcher routes it to.
    fn send_local(&mut self, node: NodeIndex, packet: Packet) {
        let device_index = self.device_index(node);
        let now = self.events.now();
        let outputs = self.devices[device_index].send_local(packet, now);
        for (port, reply) in outputs {
            self.emit(node, port, reply);
        }
    }

    /// Runs the event loop to completion, dispatching each fired consumer
    /// by its registered role.
    pub fn run(&mut self) {
        loop {
            let Some((now, consumer)) = self.events.pop() else {
                break;
            };
            match self.roles[consumer.0] {
                ConsumerRole::QueueDrain(link_index) => self.dispatch_queue_drain(link_index),
                ConsumerRole::PipeArrival(link_index) => self.dispatch_pipe_arrival(link_index),
                ConsumerRole::RtxScan => self.dispatch_rtx_scan(consumer),
                ConsumerRole::DeferredSend => self.dispatch_deferred_send(now),
            }
        }
    }

    /// Loads and applies the topology, then schedules every action in a
    /// scenario, then runs the simulation, then evaluates its assertions.
    /// Returns `Err` describing the first assertion that failed.
    pub fn run_scenario(scenario: &Scenario) -> Result<Simulator, String> {
        let mut config = SimulatorConfig::default();
        scenario.config.apply_to(&mut config);
        let mut sim = Simulator::new(config);

        for link in &scenario.topology.links {
            let src = sim.ensure_node(&link.src);
            let dst = sim.ensure_node(&link.dst);
            sim.add_link(
                src,
                dst,
                link.src_port,
                link.dst_port,
                link.bandwidth_bps,
                link.delay_ns,
                link.max_queue_bytes.unwrap_or(link.bandwidth_bps / 8),
                link.random_queue_threshold_bytes,
            );
        }

        sim.start_rtx_timer();

        for action in &scenario.actions {
            sim.schedule_action(action);
        }

        sim.run();

        for assertion in &scenario.assertions {
            sim.check_assertion(assertion)?;
        }

        Ok(sim)
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(node) = self.storage.node_by_id(id) {
            node
        } else {
            let address = self.storage.node_count() as u32 + 1;
            self.add_device(id, address)
        }
    }

    fn schedule_action(&mut self, action: &ScenarioAction) {
        match action {
            ScenarioAction::InstallRule { time_ns, device, rule } => {
                self.schedule_install_rule(*time_ns, device, rule.clone());
            }
            ScenarioAction::UdpBurst {
                time_ns,
                device,
                five_tuple,
                count,
                size_bytes,
                interval_ns,
            } => {
                self.schedule_udp_burst(*time_ns, device, *five_tuple, *count, *size_bytes, *interval_ns);
            }
            ScenarioAction::TcpSend {
                time_ns,
                device,
                five_tuple,
                bytes,
            } => {
                self.schedule_tcp_send(*time_ns, device, *five_tuple, *bytes);
            }
            ScenarioAction::BulkBurst {
                time_ns,
                device,
                five_tuple,
                size_bytes,
                count,
                kind,
                seed,
            } => {
                self.schedule_bulk_burst(*time_ns, device, *five_tuple, *size_bytes, *count, kind, *seed);
            }
            ScenarioAction::FlowBurst {
                time_ns,
                device,
                five_tuple,
                packet_size_bytes,
                rate_bps,
                duration_ns,
            } => {
                self.schedule_flow_burst(
                    *time_ns,
                    device,
                    *five_tuple,
                    *packet_size_bytes,
                    *rate_bps,
                    *duration_ns,
                );
            }
        }
    }

    fn at(&self, ns: u64) -> netsim_types::VirtualTime {
        crate::queue::from_nanos(self.config.clock_resolution, ns)
    }

    fn schedule_install_rule(&mut self, time_ns: u64, device: &str, rule: ForwardingRule) {
        let Some(node) = self.storage.node_by_id(device) else {
            error!(device, "install_rule targets unknown device");
            return;
        };
        let device_index = self.device_index(node);
        let at = self.at(time_ns);
        if at <= self.events.now() {
            self.devices[device_index].matcher.add_rule(rule);
            return;
        }
        info!(device, at = time_ns, "deferring rule install");
        let consumer = self.deferred_consumer();
        self.events.enqueue(at, consumer);
        self.pending.push(PendingEntry {
            time: at,
            action: PendingAction::InstallRule { device_index, rule },
        });
    }

    fn schedule_udp_burst(
        &mut self,
        time_ns: u64,
        device: &str,
        five_tuple: FiveTuple,
        count: u32,
        size_bytes: u32,
        interval_ns: u64,
    ) {
        let Some(node) = self.storage.node_by_id(device) else {
            error!(device, "udp_burst targets unknown device");
            return;
        };
        let start = self.at(time_ns);
        let gap = self.at(interval_ns);
        let mut t = start;
        for _ in 0..count {
            let packet = Packet::new_udp(five_tuple, size_bytes, t);
            self.schedule_local_send(node, t, packet);
            t = t.saturating_add(gap);
        }
    }

    /// Schedules `packet` to be injected at `node`'s local-origin port at
    /// `at`, immediately if `at` has already passed.
    fn schedule_local_send(&mut self, node: NodeIndex, at: netsim_types::VirtualTime, packet: Packet) {
        if at <= self.events.now() {
            self.send_local(node, packet);
            return;
        }
        let consumer = self.deferred_consumer();
        self.events.enqueue(at, consumer);
        self.pending.push(PendingEntry {
            time: at,
            action: PendingAction::Send { node, packet },
        });
    }

    fn dispatch_deferred_send(&mut self, now: netsim_types::VirtualTime) {
        let mut due = Vec::new();
        while let Some(top) = self.pending.peek() {
            if top.time != now {
                break;
            }
            due.push(self.pending.pop().expect("just peeked"));
        }
        for entry in due {
            match entry.action {
                PendingAction::Send { node, packet } => self.send_local(node, packet),
                PendingAction::InstallRule { device_index, rule } => {
                    self.devices[device_index].matcher.add_rule(rule);
                }
            }
        }
    }

    fn schedule_tcp_send(&mut self, time_ns: u64, device: &str, five_tuple: FiveTuple, bytes: u64) {
        let Some(node) = self.storage.node_by_id(device) else {
            error!(device, "tcp_send targets unknown device");
            return;
        };
        let now = self.at(time_ns);
        let device_index = self.device_index(node);
        let source = self.devices[device_index]
            .connections
            .entry(five_tuple)
            .or_insert_with(|| {
                crate::connection::Connection::TcpSource(TcpSourceState::new(
                    five_tuple,
                    self.config.default_mss_bytes,
                    self.config.initial_rto_ns,
                    self.config.rto_floor_ns,
                    self.config.rto_ceiling_ns,
                ))
            });
        let crate::connection::Connection::TcpSource(source) = source else {
            error!(device, "tcp_send five-tuple is not a TCP source");
            return;
        };
        source.add_data(bytes);
        let packets = source.send_packets(now);
        for packet in packets {
            self.schedule_local_send(node, now, packet);
        }
    }

    /// Drains a rate-paced `BulkPacketGenerator` up front and schedules
    /// every packet it produces; the generator's own inter-packet pacing
    /// fixes each packet's send time.
    fn schedule_bulk_burst(
        &mut self,
        time_ns: u64,
        device: &str,
        five_tuple: FiveTuple,
        size_bytes: u32,
        count: u64,
        kind: &BulkSourceKind,
        seed: u64,
    ) {
        let Some(node) = self.storage.node_by_id(device) else {
            error!(device, "bulk_burst targets unknown device");
            return;
        };
        let start = self.at(time_ns);
        let source: Box<dyn BulkPacketSource> = match kind {
            BulkSourceKind::Constant { rate_bps } => {
                Box::new(ConstantRateSource::new(five_tuple, size_bytes, *rate_bps, start, count))
            }
            BulkSourceKind::Exponential { mean_rate_bps } => Box::new(ExponentialSource::new(
                five_tuple,
                size_bytes,
                *mean_rate_bps,
                start,
                count,
                seed,
            )),
            BulkSourceKind::Spiky { rate_bps, max_jitter_ns } => Box::new(SpikySource::new(
                five_tuple,
                size_bytes,
                *rate_bps,
                *max_jitter_ns,
                start,
                count,
                seed,
            )),
        };
        let mut generator = BulkPacketGenerator::new(vec![source]);
        while let Some(packet) = generator.next_packet() {
            let at = packet.time_sent;
            self.schedule_local_send(node, at, packet);
        }
    }

    /// Precomputes a single constant-rate key frame's worth of packets for
    /// `duration_ns` and schedules them, exercising the same rate-keyframe
    /// timeline the flow driver would play out under live feedback.
    fn schedule_flow_burst(
        &mut self,
        time_ns: u64,
        device: &str,
        five_tuple: FiveTuple,
        packet_size_bytes: u32,
        rate_bps: u64,
        duration_ns: u64,
    ) {
        let Some(node) = self.storage.node_by_id(device) else {
            error!(device, "flow_burst targets unknown device");
            return;
        };
        let start = self.at(time_ns);
        let deadline = start.saturating_add(self.at(duration_ns));
        let second = crate::queue::from_nanos(self.config.clock_resolution, 1_000_000_000).raw();
        let mut driver = ConstantRateFlowDriver::new(packet_size_bytes, second, start);
        driver.add_rate_change_keyframes(vec![RateKeyFrame { at: start, rate_bps }]);
        loop {
            let event = driver.next();
            if event.at > deadline {
                break;
            }
            let packet = Packet::new_udp(five_tuple, event.bytes as u32, event.at);
            self.schedule_local_send(node, event.at, packet);
        }
    }

    fn check_assertion(&self, assertion: &ScenarioAssertion) -> Result<(), String> {
        match assertion {
            ScenarioAssertion::ActionRatio {
                device,
                key,
                expected_ratio,
                tolerance,
            } => {
                let Some(node) = self.storage.node_by_id(device) else {
                    return Err(format!("unknown device {device}"));
                };
                let device_index = self.device_index(node);
                let rule = self.devices[device_index]
                    .matcher
                    .populate_sscp_stats()
                    .into_iter()
                    .find(|(k, _)| k == key)
                    .ok_or_else(|| format!("no installed rule for key on {device}"))?;
                let bytes: Vec<u64> = rule.1.iter().map(|s| s.total_bytes_matched).collect();
                if bytes.len() < 2 || bytes[1] == 0 {
                    return Err("action ratio assertion needs two non-zero actions".to_string());
                }
                let ratio = bytes[0] as f64 / bytes[1] as f64;
                if (ratio - expected_ratio).abs() > *tolerance {
                    return Err(format!(
                        "action ratio {ratio} not within {tolerance} of {expected_ratio}"
                    ));
                }
                Ok(())
            }
            ScenarioAssertion::DeviceCounters {
                device,
                packets_seen,
                packets_failed_to_match,
                packets_for_localhost,
            } => {
                let Some(node) = self.storage.node_by_id(device) else {
                    return Err(format!("unknown device {device}"));
                };
                let counters = self.devices[self.device_index(node)].counters;
                if let Some(expected) = packets_seen {
                    if counters.packets_seen != *expected {
                        return Err(format!(
                            "{device} packets_seen {} != {expected}",
                            counters.packets_seen
                        ));
                    }
                }
                if let Some(expected) = packets_failed_to_match {
                    if counters.packets_failed_to_match != *expected {
                        return Err(format!(
                            "{device} packets_failed_to_match {} != {expected}",
                            counters.packets_failed_to_match
                        ));
                    }
                }
                if let Some(expected) = packets_for_localhost {
                    if counters.packets_for_localhost != *expected {
                        return Err(format!(
                            "{device} packets_for_localhost {} != {expected}",
                            counters.packets_for_localhost
                        ));
                    }
                }
                Ok(())
            }
            ScenarioAssertion::MaxDuration { ns } => {
                let limit = self.at(*ns);
                if self.events.now() > limit {
                    return Err(format!("simulation ran to {} past limit {}", self.events.now(), limit));
                }
                Ok(())
            }
        }
    }
}
