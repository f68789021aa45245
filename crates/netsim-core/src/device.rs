use crate::connection::{Connection, FlowCounters, UdpSinkState, UdpSourceState};
use crate::tcp::TcpSinkState;
use netsim_graph::LinkIndex;
use netsim_match::Matcher;
use netsim_types::{sscp, ControlMessage, FiveTuple, Packet, PacketKind, VirtualTime, KEEP_TAG};
use rand::Rng;
use std::collections::HashMap;
use tracing::warn;

/// The port number used for traffic a device originates itself, as
/// opposed to traffic arriving from a neighbor over a real link. Must be
/// distinct from the matcher's wildcard sentinel (`WILD_PORT`, zero) —
/// otherwise a rule that only matches an explicit input port could never
/// distinguish "from this device itself" from "from anywhere." A rule with
/// a wildcard input port still matches local traffic, since the matcher
/// falls back to its wildcard branch whenever a query value has no exact
/// child.
pub const LOCAL_PORT: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceCounters {
    pub num_rules: u64,
    pub packets_seen: u64,
    pub bytes_seen: u64,
    pub packets_failed_to_match: u64,
    pub bytes_failed_to_match: u64,
    pub packets_for_localhost: u64,
    pub bytes_for_localhost: u64,
    pub route_updates_seen: u64,
}

/// A forwarding device: one matcher, a device-local port table mapping
/// local port numbers to outgoing graph links, and a per-five-tuple
/// connection table for traffic this device originates or terminates.
pub struct Device {
    pub address: u32,
    pub matcher: Matcher,
    pub output_links: HashMap<u16, LinkIndex>,
    pub connections: HashMap<FiveTuple, Connection>,
    pub counters: DeviceCounters,
    pub die_on_failed_match: bool,
    pub flow_counters: HashMap<FiveTuple, FlowCounters>,
    pub sampled: Vec<Packet>,
    next_access_port: u16,
    /// Denominator for per-action Bernoulli sampling (1/N). Zero disables
    /// sampling entirely.
    sample_denominator: u32,
    sample_rng: rand::rngs::StdRng,
}

impl Device {
    pub fn new(address: u32) -> Device {
        use rand::SeedableRng;
        Device {
            matcher: Matcher::new(format!("device-{address}")),
            output_links: HashMap::new(),
            connections: HashMap::new(),
            counters: DeviceCounters::default(),
            die_on_failed_match: false,
            flow_counters: HashMap::new(),
            sampled: Vec::new(),
            next_access_port: 1,
            sample_denominator: 0,
            sample_rng: rand::rngs::StdRng::seed_from_u64(0),
            address,
        }
    }

    /// Wires up this device's per-action sampling rate. `denominator` of
    /// zero disables sampling entirely, matching
    /// `SimulatorConfig::sample_denominator`.
    pub fn configure_sampling(&mut self, denominator: u32, seed: u64) {
        use rand::SeedableRng;
        self.sample_denominator = denominator;
        self.sample_rng = rand::rngs::StdRng::seed_from_u64(seed);
    }

    pub fn attach_output(&mut self, local_port: u16, link: LinkIndex) {
        self.output_links.insert(local_port, link);
    }

    /// Allocates the lowest free source access-layer port in `[1,
    /// 65535]`. Fatal if the space is exhausted.
    pub fn alloc_access_port(&mut self) -> u16 {
        let port = self.next_access_port;
        assert!(port != 0, "access-layer port space exhausted");
        self.next_access_port = self
            .next_access_port
            .checked_add(1)
            .expect("access-layer port space exhausted");
        port
    }

    pub fn register_tcp_source(&mut self, five_tuple: FiveTuple, source: crate::tcp::TcpSourceState) {
        self.connections
            .insert(five_tuple, Connection::TcpSource(source));
    }

    pub fn register_udp_source(&mut self, five_tuple: FiveTuple) {
        self.connections
            .insert(five_tuple, Connection::UdpSource(UdpSourceState { five_tuple }));
    }

    fn record_flow_tx(&mut self, five_tuple: FiveTuple, bytes: u32) {
        let counters = self.flow_counters.entry(five_tuple).or_default();
        counters.pkts_tx += 1;
        counters.bytes_tx += bytes as u64;
    }

    fn record_flow_rx(&mut self, five_tuple: FiveTuple, bytes: u32) {
        let counters = self.flow_counters.entry(five_tuple).or_default();
        counters.pkts_rx += 1;
        counters.bytes_rx += bytes as u64;
    }

    /// Injects a packet this device originates itself through the same
    /// seven-step pipeline as packets arriving from a neighbor, entering
    /// at the local-origin port.
    pub fn send_local(&mut self, packet: Packet, now: VirtualTime) -> Vec<(u16, Packet)> {
        let is_control = packet.is_control();
        let five_tuple = packet.five_tuple;
        let bytes = packet.size_bytes();
        let outputs = self.handle_packet_from_port(LOCAL_PORT, packet, now);
        if !is_control {
            self.record_flow_tx(five_tuple, bytes);
        }
        outputs
    }

    /// The seven-step pipeline: SSCP short-circuit, localhost delivery,
    /// match-or-drop, rewrite/TTL, sampling, boundary notification
    /// (no-op — out of scope), emit. Returns the `(output_port, packet)`
    /// pairs to forward; control replies and connection acks are
    /// addressed back out `input_port` under the symmetric-link
    /// assumption used throughout this datapath.
    pub fn handle_packet_from_port(
        &mut self,
        input_port: u16,
        mut packet: Packet,
        now: VirtualTime,
    ) -> Vec<(u16, Packet)> {
        self.counters.packets_seen += 1;
        self.counters.bytes_seen += packet.size_bytes() as u64;

        if packet.is_control() {
            return self.handle_control(input_port, packet, now);
        }

        if packet.five_tuple.ip_dst == self.address {
            self.counters.packets_for_localhost += 1;
            self.counters.bytes_for_localhost += packet.size_bytes() as u64;
            self.record_flow_rx(packet.five_tuple.reversed(), packet.size_bytes());
            let key = packet.five_tuple.reversed();
            let conn = self.connections.entry(key).or_insert_with(|| {
                if matches!(packet.kind, PacketKind::Tcp { .. }) {
                    Connection::TcpSink(TcpSinkState::new(key))
                } else {
                    Connection::UdpSink(UdpSinkState { five_tuple: key })
                }
            });
            let replies = conn.on_packet(&packet, now);
            for reply in &replies {
                self.record_flow_tx(key, reply.size_bytes());
            }
            return replies.into_iter().map(|p| (input_port, p)).collect();
        }

        let action = match self.matcher.match_or_null(
            input_port,
            packet.tag,
            &packet.five_tuple,
            packet.size_bytes(),
        ) {
            Some(action) => action,
            None => {
                self.counters.packets_failed_to_match += 1;
                self.counters.bytes_failed_to_match += packet.size_bytes() as u64;
                if self.die_on_failed_match {
                    panic!(
                        "no rule matched packet {:?} on device {}",
                        packet.five_tuple, self.address
                    );
                }
                return Vec::new();
            }
        };

        if action.rewrite_tag != KEEP_TAG {
            packet.set_tag(action.rewrite_tag);
        }
        if action.preferential_drop {
            packet.set_preferential_drop();
        }
        if !packet.decrement_ttl() {
            panic!(
                "TTL exceeded for packet {:?} on device {}",
                packet.five_tuple, self.address
            );
        }
        if action.sample && self.sample_denominator != 0 {
            let p = 1.0 / self.sample_denominator as f64;
            if self.sample_rng.random::<f64>() < p {
                self.sampled.push(packet.clone());
            }
        }

        vec![(action.output_port, packet)]
    }

    fn handle_control(
        &mut self,
        input_port: u16,
        packet: Packet,
        now: VirtualTime,
    ) -> Vec<(u16, Packet)> {
        let PacketKind::Control(message) = packet.kind.clone() else {
            unreachable!("is_control implies Control variant")
        };
        match message {
            ControlMessage::AddOrUpdate { rule, tx_id } => {
                self.matcher.add_rule(rule);
                self.counters.route_updates_seen += 1;
                self.counters.num_rules = self.matcher.num_rules() as u64;
                match tx_id {
                    Some(tx_id) => {
                        let ack = Packet::new_control(
                            packet.five_tuple.reversed(),
                            sscp::ACK,
                            now,
                            ControlMessage::Ack { tx_id },
                        );
                        vec![(input_port, ack)]
                    }
                    None => Vec::new(),
                }
            }
            ControlMessage::StatsRequest => {
                let stats = self.matcher.populate_sscp_stats();
                let reply = Packet::new_control(
                    packet.five_tuple.reversed(),
                    sscp::STATS_REPLY,
                    now,
                    ControlMessage::StatsReply { stats },
                );
                vec![(input_port, reply)]
            }
            ControlMessage::StatsReply { .. } | ControlMessage::Ack { .. } => {
                warn!(device = self.address, "received terminal SSCP reply, ignoring");
                Vec::new()
            }
        }
    }
}
