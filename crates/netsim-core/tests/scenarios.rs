use netsim_core::{Device, Simulator};
use netsim_types::{
    BulkSourceKind, FiveTuple, FiveTupleMatch, ForwardingRule, LinkDef, RuleAction, RuleKey,
    Scenario, ScenarioAction, ScenarioAssertion, SimulatorConfigOverride, TopologyDef, VirtualTime,
};

fn udp_tuple(dst_port: u16) -> FiveTuple {
    FiveTuple {
        ip_src: 1,
        ip_dst: 2,
        ip_proto: 17,
        src_port: 5000,
        dst_port,
    }
}

/// A single device with no installed rules sees every locally-originated
/// packet fail to match, since no rule routes it anywhere.
#[test]
fn single_device_with_no_rules_drops_everything() {
    let mut device = Device::new(1);
    let five_tuple = udp_tuple(100);
    let mut t = VirtualTime::ZERO;
    for _ in 0..100 {
        let packet = netsim_types::Packet::new_udp(five_tuple, 100, t);
        let outputs = device.send_local(packet, t);
        assert!(outputs.is_empty());
        t = t.saturating_add(VirtualTime(100_000_000));
    }

    assert_eq!(device.counters.packets_seen, 100);
    assert_eq!(device.counters.bytes_seen, 10_000);
    assert_eq!(device.counters.packets_failed_to_match, 100);
    assert_eq!(device.counters.num_rules, 0);
}

fn wildcard_rule(dst_ip: u32, output_port: u16, weight: u32) -> ForwardingRule {
    ForwardingRule::new(
        RuleKey::new(
            0,
            0,
            vec![FiveTupleMatch {
                ip_src: 0,
                ip_dst: dst_ip,
                ip_proto: 0,
                src_port: 0,
                dst_port: 0,
            }],
        ),
        vec![RuleAction::new(output_port, weight)],
    )
}

/// Two devices joined by one link with plenty of headroom: every packet
/// is forwarded, the link's queue drains fully, and the pipe's byte
/// counter reflects every packet that crossed it.
#[test]
fn two_devices_one_link_no_drops() {
    let scenario = Scenario {
        name: "two-devices-one-link".to_string(),
        description: String::new(),
        config: SimulatorConfigOverride::default(),
        topology: TopologyDef {
            links: vec![LinkDef {
                src: "a".to_string(),
                dst: "b".to_string(),
                src_port: 10,
                dst_port: 20,
                bandwidth_bps: 10_000_000,
                delay_ns: 50_000_000,
                max_queue_bytes: Some(10_000),
                random_queue_threshold_bytes: None,
            }],
        },
        actions: vec![
            ScenarioAction::InstallRule {
                time_ns: 0,
                device: "a".to_string(),
                rule: wildcard_rule(2, 10, 1),
            },
            ScenarioAction::UdpBurst {
                time_ns: 0,
                device: "a".to_string(),
                five_tuple: udp_tuple(100),
                count: 100,
                size_bytes: 100,
                interval_ns: 100_000_000,
            },
        ],
        assertions: vec![ScenarioAssertion::MaxDuration { ns: 10_000_000_000 }],
    };

    let sim = Simulator::run_scenario(&scenario).expect("scenario assertions hold");

    let link_index = sim
        .storage
        .find_link(
            sim.storage.node_by_id("a").unwrap(),
            sim.storage.node_by_id("b").unwrap(),
            0,
            0,
        )
        .expect("link exists");

    assert_eq!(sim.link_pipe_bytes_tx(link_index), 10_000);
    assert_eq!(sim.link_queue_occupancy_bytes(link_index), 0);
    assert_eq!(sim.link_pipe_bytes_in_flight(link_index), 0);
}

/// Offering traffic at roughly four times the link's drain rate (50 kpps
/// in, 12.5 kpps out) forces the queue to drop packets once it reaches its
/// ceiling; every packet offered is accounted for as either forwarded or
/// dropped.
#[test]
fn saturated_queue_drops_once_it_fills() {
    let count = 5_000u32;
    let scenario = Scenario {
        name: "saturated-queue".to_string(),
        description: String::new(),
        config: SimulatorConfigOverride::default(),
        topology: TopologyDef {
            links: vec![LinkDef {
                src: "a".to_string(),
                dst: "b".to_string(),
                src_port: 10,
                dst_port: 20,
                bandwidth_bps: 10_000_000,
                delay_ns: 50_000_000,
                max_queue_bytes: Some(10_000),
                random_queue_threshold_bytes: None,
            }],
        },
        actions: vec![
            ScenarioAction::InstallRule {
                time_ns: 0,
                device: "a".to_string(),
                rule: wildcard_rule(2, 10, 1),
            },
            ScenarioAction::UdpBurst {
                time_ns: 0,
                device: "a".to_string(),
                five_tuple: udp_tuple(100),
                count,
                size_bytes: 100,
                interval_ns: 20_000,
            },
        ],
        assertions: vec![],
    };

    let sim = Simulator::run_scenario(&scenario).expect("scenario assertions hold");

    let link_index = sim
        .storage
        .find_link(
            sim.storage.node_by_id("a").unwrap(),
            sim.storage.node_by_id("b").unwrap(),
            0,
            0,
        )
        .expect("link exists");

    assert!(sim.link_queue_occupancy_bytes(link_index) <= sim.link_queue_max_size_bytes(link_index));
    assert!(sim.link_queue_packets_dropped(link_index) > 0);
    assert_eq!(
        sim.link_pipe_packets_tx(link_index) + sim.link_queue_packets_dropped(link_index),
        count as u64
    );
}

fn tcp_tuple() -> FiveTuple {
    FiveTuple {
        ip_src: 1,
        ip_dst: 2,
        ip_proto: 6,
        src_port: 4000,
        dst_port: 80,
    }
}

/// Two devices wired both ways; a TCP source hands over exactly one
/// MSS-sized segment, which is acked, and the per-flow counters at each
/// end see the same total: the data segment plus the bare ack.
#[test]
fn tcp_single_segment_is_acked_symmetrically() {
    let scenario = Scenario {
        name: "tcp-single-packet".to_string(),
        description: String::new(),
        config: SimulatorConfigOverride {
            default_mss_bytes: Some(1500),
            ..Default::default()
        },
        topology: TopologyDef {
            links: vec![
                LinkDef {
                    src: "a".to_string(),
                    dst: "b".to_string(),
                    src_port: 10,
                    dst_port: 20,
                    bandwidth_bps: 10_000_000,
                    delay_ns: 10_000_000,
                    max_queue_bytes: None,
                    random_queue_threshold_bytes: None,
                },
                LinkDef {
                    src: "b".to_string(),
                    dst: "a".to_string(),
                    src_port: 20,
                    dst_port: 10,
                    bandwidth_bps: 10_000_000,
                    delay_ns: 10_000_000,
                    max_queue_bytes: None,
                    random_queue_threshold_bytes: None,
                },
            ],
        },
        actions: vec![
            ScenarioAction::InstallRule {
                time_ns: 0,
                device: "a".to_string(),
                rule: wildcard_rule(2, 10, 1),
            },
            ScenarioAction::InstallRule {
                time_ns: 0,
                device: "b".to_string(),
                rule: wildcard_rule(1, 20, 1),
            },
            ScenarioAction::TcpSend {
                time_ns: 0,
                device: "a".to_string(),
                five_tuple: tcp_tuple(),
                bytes: 1500,
            },
        ],
        assertions: vec![ScenarioAssertion::MaxDuration { ns: 10_000_000_000 }],
    };

    let mut sim = Simulator::run_scenario(&scenario).expect("scenario assertions hold");

    let node_a = sim.storage.node_by_id("a").unwrap();
    let node_b = sim.storage.node_by_id("b").unwrap();

    let flow_at_a = *sim
        .device_mut(node_a)
        .flow_counters
        .get(&tcp_tuple())
        .expect("a observed its own flow");
    assert_eq!(flow_at_a.bytes_tx + flow_at_a.bytes_rx, 1540);
    assert_eq!(flow_at_a.pkts_tx + flow_at_a.pkts_rx, 2);

    let flow_at_b = *sim
        .device_mut(node_b)
        .flow_counters
        .get(&tcp_tuple().reversed())
        .expect("b observed its own flow");
    assert_eq!(flow_at_b.bytes_tx + flow_at_b.bytes_rx, 1540);
    assert_eq!(flow_at_b.pkts_tx + flow_at_b.pkts_rx, 2);
}

/// A rate-paced bulk burst and a rate-paced flow burst both end up on the
/// wire: every byte either one hands to the device is accounted for in the
/// link's pipe, since the link has plenty of headroom for both.
#[test]
fn bulk_and_flow_bursts_both_reach_the_link() {
    let scenario = Scenario {
        name: "bulk-and-flow-bursts".to_string(),
        description: String::new(),
        config: SimulatorConfigOverride::default(),
        topology: TopologyDef {
            links: vec![LinkDef {
                src: "a".to_string(),
                dst: "b".to_string(),
                src_port: 10,
                dst_port: 20,
                bandwidth_bps: 10_000_000,
                delay_ns: 10_000_000,
                max_queue_bytes: Some(100_000),
                random_queue_threshold_bytes: None,
            }],
        },
        actions: vec![
            ScenarioAction::InstallRule {
                time_ns: 0,
                device: "a".to_string(),
                rule: wildcard_rule(2, 10, 1),
            },
            ScenarioAction::BulkBurst {
                time_ns: 0,
                device: "a".to_string(),
                five_tuple: udp_tuple(100),
                size_bytes: 50,
                count: 10,
                kind: BulkSourceKind::Constant { rate_bps: 8_000_000 },
                seed: 0,
            },
            ScenarioAction::FlowBurst {
                time_ns: 0,
                device: "a".to_string(),
                five_tuple: udp_tuple(200),
                packet_size_bytes: 100,
                rate_bps: 4_000,
                duration_ns: 900_000_000,
            },
        ],
        assertions: vec![ScenarioAssertion::MaxDuration { ns: 10_000_000_000 }],
    };

    let sim = Simulator::run_scenario(&scenario).expect("scenario assertions hold");

    let link_index = sim
        .storage
        .find_link(
            sim.storage.node_by_id("a").unwrap(),
            sim.storage.node_by_id("b").unwrap(),
            0,
            0,
        )
        .expect("link exists");

    assert_eq!(sim.link_queue_packets_dropped(link_index), 0);
    assert_eq!(sim.link_pipe_bytes_tx(link_index), 10 * 50 + 4 * 100);
}
