use crate::config::SimulatorConfigOverride;
use crate::packet::FiveTuple;
use crate::rule::{ForwardingRule, RuleKey};
use serde::Deserialize;

/// One link in a scenario's topology block.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkDef {
    pub src: String,
    pub dst: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub bandwidth_bps: u64,
    pub delay_ns: u64,
    /// Queue ceiling in bytes. Defaults to one second of buffering at
    /// `bandwidth_bps` when omitted.
    #[serde(default)]
    pub max_queue_bytes: Option<u64>,
    /// RED-like drop threshold in bytes. `None` keeps the link's queue a
    /// plain FIFO.
    #[serde(default)]
    pub random_queue_threshold_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologyDef {
    #[serde(default)]
    pub links: Vec<LinkDef>,
}

/// Which rate-paced, congestion-control-independent source a `BulkBurst`
/// draws packets from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BulkSourceKind {
    /// Fixed inter-packet gap.
    Constant { rate_bps: u64 },
    /// Poisson arrivals at the given mean rate.
    Exponential { mean_rate_bps: u64 },
    /// Fixed inter-packet gap plus bounded uniform jitter.
    Spiky { rate_bps: u64, max_jitter_ns: u64 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Install a forwarding rule on a named device at a given time.
    InstallRule {
        time_ns: u64,
        device: String,
        rule: ForwardingRule,
    },
    /// Emit `count` UDP packets of `size_bytes` starting at `time_ns`,
    /// `interval_ns` apart.
    UdpBurst {
        time_ns: u64,
        device: String,
        five_tuple: FiveTuple,
        count: u32,
        size_bytes: u32,
        interval_ns: u64,
    },
    /// Hand `bytes` of data to a TCP source at a given time.
    TcpSend {
        time_ns: u64,
        device: String,
        five_tuple: FiveTuple,
        bytes: u64,
    },
    /// Emit `count` packets of `size_bytes` from a rate-paced bulk source,
    /// starting at `time_ns`, independent of any congestion control.
    BulkBurst {
        time_ns: u64,
        device: String,
        five_tuple: FiveTuple,
        size_bytes: u32,
        count: u64,
        kind: BulkSourceKind,
        #[serde(default)]
        seed: u64,
    },
    /// Emit a single constant-rate flow of `packet_size_bytes` packets for
    /// `duration_ns`, starting at `time_ns` and paced by `rate_bps`.
    FlowBurst {
        time_ns: u64,
        device: String,
        five_tuple: FiveTuple,
        packet_size_bytes: u32,
        rate_bps: u64,
        duration_ns: u64,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAssertion {
    /// Assert the matcher's total weighted-action share for `key` lands
    /// within `tolerance` of `expected_ratio` (heavier/lighter action byte
    /// counts).
    ActionRatio {
        device: String,
        key: RuleKey,
        expected_ratio: f64,
        tolerance: f64,
    },
    /// Assert a device's aggregate counters.
    DeviceCounters {
        device: String,
        packets_seen: Option<u64>,
        packets_failed_to_match: Option<u64>,
        packets_for_localhost: Option<u64>,
    },
    /// Assert the run finishes within `ns` of virtual time.
    MaxDuration { ns: u64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: SimulatorConfigOverride,
    #[serde(default)]
    pub topology: TopologyDef,
    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
    #[serde(default)]
    pub assertions: Vec<ScenarioAssertion>,
}
