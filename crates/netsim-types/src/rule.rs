use serde::{Deserialize, Serialize};

/// Sentinel rewrite tag meaning "do not change the packet's tag".
pub const KEEP_TAG: u32 = u32::MAX;

/// A wildcard value for a five-tuple field.
pub const WILD: u32 = 0;
pub const WILD_PORT: u16 = 0;
pub const WILD_PROTO: u8 = 0;

/// One five-tuple pattern inside a rule key. Multiple tuples in the same key
/// behave as OR; each field is either a concrete value or a wildcard zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FiveTupleMatch {
    pub ip_src: u32,
    pub ip_dst: u32,
    pub ip_proto: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

/// The key a forwarding rule is installed under: an optional tag match
/// (zero = wildcard), an optional input-port match (zero = wildcard), and a
/// set of matching five-tuples.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleKey {
    pub tag: u32,
    pub input_port: u16,
    pub five_tuples: Vec<FiveTupleMatch>,
}

impl RuleKey {
    pub fn new(tag: u32, input_port: u16, five_tuples: Vec<FiveTupleMatch>) -> RuleKey {
        RuleKey {
            tag,
            input_port,
            five_tuples,
        }
    }
}

/// One action in a rule's ordered action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleAction {
    pub output_port: u16,
    pub rewrite_tag: u32,
    pub weight: u32,
    pub sample: bool,
    pub preferential_drop: bool,
}

impl RuleAction {
    pub fn new(output_port: u16, weight: u32) -> RuleAction {
        RuleAction {
            output_port,
            rewrite_tag: KEEP_TAG,
            weight,
            sample: false,
            preferential_drop: false,
        }
    }
}

/// Per-action counters. Preserved across a rule update that reuses the same
/// key (see `MatchTable::install` in `netsim-match`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStats {
    pub total_bytes_matched: u64,
    pub total_pkts_matched: u64,
}

impl ActionStats {
    pub fn record(&mut self, bytes: u32) {
        self.total_bytes_matched += bytes as u64;
        self.total_pkts_matched += 1;
    }

    pub fn merge(&mut self, other: ActionStats) {
        self.total_bytes_matched += other.total_bytes_matched;
        self.total_pkts_matched += other.total_pkts_matched;
    }
}

/// A forwarding rule as carried over the wire in an `SSCPAddOrUpdate`
/// message. An empty `actions` list installed on a key deletes the current
/// rule for that key; otherwise it supersedes it and inherits the prior
/// rule's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub key: RuleKey,
    pub actions: Vec<RuleAction>,
}

impl ForwardingRule {
    pub fn new(key: RuleKey, actions: Vec<RuleAction>) -> ForwardingRule {
        ForwardingRule { key, actions }
    }

    pub fn is_delete(&self) -> bool {
        self.actions.is_empty()
    }
}
