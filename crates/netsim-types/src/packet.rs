use crate::rule::{ActionStats, ForwardingRule, RuleKey};
use crate::time::VirtualTime;
use serde::{Deserialize, Serialize};

/// Initial TTL carried by every packet created at an endpoint.
pub const INITIAL_TTL: i16 = 100;

/// Sentinel meaning "no tag" — a packet that has not been classified yet.
pub const NO_TAG: u32 = 0;

/// SSCP message type codes, carried in `ip_proto` on a zero-size packet.
pub mod sscp {
    pub const ADD_OR_UPDATE: u8 = 180;
    pub const STATS_REPLY: u8 = 252;
    pub const STATS_REQUEST: u8 = 253;
    pub const ACK: u8 = 254;
}

pub mod tcp_flags {
    pub const SYN: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const FIN: u8 = 0x04;
    pub const RST: u8 = 0x08;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    pub ip_src: u32,
    pub ip_dst: u32,
    pub ip_proto: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FiveTuple {
    pub fn reversed(&self) -> FiveTuple {
        FiveTuple {
            ip_src: self.ip_dst,
            ip_dst: self.ip_src,
            ip_proto: self.ip_proto,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    /// A stable hash of the tuple, used by the matcher to spread a flow's
    /// traffic across weighted ECMP actions. Deliberately uses a
    /// fixed-key hasher (not `HashMap`'s per-process `RandomState`) so the
    /// same five-tuple always lands on the same action across runs.
    pub fn stable_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Protocol-specific fields of a packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PacketKind {
    Udp,
    Tcp { seq_num: u64, flags: u8 },
    Control(ControlMessage),
}

/// The control protocol used to install/read forwarding rules. Encoded on
/// the wire as a zero-size packet whose `ip_proto` is the message type
/// (see `sscp`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlMessage {
    AddOrUpdate {
        rule: ForwardingRule,
        tx_id: Option<u64>,
    },
    StatsRequest,
    StatsReply {
        stats: Vec<(RuleKey, Vec<ActionStats>)>,
    },
    Ack {
        tx_id: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub five_tuple: FiveTuple,
    pub payload_bytes: u32,
    pub ip_id: u32,
    pub tag: u32,
    pub ttl: i16,
    pub time_sent: VirtualTime,
    preferential_drop: bool,
    pub kind: PacketKind,
}

impl Packet {
    pub fn new_udp(five_tuple: FiveTuple, payload_bytes: u32, time_sent: VirtualTime) -> Packet {
        Packet {
            five_tuple,
            payload_bytes,
            ip_id: 0,
            tag: NO_TAG,
            ttl: INITIAL_TTL,
            time_sent,
            preferential_drop: false,
            kind: PacketKind::Udp,
        }
    }

    pub fn new_tcp(
        five_tuple: FiveTuple,
        payload_bytes: u32,
        seq_num: u64,
        flags: u8,
        time_sent: VirtualTime,
    ) -> Packet {
        Packet {
            five_tuple,
            payload_bytes,
            ip_id: 0,
            tag: NO_TAG,
            ttl: INITIAL_TTL,
            time_sent,
            preferential_drop: false,
            kind: PacketKind::Tcp { seq_num, flags },
        }
    }

    pub fn new_control(
        five_tuple: FiveTuple,
        proto: u8,
        time_sent: VirtualTime,
        message: ControlMessage,
    ) -> Packet {
        let mut ft = five_tuple;
        ft.ip_proto = proto;
        Packet {
            five_tuple: ft,
            payload_bytes: 0,
            ip_id: 0,
            tag: NO_TAG,
            ttl: INITIAL_TTL,
            time_sent,
            preferential_drop: false,
            kind: PacketKind::Control(message),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self.kind, PacketKind::Control(_))
    }

    pub fn size_bytes(&self) -> u32 {
        self.payload_bytes
    }

    pub fn preferential_drop(&self) -> bool {
        self.preferential_drop
    }

    /// Sets the sticky preferential-drop bit. Once set it cannot be cleared.
    pub fn set_preferential_drop(&mut self) {
        self.preferential_drop = true;
    }

    /// Decrements TTL by one hop. Returns `false` once TTL would go below
    /// zero, at which point the caller must drop the packet instead of
    /// forwarding it.
    #[must_use]
    pub fn decrement_ttl(&mut self) -> bool {
        self.ttl -= 1;
        self.ttl >= 0
    }

    pub fn set_tag(&mut self, tag: u32) {
        self.tag = tag;
    }
}
