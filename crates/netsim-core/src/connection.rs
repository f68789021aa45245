use crate::tcp::{RtxAction, TcpSinkState, TcpSourceState};
use netsim_types::{FiveTuple, Packet, PacketKind, VirtualTime};

/// Per-five-tuple counters every connection accumulates, regardless of
/// protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowCounters {
    pub pkts_tx: u64,
    pub pkts_rx: u64,
    pub bytes_tx: u64,
    pub bytes_rx: u64,
}

pub struct UdpSourceState {
    pub five_tuple: FiveTuple,
}

pub struct UdpSinkState {
    pub five_tuple: FiveTuple,
}

/// One endpoint's role for a given five-tuple, stored in a device's
/// connection table.
pub enum Connection {
    UdpSource(UdpSourceState),
    UdpSink(UdpSinkState),
    TcpSource(TcpSourceState),
    TcpSink(TcpSinkState),
}

impl Connection {
    pub fn five_tuple(&self) -> FiveTuple {
        match self {
            Connection::UdpSource(s) => s.five_tuple,
            Connection::UdpSink(s) => s.five_tuple,
            Connection::TcpSource(s) => s.five_tuple,
            Connection::TcpSink(s) => s.five_tuple,
        }
    }

    /// Handles an incoming packet addressed to this connection, returning
    /// any reply packets to send back toward the peer.
    pub fn on_packet(&mut self, packet: &Packet, now: VirtualTime) -> Vec<Packet> {
        match self {
            Connection::UdpSink(_) => Vec::new(),
            Connection::UdpSource(_) => Vec::new(),
            Connection::TcpSink(sink) => vec![sink.on_packet(packet, now)],
            Connection::TcpSource(source) => {
                if let PacketKind::Tcp { seq_num, flags } = packet.kind {
                    if flags & netsim_types::tcp_flags::ACK != 0 {
                        let rtt_sample = Some(now.saturating_sub(packet.time_sent).raw());
                        let retransmit = source.on_ack(seq_num, rtt_sample);
                        let mut replies = source.send_packets(now);
                        if let Some(seq) = retransmit {
                            replies.insert(
                                0,
                                Packet::new_tcp(source.five_tuple, source.mss(), seq, 0, now),
                            );
                        }
                        return replies;
                    }
                }
                Vec::new()
            }
        }
    }
}

/// Drives the coalesced retransmit timer: called periodically for every
/// registered TCP source.
pub fn rtx_scan(source: &mut TcpSourceState, now: VirtualTime) -> Vec<Packet> {
    match source.rtx_timer_hook(now) {
        RtxAction::None | RtxAction::Drained => Vec::new(),
        RtxAction::Retransmit(seq) => {
            vec![Packet::new_tcp(source.five_tuple, source.mss(), seq, 0, now)]
        }
    }
}
