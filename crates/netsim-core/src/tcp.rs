use netsim_types::{tcp_flags, FiveTuple, Packet, VirtualTime};
use std::collections::BTreeSet;

/// What a coalesced `TCPRtxTimer` scan should do about one source.
pub enum RtxAction {
    None,
    /// The send buffer has been fully acked; fires the "drained" callback
    /// exactly once.
    Drained,
    Retransmit(u64),
}

/// Sender-side TCP state for one five-tuple. Byte-oriented (no actual
/// payload is carried — packets above `size_bytes` 0 just mean "this many
/// bytes of the stream").
pub struct TcpSourceState {
    pub five_tuple: FiveTuple,
    mss: u32,
    maxcwnd: u32,
    cwnd: u32,
    ssthresh: u32,
    last_acked: u64,
    highest_seqno_sent: u64,
    highest_seqno_sent_real: u64,
    dupacks: u32,
    in_fast_recovery: bool,
    recoverq: u64,
    srtt_ns: u64,
    mdev_ns: u64,
    rto_ns: u64,
    rto_floor_ns: u64,
    rto_ceiling_ns: u64,
    pub rtt_cum: u64,
    pub sawtooth: u64,
    pub send_buffer_bytes: u64,
    pub first_sent_time: Option<VirtualTime>,
    last_sent_time: VirtualTime,
    pub completion_time: Option<VirtualTime>,
}

impl TcpSourceState {
    pub fn new(
        five_tuple: FiveTuple,
        mss: u32,
        initial_rto_ns: u64,
        rto_floor_ns: u64,
        rto_ceiling_ns: u64,
    ) -> TcpSourceState {
        TcpSourceState {
            five_tuple,
            mss,
            maxcwnd: mss.saturating_mul(512),
            cwnd: mss * 4,
            ssthresh: u32::MAX,
            last_acked: 0,
            highest_seqno_sent: 0,
            highest_seqno_sent_real: 0,
            dupacks: 0,
            in_fast_recovery: false,
            recoverq: 0,
            srtt_ns: 0,
            mdev_ns: 0,
            rto_ns: initial_rto_ns,
            rto_floor_ns,
            rto_ceiling_ns,
            rtt_cum: 0,
            sawtooth: 0,
            send_buffer_bytes: 0,
            first_sent_time: None,
            last_sent_time: VirtualTime::ZERO,
            completion_time: None,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn mss(&self) -> u32 {
        self.mss
    }

    pub fn add_data(&mut self, bytes: u64) {
        self.send_buffer_bytes = self.send_buffer_bytes.saturating_add(bytes);
    }

    /// Transmits as many MSS-sized segments as the window and buffer
    /// allow, in order.
    pub fn send_packets(&mut self, now: VirtualTime) -> Vec<Packet> {
        let mut out = Vec::new();
        while self.send_buffer_bytes > 0
            && self.last_acked + self.cwnd as u64 >= self.highest_seqno_sent + self.mss as u64
        {
            let size = (self.mss as u64).min(self.send_buffer_bytes);
            if self.first_sent_time.is_none() {
                self.first_sent_time = Some(now);
            }
            let seq = self.highest_seqno_sent + 1;
            self.highest_seqno_sent += size;
            self.highest_seqno_sent_real = self.highest_seqno_sent_real.max(self.highest_seqno_sent);
            self.send_buffer_bytes -= size;
            self.last_sent_time = now;
            out.push(Packet::new_tcp(
                self.five_tuple,
                size as u32,
                seq,
                0,
                now,
            ));
        }
        out
    }

    fn update_rtt(&mut self, sample_ns: u64) {
        if self.srtt_ns == 0 {
            self.srtt_ns = sample_ns << 3;
            self.mdev_ns = sample_ns << 1;
        } else {
            let smoothed = self.srtt_ns >> 3;
            let delta = sample_ns as i64 - smoothed as i64;
            self.srtt_ns = (self.srtt_ns as i64 + delta) as u64;
            let abs_delta = delta.unsigned_abs();
            let mdev_delta = abs_delta as i64 - self.mdev_ns as i64;
            self.mdev_ns = (self.mdev_ns as i64 + (mdev_delta >> 2)) as u64;
        }
        let computed = (self.srtt_ns >> 3) + self.mdev_ns;
        self.rto_ns = if computed > self.rto_ceiling_ns {
            self.rto_ceiling_ns
        } else {
            computed.max(self.rto_floor_ns)
        };
    }

    fn inflate_window(&mut self, newly_acked: u64) {
        let capped = newly_acked.min(self.mss as u64);
        if self.cwnd < self.ssthresh {
            self.cwnd = (self.cwnd + capped as u32).min(self.maxcwnd);
        } else {
            let before = self.cwnd / self.mss.max(1);
            let grown = ((capped as f64 * self.mss as f64) / self.cwnd.max(1) as f64).max(1.0) as u32;
            self.cwnd = (self.cwnd + grown).min(self.maxcwnd);
            let after = self.cwnd / self.mss.max(1);
            if after > before {
                self.rtt_cum += 1;
                self.sawtooth += 1;
            }
        }
    }

    /// Processes an incoming ack. `rtt_sample_ns` is `None` for a
    /// retransmitted segment's ack (no RTT sample is taken on those).
    /// Returns a sequence number to retransmit, if any.
    pub fn on_ack(&mut self, ack_seq: u64, rtt_sample_ns: Option<u64>) -> Option<u64> {
        if let Some(m) = rtt_sample_ns {
            self.update_rtt(m);
        }

        let s = ack_seq.max(self.last_acked);

        if s > self.last_acked {
            if !self.in_fast_recovery {
                let newly_acked = s - self.last_acked;
                self.last_acked = s;
                self.dupacks = 0;
                self.inflate_window(newly_acked);
                None
            } else if s >= self.recoverq {
                self.in_fast_recovery = false;
                let flight = self.highest_seqno_sent - s;
                self.cwnd = self.ssthresh.min((flight + self.mss as u64) as u32);
                self.last_acked = s;
                None
            } else {
                let newly_acked = s - self.last_acked;
                self.last_acked = s;
                self.cwnd = self.cwnd.saturating_sub(newly_acked as u32) + self.mss;
                Some(self.last_acked + 1)
            }
        } else if self.in_fast_recovery {
            self.cwnd = (self.cwnd + self.mss).min(self.maxcwnd);
            None
        } else {
            self.dupacks += 1;
            if self.dupacks == 3 && self.last_acked >= self.recoverq {
                self.ssthresh = (self.cwnd / 2).max(2 * self.mss);
                self.in_fast_recovery = true;
                self.recoverq = self.highest_seqno_sent;
                self.cwnd = self.ssthresh + 3 * self.mss;
                Some(self.last_acked + 1)
            } else {
                None
            }
        }
    }

    /// Invoked by the coalesced retransmit-timer scan.
    pub fn rtx_timer_hook(&mut self, now: VirtualTime) -> RtxAction {
        if self.highest_seqno_sent == self.last_acked && self.send_buffer_bytes == 0 {
            return RtxAction::None;
        }
        if self.highest_seqno_sent_real <= self.last_acked && self.send_buffer_bytes == 0 {
            if self.completion_time.is_none() {
                self.completion_time = Some(now);
                return RtxAction::Drained;
            }
            return RtxAction::None;
        }
        if now.raw() <= self.last_sent_time.raw() + self.rto_ns {
            return RtxAction::None;
        }

        if self.in_fast_recovery {
            self.cwnd = self.mss;
        }
        self.ssthresh = (self.cwnd / 2).max(2 * self.mss);
        self.cwnd = self.mss;
        self.in_fast_recovery = false;
        self.recoverq = self.highest_seqno_sent;
        self.dupacks = 0;
        self.highest_seqno_sent = self.last_acked + self.mss as u64;
        RtxAction::Retransmit(self.last_acked + 1)
    }

    /// Empties the window and counters but leaves the send buffer; a
    /// subsequent `add_data` restarts the connection from scratch.
    pub fn close(&mut self) {
        self.last_acked = 0;
        self.highest_seqno_sent = 0;
        self.highest_seqno_sent_real = 0;
        self.cwnd = self.mss * 4;
        self.ssthresh = u32::MAX;
        self.dupacks = 0;
        self.in_fast_recovery = false;
        self.recoverq = 0;
        self.first_sent_time = None;
        self.completion_time = None;
    }
}

/// Receiver-side TCP state for one five-tuple (the sink's own outgoing
/// direction — acks flow from here back to the source).
pub struct TcpSinkState {
    pub five_tuple: FiveTuple,
    pub cumulative_ack: u64,
    out_of_order: BTreeSet<u64>,
    last_tag: u32,
    pub tag_changes: u64,
}

impl TcpSinkState {
    pub fn new(five_tuple: FiveTuple) -> TcpSinkState {
        TcpSinkState {
            five_tuple,
            cumulative_ack: 0,
            out_of_order: BTreeSet::new(),
            last_tag: 0,
            tag_changes: 0,
        }
    }

    /// Folds in one data segment and returns the bare ack packet to send
    /// back. `seq_num` is the 1-indexed starting byte of the segment.
    pub fn on_packet(&mut self, packet: &Packet, now: VirtualTime) -> Packet {
        if packet.tag != self.last_tag {
            self.tag_changes += 1;
            self.last_tag = packet.tag;
        }

        if let netsim_types::PacketKind::Tcp { seq_num, .. } = packet.kind {
            if seq_num == 1 {
                self.cumulative_ack = 0;
                self.out_of_order.clear();
            }
            let end = seq_num - 1 + packet.size_bytes() as u64;
            if seq_num <= self.cumulative_ack + 1 {
                self.cumulative_ack = self.cumulative_ack.max(end);
                while let Some(&next_end) = self.out_of_order.iter().next() {
                    if next_end <= self.cumulative_ack {
                        self.out_of_order.remove(&next_end);
                    } else {
                        break;
                    }
                }
            } else {
                self.out_of_order.insert(end);
            }
        }

        let mut ack = Packet::new_tcp(
            self.five_tuple,
            40,
            self.cumulative_ack,
            tcp_flags::ACK,
            packet.time_sent,
        );
        ack.ip_id = now.raw() as u32;
        ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> FiveTuple {
        FiveTuple {
            ip_src: 1,
            ip_dst: 2,
            ip_proto: 6,
            src_port: 1000,
            dst_port: 2000,
        }
    }

    #[test]
    fn single_segment_send_and_ack() {
        let mut source = TcpSourceState::new(tuple(), 1460, 2_000_000_000, 200_000_000, 2_000_000_000);
        source.add_data(1500);
        let packets = source.send_packets(VirtualTime(0));
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].size_bytes(), 1460);
        assert_eq!(packets[1].size_bytes(), 40);
    }

    #[test]
    fn cumulative_ack_is_monotonic() {
        let mut sink = TcpSinkState::new(tuple().reversed());
        let p1 = Packet::new_tcp(tuple(), 1000, 1, 0, VirtualTime(0));
        let ack1 = sink.on_packet(&p1, VirtualTime(10));
        let ack1_seq = match ack1.kind {
            netsim_types::PacketKind::Tcp { seq_num, .. } => seq_num,
            _ => panic!("expected tcp ack"),
        };
        assert_eq!(ack1_seq, 1000);

        let p2 = Packet::new_tcp(tuple(), 500, 1001, 0, VirtualTime(20));
        let ack2 = sink.on_packet(&p2, VirtualTime(30));
        let ack2_seq = match ack2.kind {
            netsim_types::PacketKind::Tcp { seq_num, .. } => seq_num,
            _ => panic!("expected tcp ack"),
        };
        assert!(ack2_seq >= ack1_seq);
    }
}
