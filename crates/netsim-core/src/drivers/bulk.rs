use netsim_types::{FiveTuple, Packet, VirtualTime};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A source of packets not tied to congestion control. Packets must be
/// returned with non-decreasing `time_sent`.
pub trait BulkPacketSource: Send {
    fn next_packet(&mut self) -> Option<Packet>;
}

/// Fixed-size packets at a fixed rate.
pub struct ConstantRateSource {
    five_tuple: FiveTuple,
    size_bytes: u32,
    rate_bps: u64,
    next_time: VirtualTime,
    remaining: u64,
}

impl ConstantRateSource {
    pub fn new(
        five_tuple: FiveTuple,
        size_bytes: u32,
        rate_bps: u64,
        start: VirtualTime,
        count: u64,
    ) -> ConstantRateSource {
        ConstantRateSource {
            five_tuple,
            size_bytes,
            rate_bps,
            next_time: start,
            remaining: count,
        }
    }

    fn inter_packet_gap_ns(&self) -> u64 {
        (self.size_bytes as u64 * 8 * 1_000_000_000) / self.rate_bps.max(1)
    }
}

impl BulkPacketSource for ConstantRateSource {
    fn next_packet(&mut self) -> Option<Packet> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let packet = Packet::new_udp(self.five_tuple, self.size_bytes, self.next_time);
        self.next_time = self
            .next_time
            .saturating_add(VirtualTime(self.inter_packet_gap_ns()));
        Some(packet)
    }
}

/// Exponentially distributed inter-packet gaps (Poisson arrivals), fixed
/// packet size.
pub struct ExponentialSource {
    five_tuple: FiveTuple,
    size_bytes: u32,
    mean_gap_ns: f64,
    next_time: VirtualTime,
    remaining: u64,
    rng: rand::rngs::StdRng,
}

impl ExponentialSource {
    pub fn new(
        five_tuple: FiveTuple,
        size_bytes: u32,
        mean_rate_bps: u64,
        start: VirtualTime,
        count: u64,
        seed: u64,
    ) -> ExponentialSource {
        use rand::SeedableRng;
        let mean_gap_ns = (size_bytes as u64 * 8 * 1_000_000_000) as f64 / mean_rate_bps.max(1) as f64;
        ExponentialSource {
            five_tuple,
            size_bytes,
            mean_gap_ns,
            next_time: start,
            remaining: count,
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }
}

impl BulkPacketSource for ExponentialSource {
    fn next_packet(&mut self) -> Option<Packet> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let packet = Packet::new_udp(self.five_tuple, self.size_bytes, self.next_time);
        let u: f64 = self.rng.random_range(f64::EPSILON..1.0);
        let gap = (-self.mean_gap_ns * u.ln()).max(0.0).round() as u64;
        self.next_time = self.next_time.saturating_add(VirtualTime(gap));
        Some(packet)
    }
}

/// Constant rate with a bounded uniform jitter added to every gap, to
/// emulate bursty-but-bounded traffic.
pub struct SpikySource {
    five_tuple: FiveTuple,
    size_bytes: u32,
    base_gap_ns: u64,
    max_jitter_ns: u64,
    next_time: VirtualTime,
    remaining: u64,
    rng: rand::rngs::StdRng,
}

impl SpikySource {
    pub fn new(
        five_tuple: FiveTuple,
        size_bytes: u32,
        rate_bps: u64,
        max_jitter_ns: u64,
        start: VirtualTime,
        count: u64,
        seed: u64,
    ) -> SpikySource {
        use rand::SeedableRng;
        SpikySource {
            five_tuple,
            size_bytes,
            base_gap_ns: (size_bytes as u64 * 8 * 1_000_000_000) / rate_bps.max(1),
            max_jitter_ns,
            next_time: start,
            remaining: count,
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }
}

impl BulkPacketSource for SpikySource {
    fn next_packet(&mut self) -> Option<Packet> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let packet = Packet::new_udp(self.five_tuple, self.size_bytes, self.next_time);
        let jitter = super::flow::sample_jitter_ns(&mut self.rng, self.max_jitter_ns);
        self.next_time = self
            .next_time
            .saturating_add(VirtualTime(self.base_gap_ns + jitter));
        Some(packet)
    }
}

struct PendingEvent {
    time: VirtualTime,
    source_index: usize,
    packet: Packet,
}

impl PartialEq for PendingEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
    }
}
impl Eq for PendingEvent {}
impl PartialOrd for PendingEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other.time.cmp(&self.time)
    }
}

/// Merges many `BulkPacketSource`s into one non-decreasing stream by
/// always emitting whichever source's next packet is earliest.
pub struct BulkPacketGenerator {
    sources: Vec<Box<dyn BulkPacketSource>>,
    heap: BinaryHeap<PendingEvent>,
    pub default_tag: u32,
}

impl BulkPacketGenerator {
    pub fn new(sources: Vec<Box<dyn BulkPacketSource>>) -> BulkPacketGenerator {
        let mut generator = BulkPacketGenerator {
            sources,
            heap: BinaryHeap::new(),
            default_tag: netsim_types::NO_TAG,
        };
        generator.fill_initial();
        generator
    }

    fn fill_initial(&mut self) {
        for index in 0..self.sources.len() {
            self.pull_from(index);
        }
    }

    fn pull_from(&mut self, index: usize) {
        if let Some(packet) = self.sources[index].next_packet() {
            self.heap.push(PendingEvent {
                time: packet.time_sent,
                source_index: index,
                packet,
            });
        }
    }

    /// Returns the next packet in time order across all sources, tagging
    /// it with `default_tag` unless it already carries one.
    pub fn next_packet(&mut self) -> Option<Packet> {
        let event = self.heap.pop()?;
        self.pull_from(event.source_index);
        let mut packet = event.packet;
        if packet.tag == netsim_types::NO_TAG {
            packet.set_tag(self.default_tag);
        }
        Some(packet)
    }

    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> FiveTuple {
        FiveTuple {
            ip_src: 1,
            ip_dst: 2,
            ip_proto: 17,
            src_port: 1,
            dst_port: 2,
        }
    }

    #[test]
    fn merges_sources_in_time_order() {
        let a = ConstantRateSource::new(tuple(), 100, 8_000_000, VirtualTime(0), 3);
        let b = ConstantRateSource::new(tuple(), 50, 40_000_000, VirtualTime(5), 3);
        let mut gen = BulkPacketGenerator::new(vec![Box::new(a), Box::new(b)]);

        let mut times = Vec::new();
        while let Some(packet) = gen.next_packet() {
            times.push(packet.time_sent.raw());
        }
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert_eq!(times.len(), 6);
    }
}
