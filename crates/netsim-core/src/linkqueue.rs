use crate::queue::{ConsumerId, EventQueue};
use netsim_types::{ClockResolution, Packet, VirtualTime};
use rand::Rng;
use std::collections::VecDeque;

/// Bandwidth-limited FIFO buffer. Drains at a fixed rate; a packet that
/// doesn't fit under `max_size_bytes` is dropped on arrival rather than
/// queued. Drain time per packet is `8 * size_bytes * time_per_bit`, with
/// `time_per_bit` precomputed from the rate and the clock resolution so
/// the per-packet drain path never divides.
pub struct FifoQueue {
    resolution: ClockResolution,
    consumer: ConsumerId,
    rate_bps: u64,
    time_per_bit_ns: f64,
    max_size_bytes: u64,
    backlog: VecDeque<Packet>,
    occupancy_bytes: u64,
    draining: bool,
    pub packets_dropped: u64,
    pub bytes_dropped: u64,
}

fn time_per_bit_ns(rate_bps: u64) -> f64 {
    assert!(rate_bps > 0, "queue rate must be positive");
    1_000_000_000.0 / rate_bps as f64
}

impl FifoQueue {
    pub fn new(
        resolution: ClockResolution,
        rate_bps: u64,
        max_size_bytes: u64,
        consumer: ConsumerId,
    ) -> FifoQueue {
        FifoQueue {
            resolution,
            consumer,
            rate_bps,
            time_per_bit_ns: time_per_bit_ns(rate_bps),
            max_size_bytes,
            backlog: VecDeque::new(),
            occupancy_bytes: 0,
            draining: false,
            packets_dropped: 0,
            bytes_dropped: 0,
        }
    }

    pub fn occupancy_bytes(&self) -> u64 {
        self.occupancy_bytes
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn set_rate(&mut self, new_rate_bps: u64) {
        assert!(new_rate_bps > 0, "queue rate must remain strictly positive");
        self.rate_bps = new_rate_bps;
        self.time_per_bit_ns = time_per_bit_ns(new_rate_bps);
    }

    fn drain_duration(&self, packet: &Packet) -> VirtualTime {
        let nanos = 8.0 * packet.size_bytes() as f64 * self.time_per_bit_ns;
        crate::queue::from_nanos(self.resolution, nanos.round() as u64)
    }

    /// Decides whether to admit the packet; subclasses (the RED-like
    /// queue) override this decision, everything else about enqueue is
    /// shared.
    fn should_admit(&mut self, packet: &Packet) -> bool {
        self.occupancy_bytes + packet.size_bytes() as u64 <= self.max_size_bytes
    }

    pub fn enqueue(&mut self, packet: Packet, events: &mut EventQueue) {
        if !self.should_admit(&packet) {
            self.packets_dropped += 1;
            self.bytes_dropped += packet.size_bytes() as u64;
            return;
        }

        self.occupancy_bytes += packet.size_bytes() as u64;
        let was_empty = self.backlog.is_empty();
        self.backlog.push_back(packet);

        if was_empty && !self.draining {
            self.schedule_drain(events);
        }
    }

    fn schedule_drain(&mut self, events: &mut EventQueue) {
        let Some(head) = self.backlog.front() else {
            return;
        };
        let fire_at = events.now().saturating_add(self.drain_duration(head));
        events.enqueue(fire_at, self.consumer);
        self.draining = true;
    }

    /// Called when the drain event fires: emits the head packet and, if
    /// more remain, schedules the next drain.
    pub fn drain_fired(&mut self, events: &mut EventQueue) -> Option<Packet> {
        self.draining = false;
        let packet = self.backlog.pop_front()?;
        self.occupancy_bytes -= packet.size_bytes() as u64;
        if !self.backlog.is_empty() {
            self.schedule_drain(events);
        }
        Some(packet)
    }
}

/// A RED-like queue: above `drop_threshold` bytes, newly arriving packets
/// are dropped with probability scaling linearly up to `max_size_bytes`,
/// where the drop becomes unconditional.
pub struct RandomQueue {
    inner: FifoQueue,
    drop_threshold_bytes: u64,
    rng: rand::rngs::StdRng,
}

impl RandomQueue {
    pub fn new(
        resolution: ClockResolution,
        rate_bps: u64,
        max_size_bytes: u64,
        drop_threshold_bytes: u64,
        seed: u64,
        consumer: ConsumerId,
    ) -> RandomQueue {
        use rand::SeedableRng;
        assert!(drop_threshold_bytes <= max_size_bytes);
        RandomQueue {
            inner: FifoQueue::new(resolution, rate_bps, max_size_bytes, consumer),
            drop_threshold_bytes,
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }

    pub fn occupancy_bytes(&self) -> u64 {
        self.inner.occupancy_bytes()
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.inner.max_size_bytes()
    }

    pub fn packets_dropped(&self) -> u64 {
        self.inner.packets_dropped
    }

    pub fn set_rate(&mut self, new_rate_bps: u64) {
        self.inner.set_rate(new_rate_bps);
    }

    pub fn enqueue(&mut self, packet: Packet, events: &mut EventQueue) {
        let post_occupancy = self.inner.occupancy_bytes + packet.size_bytes() as u64;
        if post_occupancy > self.inner.max_size_bytes {
            self.inner.packets_dropped += 1;
            self.inner.bytes_dropped += packet.size_bytes() as u64;
            return;
        }
        if post_occupancy > self.drop_threshold_bytes {
            let span = (self.inner.max_size_bytes - self.drop_threshold_bytes).max(1) as f64;
            let p = (post_occupancy - self.drop_threshold_bytes) as f64 / span;
            if self.rng.random::<f64>() < p {
                self.inner.packets_dropped += 1;
                self.inner.bytes_dropped += packet.size_bytes() as u64;
                return;
            }
        }
        self.inner.enqueue(packet, events);
    }

    pub fn drain_fired(&mut self, events: &mut EventQueue) -> Option<Packet> {
        self.inner.drain_fired(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_types::FiveTuple;

    fn udp(size: u32, now: VirtualTime) -> Packet {
        Packet::new_udp(
            FiveTuple {
                ip_src: 1,
                ip_dst: 2,
                ip_proto: 17,
                src_port: 1,
                dst_port: 2,
            },
            size,
            now,
        )
    }

    #[test]
    fn occupancy_never_exceeds_max_size() {
        let mut events = EventQueue::new();
        let consumer = events.register_consumer();
        let mut q = FifoQueue::new(ClockResolution::Nanoseconds, 10_000_000, 1_000, consumer);

        for _ in 0..20 {
            q.enqueue(udp(100, events.now()), &mut events);
            assert!(q.occupancy_bytes() <= q.max_size_bytes());
        }
        assert!(q.packets_dropped > 0);
    }

    #[test]
    fn drains_at_configured_rate() {
        let mut events = EventQueue::new();
        let consumer = events.register_consumer();
        // 10 Mbps => 100 bytes takes 80 microseconds = 80_000 ns.
        let mut q = FifoQueue::new(ClockResolution::Nanoseconds, 10_000_000, 10_000, consumer);
        q.enqueue(udp(100, events.now()), &mut events);

        let (fire_time, _) = events.pop().unwrap();
        assert_eq!(fire_time, VirtualTime(80_000));
        let packet = q.drain_fired(&mut events).unwrap();
        assert_eq!(packet.size_bytes(), 100);
        assert_eq!(q.occupancy_bytes(), 0);
    }
}
