use netsim_types::{ClockResolution, VirtualTime};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;
use tracing::warn;

/// Converts between a wall-clock duration and the virtual-time counter.
/// Picoseconds give the simulated clock sub-microsecond resolution over
/// multi-hour runs; nanoseconds are used by the real-time clock, where the
/// counter doubles as a `Duration` source.
pub fn from_nanos(resolution: ClockResolution, nanos: u64) -> VirtualTime {
    match resolution {
        ClockResolution::Picoseconds => VirtualTime(nanos.saturating_mul(1_000)),
        ClockResolution::Nanoseconds => VirtualTime(nanos),
    }
}

pub fn to_nanos(resolution: ClockResolution, t: VirtualTime) -> u64 {
    match resolution {
        ClockResolution::Picoseconds => t.raw() / 1_000,
        ClockResolution::Nanoseconds => t.raw(),
    }
}

pub fn raw_millis_to_time(resolution: ClockResolution, millis: u64) -> VirtualTime {
    from_nanos(resolution, millis.saturating_mul(1_000_000))
}

pub fn time_to_raw_millis(resolution: ClockResolution, t: VirtualTime) -> u64 {
    to_nanos(resolution, t) / 1_000_000
}

/// Dense handle for a registered event consumer. Events reference
/// consumers by this index rather than by pointer or trait object, so the
/// queue itself never needs to know what a consumer actually does — the
/// caller's dispatch loop does that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(pub usize);

struct ScheduledEvent {
    time: VirtualTime,
    seq: u64,
    consumer: ConsumerId,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the earliest time
        // first; ties broken by enqueue order (smallest seq first).
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Virtual-time min-heap scheduler. Owns no knowledge of what a consumer
/// is — it hands back a `ConsumerId` on `pop` and the caller dispatches.
/// Ties at the same time fire in enqueue order.
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    now: VirtualTime,
    stop_time: VirtualTime,
    outstanding: Vec<u64>,
    evicted: HashSet<ConsumerId>,
}

impl Default for EventQueue {
    fn default() -> Self {
        EventQueue::new()
    }
}

impl EventQueue {
    pub fn new() -> EventQueue {
        EventQueue {
            heap: BinaryHeap::new(),
            next_seq: 0,
            now: VirtualTime::ZERO,
            stop_time: VirtualTime::MAX,
            outstanding: Vec::new(),
            evicted: HashSet::new(),
        }
    }

    pub fn register_consumer(&mut self) -> ConsumerId {
        let id = ConsumerId(self.outstanding.len());
        self.outstanding.push(0);
        id
    }

    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Schedules `consumer` to fire at `at`. Fatal if `at` is in the past —
    /// the clock is monotonic and a caller that computes an earlier time
    /// has a bug.
    pub fn enqueue(&mut self, at: VirtualTime, consumer: ConsumerId) {
        assert!(at >= self.now, "event scheduled before current time");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledEvent {
            time: at,
            seq,
            consumer,
        });
        self.outstanding[consumer.0] += 1;
    }

    /// Shortens (never extends) the stop time to `now + d`.
    pub fn stop_in(&mut self, d: VirtualTime) {
        let candidate = self.now.saturating_add(d);
        if candidate < self.stop_time {
            self.stop_time = candidate;
        }
    }

    pub fn stop_time(&self) -> VirtualTime {
        self.stop_time
    }

    pub fn outstanding_count(&self, consumer: ConsumerId) -> u64 {
        self.outstanding[consumer.0]
    }

    /// Evicts a consumer: every pending event referencing it is dropped and
    /// it will never fire again. Warns if it had outstanding events, since
    /// eviction is the only form of cancellation and silently dropping
    /// scheduled work is usually a sign of a leak elsewhere.
    pub fn evict(&mut self, consumer: ConsumerId) {
        if self.outstanding[consumer.0] > 0 {
            warn!(
                outstanding = self.outstanding[consumer.0],
                "evicting consumer with outstanding events"
            );
        }
        self.evicted.insert(consumer);
        self.heap.retain(|e| e.consumer != consumer);
        self.outstanding[consumer.0] = 0;
    }

    /// Pops the next event due to fire, advancing `now` to its time.
    /// Returns `None` once the queue is empty or the next event falls
    /// beyond the configured stop time.
    pub fn pop(&mut self) -> Option<(VirtualTime, ConsumerId)> {
        loop {
            let next_time = self.heap.peek()?.time;
            if next_time > self.stop_time {
                return None;
            }
            let event = self.heap.pop().expect("just peeked");
            if self.evicted.contains(&event.consumer) {
                continue;
            }
            self.now = event.time;
            self.outstanding[event.consumer.0] -= 1;
            return Some((event.time, event.consumer));
        }
    }

    /// Drives the queue to completion, calling `dispatch` once per fired
    /// event. `dispatch` is expected to perform the consumer's work and
    /// may itself call `enqueue` on further events.
    pub fn run(&mut self, mut dispatch: impl FnMut(&mut EventQueue, VirtualTime, ConsumerId)) {
        while let Some((now, consumer)) = self.pop() {
            dispatch(self, now, consumer);
        }
    }
}

/// Sleeps between events so wall-clock time tracks virtual time. Used by a
/// real-time front end wrapped around the same `EventQueue`; the
/// simulated clock itself never sleeps.
pub struct RealTimeThrottle {
    resolution: ClockResolution,
    started_at: std::time::Instant,
    sim_start: VirtualTime,
}

impl RealTimeThrottle {
    pub fn new(resolution: ClockResolution, sim_start: VirtualTime) -> RealTimeThrottle {
        RealTimeThrottle {
            resolution,
            started_at: std::time::Instant::now(),
            sim_start,
        }
    }

    /// Blocks until wall-clock time has caught up to `target`'s virtual
    /// time, relative to when the throttle was constructed.
    pub fn wait_until(&self, target: VirtualTime) {
        let elapsed_virtual_ns = to_nanos(self.resolution, target.saturating_sub(self.sim_start));
        let target_duration = Duration::from_nanos(elapsed_virtual_ns);
        let actual_elapsed = self.started_at.elapsed();
        if let Some(remaining) = target_duration.checked_sub(actual_elapsed) {
            std::thread::sleep(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_time_then_enqueue_order() {
        let mut q = EventQueue::new();
        let a = q.register_consumer();
        let b = q.register_consumer();

        q.enqueue(VirtualTime(10), a);
        q.enqueue(VirtualTime(5), b);
        q.enqueue(VirtualTime(5), a);

        assert_eq!(q.pop(), Some((VirtualTime(5), b)));
        assert_eq!(q.pop(), Some((VirtualTime(5), a)));
        assert_eq!(q.pop(), Some((VirtualTime(10), a)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn stop_in_only_shortens() {
        let mut q = EventQueue::new();
        let a = q.register_consumer();
        q.enqueue(VirtualTime(100), a);

        q.stop_in(VirtualTime(50));
        assert_eq!(q.stop_time(), VirtualTime(50));
        q.stop_in(VirtualTime(200));
        assert_eq!(q.stop_time(), VirtualTime(50));

        assert_eq!(q.pop(), None);
    }

    #[test]
    fn eviction_drops_pending_events_for_that_consumer_only() {
        let mut q = EventQueue::new();
        let a = q.register_consumer();
        let b = q.register_consumer();
        q.enqueue(VirtualTime(1), a);
        q.enqueue(VirtualTime(2), b);

        q.evict(a);
        assert_eq!(q.pop(), Some((VirtualTime(2), b)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn outstanding_count_tracks_enqueue_and_fire() {
        let mut q = EventQueue::new();
        let a = q.register_consumer();
        assert_eq!(q.outstanding_count(a), 0);
        q.enqueue(VirtualTime(1), a);
        q.enqueue(VirtualTime(2), a);
        assert_eq!(q.outstanding_count(a), 2);
        q.pop();
        assert_eq!(q.outstanding_count(a), 1);
    }

    #[test]
    fn picosecond_and_nanosecond_conversions_round_trip() {
        let t = from_nanos(ClockResolution::Picoseconds, 5_000);
        assert_eq!(t, VirtualTime(5_000_000));
        assert_eq!(to_nanos(ClockResolution::Picoseconds, t), 5_000);

        let t = from_nanos(ClockResolution::Nanoseconds, 5_000);
        assert_eq!(t, VirtualTime(5_000));
        assert_eq!(to_nanos(ClockResolution::Nanoseconds, t), 5_000);
    }
}
