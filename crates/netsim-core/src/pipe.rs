use crate::queue::{ConsumerId, EventQueue};
use netsim_types::{Packet, VirtualTime};
use std::collections::VecDeque;

/// Models pure propagation delay: every packet admitted at `now` is handed
/// to the downstream end at `now + delay`, in FIFO order, with no loss.
/// Since delay is constant, arrival order always matches admission order,
/// so the backlog itself doesn't need to carry timestamps — only the
/// event queue does.
pub struct Pipe {
    pub delay: VirtualTime,
    consumer: ConsumerId,
    backlog: VecDeque<Packet>,
    bytes_in_flight: u64,
    pub bytes_tx: u64,
    pub packets_tx: u64,
}

impl Pipe {
    pub fn new(delay: VirtualTime, consumer: ConsumerId) -> Pipe {
        assert!(delay.raw() > 0, "pipe delay must be positive");
        Pipe {
            delay,
            consumer,
            backlog: VecDeque::new(),
            bytes_in_flight: 0,
            bytes_tx: 0,
            packets_tx: 0,
        }
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    pub fn packets_in_flight(&self) -> usize {
        self.backlog.len()
    }

    /// Admits a packet, scheduling its arrival event. Pipes never drop.
    pub fn admit(&mut self, packet: Packet, events: &mut EventQueue) {
        self.bytes_in_flight += packet.size_bytes() as u64;
        let arrival = events.now().saturating_add(self.delay);
        self.backlog.push_back(packet);
        events.enqueue(arrival, self.consumer);
    }

    /// Called when this pipe's consumer event fires: releases the packet
    /// at the head of the backlog to the caller, which is responsible for
    /// handing it to the downstream port.
    pub fn pop_arrived(&mut self) -> Option<Packet> {
        let packet = self.backlog.pop_front()?;
        self.bytes_in_flight -= packet.size_bytes() as u64;
        self.bytes_tx += packet.size_bytes() as u64;
        self.packets_tx += 1;
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_types::FiveTuple;

    fn five_tuple() -> FiveTuple {
        FiveTuple {
            ip_src: 1,
            ip_dst: 2,
            ip_proto: 17,
            src_port: 1,
            dst_port: 2,
        }
    }

    #[test]
    fn emits_shifted_by_exactly_delay() {
        let mut events = EventQueue::new();
        let consumer = events.register_consumer();
        let mut pipe = Pipe::new(VirtualTime(100), consumer);

        pipe.admit(Packet::new_udp(five_tuple(), 10, events.now()), &mut events);
        let (fire_time, fired_consumer) = events.pop().unwrap();
        assert_eq!(fire_time, VirtualTime(100));
        assert_eq!(fired_consumer, consumer);

        let packet = pipe.pop_arrived().unwrap();
        assert_eq!(packet.size_bytes(), 10);
        assert_eq!(pipe.bytes_in_flight(), 0);
    }

    #[test]
    fn never_drops_and_accounts_bytes_in_flight() {
        let mut events = EventQueue::new();
        let consumer = events.register_consumer();
        let mut pipe = Pipe::new(VirtualTime(50), consumer);

        for _ in 0..5 {
            pipe.admit(Packet::new_udp(five_tuple(), 20, events.now()), &mut events);
        }
        assert_eq!(pipe.bytes_in_flight(), 100);
        assert_eq!(pipe.packets_in_flight(), 5);
    }
}
