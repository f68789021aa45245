use netsim_types::VirtualTime;

/// One key frame in a constant-rate flow's timeline: the rate in effect
/// from `at` onward.
#[derive(Debug, Clone, Copy)]
pub struct RateKeyFrame {
    pub at: VirtualTime,
    pub rate_bps: u64,
}

/// A request to add `bytes` to a connection's send buffer at `at`.
/// `close` marks the connection's final event.
#[derive(Debug, Clone, Copy)]
pub struct AddDataEvent {
    pub at: VirtualTime,
    pub bytes: u64,
    pub close: bool,
}

impl AddDataEvent {
    /// Sentinel meaning "no more events" — never actually reached.
    pub const NEVER: AddDataEvent = AddDataEvent {
        at: VirtualTime::MAX,
        bytes: 0,
        close: false,
    };
}

/// Produces `AddDataEvent`s independent of any connection feedback; the
/// whole timeline can be precomputed ahead of time.
pub trait IndependentFlowDriver {
    fn next(&mut self) -> AddDataEvent;
}

/// Fixed packet size, variable inter-packet gap driven by rate key frames.
pub struct ConstantRateFlowDriver {
    packet_size_bytes: u32,
    second: u64,
    key_frames: Vec<RateKeyFrame>,
    next_key_frame_index: usize,
    curr_time: VirtualTime,
    curr_rate_bps: u64,
}

impl ConstantRateFlowDriver {
    pub fn new(packet_size_bytes: u32, second: u64, start: VirtualTime) -> ConstantRateFlowDriver {
        ConstantRateFlowDriver {
            packet_size_bytes,
            second,
            key_frames: Vec::new(),
            next_key_frame_index: 0,
            curr_time: start,
            curr_rate_bps: 0,
        }
    }

    pub fn add_rate_change_keyframes(&mut self, mut frames: Vec<RateKeyFrame>) {
        self.key_frames.append(&mut frames);
        self.key_frames.sort_by_key(|f| f.at);
    }

    fn inter_packet_gap(&self) -> u64 {
        if self.curr_rate_bps == 0 {
            return u64::MAX;
        }
        let bits = self.packet_size_bytes as u64 * 8;
        (bits * self.second) / self.curr_rate_bps
    }
}

impl IndependentFlowDriver for ConstantRateFlowDriver {
    fn next(&mut self) -> AddDataEvent {
        while let Some(frame) = self.key_frames.get(self.next_key_frame_index) {
            if frame.at > self.curr_time {
                break;
            }
            self.curr_rate_bps = frame.rate_bps;
            self.next_key_frame_index += 1;
        }
        if self.curr_rate_bps == 0 {
            return AddDataEvent::NEVER;
        }
        let gap = self.inter_packet_gap();
        self.curr_time = self.curr_time.saturating_add(VirtualTime(gap));
        AddDataEvent {
            at: self.curr_time,
            bytes: self.packet_size_bytes as u64,
            close: false,
        }
    }
}

/// Samples a uniform random jitter in `[0, max_ns)`, used by spiky bulk
/// sources; kept here since it shares the flow-timeline vocabulary.
pub fn sample_jitter_ns(rng: &mut rand::rngs::StdRng, max_ns: u64) -> u64 {
    if max_ns == 0 {
        0
    } else {
        use rand::Rng;
        rng.random_range(0..max_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_change_keyframe_takes_effect_immediately() {
        let mut driver = ConstantRateFlowDriver::new(100, 1_000_000_000, VirtualTime(0));
        assert_eq!(driver.next().at, AddDataEvent::NEVER.at);

        driver.add_rate_change_keyframes(vec![RateKeyFrame {
            at: VirtualTime(0),
            rate_bps: 8_000,
        }]);
        let event = driver.next();
        assert_eq!(event.bytes, 100);
        assert_eq!(event.at, VirtualTime(100_000_000));
    }
}
