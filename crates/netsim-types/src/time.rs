use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A point (or duration) on the simulator's monotonically non-decreasing
/// virtual clock. The unit the counter is measured in (picoseconds for the
/// simulated clock, nanoseconds for the real-time clock) is a property of
/// the `EventQueue` that produced it, not of the value itself — see
/// `netsim_core::queue::Clock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct VirtualTime(pub u64);

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime(0);
    /// Sentinel meaning "never" — used for unreachable distances and closed
    /// deadlines.
    pub const MAX: VirtualTime = VirtualTime(u64::MAX);

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, rhs: VirtualTime) -> VirtualTime {
        VirtualTime(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: VirtualTime) -> VirtualTime {
        VirtualTime(self.0.saturating_sub(rhs.0))
    }

    pub fn is_never(self) -> bool {
        self == VirtualTime::MAX
    }
}

impl Add for VirtualTime {
    type Output = VirtualTime;
    fn add(self, rhs: VirtualTime) -> VirtualTime {
        self.saturating_add(rhs)
    }
}

impl Sub for VirtualTime {
    type Output = VirtualTime;
    fn sub(self, rhs: VirtualTime) -> VirtualTime {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "never")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
