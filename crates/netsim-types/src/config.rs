use serde::{Deserialize, Serialize};

/// Which unit the event queue's virtual-time counter is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockResolution {
    /// Simulated mode: sub-microsecond resolution over multi-hour runs.
    Picoseconds,
    /// Real-time mode: the counter tracks wall-clock nanoseconds.
    Nanoseconds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub clock_resolution: ClockResolution,
    pub default_mss_bytes: u32,
    pub rto_floor_ns: u64,
    pub rto_ceiling_ns: u64,
    pub initial_rto_ns: u64,
    /// Denominator for per-action Bernoulli sampling (1/N). Zero disables
    /// sampling entirely.
    pub sample_denominator: u32,
    pub seed: u64,
    /// When set, any packet that fails to match at a device aborts the
    /// simulation instead of being counted as dropped.
    pub die_on_failed_match: bool,
    /// Overrides the event queue's stop time, in nanoseconds.
    pub stop_time_override_ns: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            clock_resolution: ClockResolution::Picoseconds,
            default_mss_bytes: 1460,
            rto_floor_ns: 200_000_000,
            rto_ceiling_ns: 2_000_000_000,
            initial_rto_ns: 2_000_000_000,
            sample_denominator: 0,
            seed: 0,
            die_on_failed_match: false,
            stop_time_override_ns: None,
        }
    }
}

/// A scenario-file overlay over `SimulatorConfig`; only the fields present
/// in the file are patched in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulatorConfigOverride {
    pub default_mss_bytes: Option<u32>,
    pub rto_floor_ns: Option<u64>,
    pub rto_ceiling_ns: Option<u64>,
    pub sample_denominator: Option<u32>,
    pub seed: Option<u64>,
    pub die_on_failed_match: Option<bool>,
    pub stop_time_override_ns: Option<u64>,
}

impl SimulatorConfigOverride {
    pub fn apply_to(&self, config: &mut SimulatorConfig) {
        if let Some(v) = self.default_mss_bytes {
            config.default_mss_bytes = v;
        }
        if let Some(v) = self.rto_floor_ns {
            config.rto_floor_ns = v;
        }
        if let Some(v) = self.rto_ceiling_ns {
            config.rto_ceiling_ns = v;
        }
        if let Some(v) = self.sample_denominator {
            config.sample_denominator = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.die_on_failed_match {
            config.die_on_failed_match = v;
        }
        if let Some(v) = self.stop_time_override_ns {
            config.stop_time_override_ns = Some(v);
        }
    }
}
