pub mod config;
pub mod packet;
pub mod rule;
pub mod scenario;
pub mod time;

pub use config::{ClockResolution, SimulatorConfig, SimulatorConfigOverride};
pub use packet::{sscp, tcp_flags, ControlMessage, FiveTuple, Packet, PacketKind, INITIAL_TTL, NO_TAG};
pub use rule::{ActionStats, FiveTupleMatch, ForwardingRule, RuleAction, RuleKey, KEEP_TAG, WILD, WILD_PORT, WILD_PROTO};
pub use scenario::{BulkSourceKind, LinkDef, Scenario, ScenarioAction, ScenarioAssertion, TopologyDef};
pub use time::VirtualTime;
