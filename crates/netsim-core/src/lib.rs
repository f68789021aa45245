pub mod connection;
pub mod device;
pub mod drivers;
pub mod linkqueue;
pub mod pipe;
pub mod queue;
pub mod simulator;
pub mod tcp;

pub use device::{Device, DeviceCounters};
pub use simulator::Simulator;
