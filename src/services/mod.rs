pub mod delivery;
pub mod poll_cycle;

pub use delivery::DeliveryEngine;
pub use poll_cycle::{CycleReport, PollCycle, PollSettings};
