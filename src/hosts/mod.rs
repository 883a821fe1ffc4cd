// src/hosts/mod.rs

pub mod host;
pub mod registry;
pub mod report;
pub mod schedule;

pub use host::{Host, Reservation, Resource};
pub use registry::{DEAD_AFTER_SECS, DEAD_PROBE_SECS, HostRegistry, PING_QUIET_SECS, PingOutcome};
pub use report::HostReport;
pub use schedule::{AvailWindow, WeeklySchedule};
