//! Per-exchange lifecycle management.
//!
//! One [`MonitorSupervisor`] per configured exchange. Supervisors never share
//! state with each other, so a broken exchange cannot stall another.

mod supervisor;

pub use supervisor::{MonitorSupervisor, ShutdownReport, SupervisorConfig};
