//! Runtime plumbing shared by the whole daemon: validated configuration,
//! the collaborator protocol seam, telemetry, and the lifecycle runner.

pub mod config;
pub mod protocol;
pub mod runner;
pub mod telemetry;
