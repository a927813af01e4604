//! Instance orchestration.
//!
//! Covers agent command construction, the instance lifecycle manager and
//! the periodic status monitor.

pub mod launch;
pub mod manager;
pub mod status_monitor;
