//! Risk limit monitoring.
//!
//! Evaluates a user's enabled limits against current metrics and produces
//! tiered alerts. Pure in-memory logic: callers load the limits, persist the
//! alerts, and fan them out.

pub mod error;
pub mod monitor;

pub use error::RiskError;
pub use monitor::RiskMonitor;
