//! Outcome → vote attribution

pub mod attributor;

pub use attributor::{records_for, PerformanceAttributor};
