//! Opposite-signal monitor cycle

pub mod context;
pub mod monitor;
pub mod types;

pub use context::MonitorContext;
pub use monitor::SignalMonitor;
pub use types::{CycleOutcome, CycleReport, Detection, RecordFailure};
