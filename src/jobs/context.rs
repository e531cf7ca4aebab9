//! Dependencies handed to the monitor cycle

use crate::metrics::Metrics;
use crate::repository::SignalRepository;
use crate::services::Notifier;
use std::sync::Arc;

/// Built once at startup and shared by every cycle.
///
/// Metrics are optional so tests can run cycles without a registry.
pub struct MonitorContext {
    pub repository: Arc<SignalRepository>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Option<Arc<Metrics>>,
}

impl MonitorContext {
    pub fn new(
        repository: Arc<SignalRepository>,
        notifier: Arc<dyn Notifier>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            repository,
            notifier,
            metrics,
        }
    }
}
