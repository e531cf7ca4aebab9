//! Process-wide component wiring
//!
//! Store, client, repository, notifier, monitor and scheduler are built once
//! here and passed by `Arc` to whoever needs them.

use crate::config::Config;
use crate::core::scheduler::MonitorScheduler;
use crate::db::{InMemoryStore, LocalStore, PostgresStore};
use crate::jobs::{MonitorContext, SignalMonitor};
use crate::metrics::Metrics;
use crate::repository::SignalRepository;
use crate::services::{HttpSignalApi, LogNotifier, Notifier, SignalApi};
use std::sync::Arc;
use tracing::{info, warn};

pub struct AppRuntime {
    pub config: Config,
    pub metrics: Arc<Metrics>,
    pub repository: Arc<SignalRepository>,
    pub monitor: Arc<SignalMonitor>,
    pub scheduler: Arc<MonitorScheduler>,
}

impl AppRuntime {
    /// Connect the configured store and remote client.
    ///
    /// Without `DATABASE_URL` the store is in-memory.
    pub async fn init(config: Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let metrics = Arc::new(
            Metrics::new().map_err(|e| format!("Failed to create metrics registry: {}", e))?,
        );

        let store: Arc<dyn LocalStore> = match &config.database_url {
            Some(url) => {
                info!("Initializing PostgreSQL connection...");
                let store = PostgresStore::connect(url).await.map_err(|e| {
                    warn!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                info!("PostgreSQL connected");
                metrics.database_connected.set(1.0);
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory store");
                metrics.database_connected.set(0.0);
                Arc::new(InMemoryStore::new())
            }
        };

        let api: Arc<dyn SignalApi> = Arc::new(HttpSignalApi::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
            config.http_timeout,
        )?);
        info!(base_url = %config.api_base_url, "Signal API client ready");

        Self::assemble(config, store, api, Arc::new(LogNotifier), metrics)
    }

    /// Wire already-built components together.
    pub fn assemble(
        config: Config,
        store: Arc<dyn LocalStore>,
        api: Arc<dyn SignalApi>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let repository = Arc::new(SignalRepository::new(store, api).with_user_id(config.user_id));
        let context = Arc::new(MonitorContext::new(
            repository.clone(),
            notifier,
            Some(metrics.clone()),
        ));
        let monitor = Arc::new(SignalMonitor::new(context, &config.monitor));
        let scheduler = Arc::new(MonitorScheduler::new(
            monitor.clone(),
            repository.clone(),
            &config.monitor,
        )?);

        Ok(Self {
            config,
            metrics,
            repository,
            monitor,
            scheduler,
        })
    }
}
