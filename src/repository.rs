//! Single entry point for signal data: remote fetches reconciled into the
//! local store, local queries and followed-signal lifecycle.
//!
//! Every fallible operation returns [`RepositoryError`]; nothing panics across
//! this boundary. A remote result is persisted before it is returned, so the
//! caller always sees exactly what the store holds.

use crate::db::{FollowedFilter, LocalStore, SignalFilter, StoreChange};
use crate::error::{ApiError, RepositoryError};
use crate::models::{
    ApiResponse, CloseOutcome, ExitReason, FollowSignalRequest,
    FollowedSignal, MarketData, MarketType, NewFollowedSignal, OppositeSignalDetection,
    RemoteFollowedSignal, ScanRequest, ScanResponse, Signal, SignalDirection, Statistics,
    UserConfig,
};
use crate::services::SignalApi;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct SignalRepository {
    store: Arc<dyn LocalStore>,
    api: Arc<dyn SignalApi>,
    user_id: Option<i64>,
}

/// Map a transport-level result and then the envelope into the repository
/// taxonomy.
fn unwrap_envelope<T>(
    operation: &str,
    result: Result<ApiResponse<T>, ApiError>,
) -> Result<T, RepositoryError> {
    let envelope = result.map_err(|e| {
        warn!(operation = %operation, error = %e, "SignalRepository: {} failed", operation);
        RepositoryError::from(e)
    })?;
    envelope.into_data().map_err(|message| {
        warn!(operation = %operation, error = %message, "SignalRepository: {} rejected", operation);
        RepositoryError::Remote(message)
    })
}

impl SignalRepository {
    pub fn new(store: Arc<dyn LocalStore>, api: Arc<dyn SignalApi>) -> Self {
        Self {
            store,
            api,
            user_id: None,
        }
    }

    /// Account id sent with remote follow requests
    pub fn with_user_id(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    // ---- scan and sync ----

    /// Run a scan and persist every returned signal as one batch.
    ///
    /// The returned response carries the signals as stored (ids assigned).
    pub async fn perform_scan(&self, request: &ScanRequest) -> Result<ScanResponse, RepositoryError> {
        let mut response = self.api.scan(request).await.map_err(|e| {
            warn!(error = %e, timeframe = %request.timeframe, "SignalRepository: scan failed");
            RepositoryError::from(e)
        })?;

        if !response.success {
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| "Scan failed".to_string());
            warn!(error = %message, "SignalRepository: scan rejected");
            return Err(RepositoryError::Remote(message));
        }

        if !response.signals.is_empty() {
            response.signals = self.store.upsert_signals(&response.signals).await?;
        }

        info!(
            signals = response.signals.len(),
            symbols_scanned = response.total_symbols_scanned,
            scan_time = response.scan_time_seconds,
            "SignalRepository: scan stored {} signals",
            response.signals.len()
        );
        Ok(response)
    }

    /// Pull signals generated in the last `hours` and persist them.
    pub async fn sync_signals(&self, hours: u32) -> Result<Vec<Signal>, RepositoryError> {
        let signals = unwrap_envelope("sync_signals", self.api.recent_signals(hours).await)?;
        if signals.is_empty() {
            return Ok(signals);
        }
        let stored = self.store.upsert_signals(&signals).await?;
        info!(count = stored.len(), hours = hours, "SignalRepository: synced {} signals", stored.len());
        Ok(stored)
    }

    // ---- signal queries ----

    pub async fn signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>, RepositoryError> {
        Ok(self.store.list_signals(filter).await?)
    }

    pub async fn all_signals(&self) -> Result<Vec<Signal>, RepositoryError> {
        self.signals(&SignalFilter::All).await
    }

    pub async fn favorite_signals(&self) -> Result<Vec<Signal>, RepositoryError> {
        self.signals(&SignalFilter::Favorites).await
    }

    pub async fn signals_by_market(&self, market: MarketType) -> Result<Vec<Signal>, RepositoryError> {
        self.signals(&SignalFilter::Market(market)).await
    }

    pub async fn signals_by_strategy(&self, strategy: &str) -> Result<Vec<Signal>, RepositoryError> {
        self.signals(&SignalFilter::Strategy(strategy.to_string())).await
    }

    pub async fn signals_by_direction(
        &self,
        direction: SignalDirection,
    ) -> Result<Vec<Signal>, RepositoryError> {
        self.signals(&SignalFilter::Direction(direction)).await
    }

    pub async fn signals_since(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, RepositoryError> {
        self.signals(&SignalFilter::Since(since)).await
    }

    pub async fn search_signals(&self, query: &str) -> Result<Vec<Signal>, RepositoryError> {
        self.signals(&SignalFilter::Search(query.to_string())).await
    }

    pub async fn signal(&self, id: i64) -> Result<Signal, RepositoryError> {
        self.store
            .get_signal(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("Signal {}", id)))
    }

    pub async fn unread_count(&self) -> Result<usize, RepositoryError> {
        Ok(self.store.unread_count().await?)
    }

    pub async fn mark_signal_read(&self, id: i64) -> Result<(), RepositoryError> {
        Ok(self.store.mark_signal_read(id).await?)
    }

    pub async fn toggle_favorite(&self, id: i64, favorite: bool) -> Result<(), RepositoryError> {
        Ok(self.store.set_favorite(id, favorite).await?)
    }

    pub async fn delete_signal(&self, id: i64) -> Result<(), RepositoryError> {
        self.store.delete_signal(id).await?;
        debug!(signal_id = id, "SignalRepository: deleted signal {}", id);
        Ok(())
    }

    pub async fn delete_all_signals(&self) -> Result<usize, RepositoryError> {
        let count = self.store.delete_all_signals().await?;
        info!(count = count, "SignalRepository: deleted {} signals", count);
        Ok(count)
    }

    // ---- market data ----

    pub async fn fetch_market_data(
        &self,
        symbols: Option<&[String]>,
    ) -> Result<Vec<MarketData>, RepositoryError> {
        let data = unwrap_envelope("fetch_market_data", self.api.market_data(symbols).await)?;
        if !data.is_empty() {
            self.store.upsert_market_data(&data).await?;
        }
        debug!(count = data.len(), "SignalRepository: stored {} market snapshots", data.len());
        Ok(data)
    }

    pub async fn current_price(&self, symbol: &str) -> Result<MarketData, RepositoryError> {
        let data = unwrap_envelope("current_price", self.api.current_price(symbol).await)?;
        self.store
            .upsert_market_data(std::slice::from_ref(&data))
            .await?;
        debug!(symbol = %symbol, price = data.price, "SignalRepository: stored price for {}", symbol);
        Ok(data)
    }

    pub async fn all_market_data(&self) -> Result<Vec<MarketData>, RepositoryError> {
        Ok(self.store.list_market_data(None).await?)
    }

    pub async fn market_data_by_type(
        &self,
        market: MarketType,
    ) -> Result<Vec<MarketData>, RepositoryError> {
        Ok(self.store.list_market_data(Some(market)).await?)
    }

    pub async fn search_market_data(
        &self,
        query: &str,
    ) -> Result<Vec<MarketData>, RepositoryError> {
        Ok(self.store.search_market_data(query).await?)
    }

    pub async fn purge_market_data_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let purged = self.store.purge_market_data_before(cutoff).await?;
        if purged > 0 {
            info!(purged = purged, cutoff = %cutoff, "SignalRepository: purged {} market snapshots", purged);
        }
        Ok(purged)
    }

    // ---- followed signals ----

    /// Start following a stored signal.
    ///
    /// Fails with [`RepositoryError::DuplicateFollow`] while an active record
    /// for the same signal exists.
    pub async fn follow_signal(&self, signal: &Signal) -> Result<FollowedSignal, RepositoryError> {
        let signal_id = signal.id.ok_or_else(|| {
            RepositoryError::NotFound(format!("Signal {} has not been stored", signal.symbol))
        })?;

        if self.store.follow_active(signal_id).await?.is_some() {
            warn!(signal_id = signal_id, "SignalRepository: signal {} already followed", signal_id);
            return Err(RepositoryError::DuplicateFollow(signal_id));
        }

        let entity = NewFollowedSignal::from_signal(signal, Utc::now()).ok_or_else(|| {
            RepositoryError::NotFound(format!("Signal {} has not been stored", signal_id))
        })?;
        let id = self.store.insert_followed(entity).await?;
        let followed = self
            .store
            .get_followed(id)
            .await?
            .ok_or_else(|| RepositoryError::Persistence(format!("Followed signal {} vanished after insert", id)))?;

        info!(
            followed_id = id,
            signal_id = signal_id,
            symbol = %followed.symbol,
            strategy = %followed.strategy,
            direction = %followed.direction,
            "SignalRepository: following {} {} {}",
            followed.symbol,
            followed.strategy,
            followed.direction
        );
        Ok(followed)
    }

    pub async fn follow_signal_by_id(&self, signal_id: i64) -> Result<FollowedSignal, RepositoryError> {
        let signal = self.signal(signal_id).await?;
        self.follow_signal(&signal).await
    }

    /// Close an active followed signal. A second close is a no-op that
    /// returns the record as first closed.
    pub async fn stop_following(
        &self,
        followed_id: i64,
        reason: ExitReason,
        exit_price: Option<f64>,
    ) -> Result<FollowedSignal, RepositoryError> {
        let outcome = self
            .store
            .close_followed(followed_id, Utc::now(), reason, exit_price)
            .await?;
        if let CloseOutcome::Closed(record) = &outcome {
            info!(
                followed_id = followed_id,
                symbol = %record.symbol,
                reason = %reason,
                "SignalRepository: stopped following {} ({})",
                record.symbol,
                reason
            );
        }
        Ok(outcome.into_record())
    }

    pub async fn followed_signal(&self, id: i64) -> Result<FollowedSignal, RepositoryError> {
        self.store
            .get_followed(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("FollowedSignal {}", id)))
    }

    pub async fn active_followed_signals(&self) -> Result<Vec<FollowedSignal>, RepositoryError> {
        Ok(self.store.list_followed(&FollowedFilter::Active).await?)
    }

    pub async fn all_followed_signals(&self) -> Result<Vec<FollowedSignal>, RepositoryError> {
        Ok(self.store.list_followed(&FollowedFilter::All).await?)
    }

    pub async fn followed_with_opposite_signal(&self) -> Result<Vec<FollowedSignal>, RepositoryError> {
        Ok(self.store.list_followed(&FollowedFilter::OppositeDetected).await?)
    }

    pub async fn followed_for(
        &self,
        symbol: &str,
        strategy: &str,
    ) -> Result<Vec<FollowedSignal>, RepositoryError> {
        let filter = FollowedFilter::SymbolStrategy {
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
        };
        Ok(self.store.list_followed(&filter).await?)
    }

    pub async fn is_following(&self, signal_id: i64) -> Result<bool, RepositoryError> {
        Ok(self.store.is_following(signal_id).await?)
    }

    pub async fn active_followed_count(&self) -> Result<usize, RepositoryError> {
        Ok(self.store.active_followed_count().await?)
    }

    /// Set the opposite-signal latch. `true` only for the call that set it.
    pub async fn mark_opposite_signal_detected(
        &self,
        followed_id: i64,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .store
            .mark_opposite_detected(followed_id, price, time)
            .await?)
    }

    pub async fn clear_inactive_followed(&self) -> Result<usize, RepositoryError> {
        let deleted = self.store.delete_inactive_followed().await?;
        info!(deleted = deleted, "SignalRepository: cleared {} inactive followed signals", deleted);
        Ok(deleted)
    }

    // ---- remote account and service endpoints ----

    pub async fn scan_status(&self) -> Result<Statistics, RepositoryError> {
        unwrap_envelope("scan_status", self.api.scan_status().await)
    }

    pub async fn statistics(&self) -> Result<Statistics, RepositoryError> {
        unwrap_envelope("statistics", self.api.statistics().await)
    }

    pub async fn user_config(&self) -> Result<UserConfig, RepositoryError> {
        unwrap_envelope("user_config", self.api.user_config().await)
    }

    pub async fn update_user_config(&self, config: &UserConfig) -> Result<UserConfig, RepositoryError> {
        unwrap_envelope("update_user_config", self.api.update_user_config(config).await)
    }

    /// `Ok(true)` when the service answered with a success envelope,
    /// `Ok(false)` when it answered with anything else.
    pub async fn check_api_health(&self) -> Result<bool, RepositoryError> {
        match self.api.health().await {
            Ok(envelope) => Ok(envelope.success),
            Err(ApiError::Transport(message)) => Err(RepositoryError::Transport(message)),
            Err(e) => {
                debug!(error = %e, "SignalRepository: health check unhealthy");
                Ok(false)
            }
        }
    }

    pub async fn remote_followed(
        &self,
        active_only: bool,
    ) -> Result<Vec<RemoteFollowedSignal>, RepositoryError> {
        unwrap_envelope("remote_followed", self.api.followed(active_only).await)
    }

    pub async fn remote_follow(&self, signal: &Signal) -> Result<RemoteFollowedSignal, RepositoryError> {
        let signal_id = signal.id.ok_or_else(|| {
            RepositoryError::NotFound(format!("Signal {} has not been stored", signal.symbol))
        })?;
        let user_id = self.user_id.ok_or_else(|| {
            RepositoryError::Remote("No user id configured for remote follow".to_string())
        })?;
        let request = FollowSignalRequest::for_signal(signal_id, user_id, signal);
        unwrap_envelope("remote_follow", self.api.follow(&request).await)
    }

    pub async fn remote_unfollow(
        &self,
        followed_id: i64,
        reason: ExitReason,
        exit_price: Option<f64>,
    ) -> Result<String, RepositoryError> {
        unwrap_envelope(
            "remote_unfollow",
            self.api.unfollow(followed_id, reason, exit_price).await,
        )
    }

    pub async fn check_opposite_signals_remote(
        &self,
    ) -> Result<Vec<OppositeSignalDetection>, RepositoryError> {
        unwrap_envelope("check_opposite_signals_remote", self.api.check_opposite().await)
    }
}
