//! Local durable store for signals, market data and followed signals.
//!
//! Invariants on followed signals are checked by the store implementations at
//! write time:
//! - at most one active record per originating signal id
//! - the opposite-signal latch is set once and never cleared while active
//! - closing is a compare-and-swap on `is_active`

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use crate::error::StoreError;
use crate::models::{
    CloseOutcome, ExitReason, FollowedSignal, MarketData, MarketType, NewFollowedSignal, Signal,
    SignalDirection,
};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Which row set changed. Subscribers re-query the shapes they care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Signals,
    MarketData,
    FollowedSignals,
}

pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Signal query shapes, all ordered by creation time descending
#[derive(Debug, Clone, PartialEq)]
pub enum SignalFilter {
    All,
    Favorites,
    Market(MarketType),
    Strategy(String),
    Direction(SignalDirection),
    Since(DateTime<Utc>),
    /// Case-insensitive substring match on symbol, strategy or market type
    Search(String),
}

impl SignalFilter {
    pub fn matches(&self, signal: &Signal) -> bool {
        match self {
            SignalFilter::All => true,
            SignalFilter::Favorites => signal.is_favorite,
            SignalFilter::Market(market) => signal.market_type == *market,
            SignalFilter::Strategy(strategy) => signal.strategy == *strategy,
            SignalFilter::Direction(direction) => signal.direction == *direction,
            SignalFilter::Since(since) => signal.created_at >= *since,
            SignalFilter::Search(query) => {
                let query = query.to_lowercase();
                [signal.symbol.as_str(), signal.strategy.as_str(), signal.market_type.as_str()]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&query))
            }
        }
    }
}

/// Followed-signal query shapes
#[derive(Debug, Clone, PartialEq)]
pub enum FollowedFilter {
    /// Ordered by `started_at` descending
    Active,
    /// Ordered by `started_at` descending
    All,
    /// Active records on one symbol and strategy, by `started_at` descending
    SymbolStrategy { symbol: String, strategy: String },
    /// Active and latched, ordered by detection time descending
    OppositeDetected,
}

impl FollowedFilter {
    pub fn matches(&self, followed: &FollowedSignal) -> bool {
        match self {
            FollowedFilter::Active => followed.is_active,
            FollowedFilter::All => true,
            FollowedFilter::SymbolStrategy { symbol, strategy } => {
                followed.is_active && followed.symbol == *symbol && followed.strategy == *strategy
            }
            FollowedFilter::OppositeDetected => {
                followed.is_active && followed.opposite_signal_detected
            }
        }
    }
}

#[async_trait::async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert-or-replace by id, all or nothing. Signals without an id are
    /// assigned one. Returns the rows as stored.
    async fn upsert_signals(&self, batch: &[Signal]) -> Result<Vec<Signal>, StoreError>;

    async fn get_signal(&self, id: i64) -> Result<Option<Signal>, StoreError>;

    async fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>, StoreError>;

    async fn unread_count(&self) -> Result<usize, StoreError>;

    async fn mark_signal_read(&self, id: i64) -> Result<(), StoreError>;

    async fn set_favorite(&self, id: i64, favorite: bool) -> Result<(), StoreError>;

    async fn delete_signal(&self, id: i64) -> Result<(), StoreError>;

    async fn delete_all_signals(&self) -> Result<usize, StoreError>;

    /// Insert-or-replace by symbol, all or nothing
    async fn upsert_market_data(&self, batch: &[MarketData]) -> Result<(), StoreError>;

    async fn get_market_data(&self, symbol: &str) -> Result<Option<MarketData>, StoreError>;

    /// Ordered by symbol ascending
    async fn list_market_data(
        &self,
        market_type: Option<MarketType>,
    ) -> Result<Vec<MarketData>, StoreError>;

    /// Case-insensitive substring match on symbol, ordered by symbol ascending
    async fn search_market_data(&self, query: &str) -> Result<Vec<MarketData>, StoreError>;

    /// Delete snapshots last updated before `cutoff`
    async fn purge_market_data_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn is_following(&self, signal_id: i64) -> Result<bool, StoreError>;

    async fn follow_active(&self, signal_id: i64) -> Result<Option<FollowedSignal>, StoreError>;

    /// Fails with [`StoreError::DuplicateFollow`] if an active record for the
    /// same signal id exists.
    async fn insert_followed(&self, entity: NewFollowedSignal) -> Result<i64, StoreError>;

    async fn get_followed(&self, id: i64) -> Result<Option<FollowedSignal>, StoreError>;

    async fn list_followed(&self, filter: &FollowedFilter)
        -> Result<Vec<FollowedSignal>, StoreError>;

    /// Set the opposite-signal latch. Returns `true` only for the call that
    /// flipped it; already latched or inactive records are left untouched.
    async fn mark_opposite_detected(
        &self,
        id: i64,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Close an active record. A record that is already inactive is returned
    /// unchanged as [`CloseOutcome::AlreadyClosed`].
    async fn close_followed(
        &self,
        id: i64,
        exited_at: DateTime<Utc>,
        reason: ExitReason,
        exit_price: Option<f64>,
    ) -> Result<CloseOutcome, StoreError>;

    async fn delete_inactive_followed(&self) -> Result<usize, StoreError>;

    async fn active_followed_count(&self) -> Result<usize, StoreError> {
        Ok(self.list_followed(&FollowedFilter::Active).await?.len())
    }

    /// Change notifications for every committed write
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}
