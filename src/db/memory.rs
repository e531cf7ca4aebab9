//! In-process store backed by tokio `RwLock`ed maps

use super::{
    FollowedFilter, LocalStore, SignalFilter, StoreChange, CHANGE_CHANNEL_CAPACITY,
};
use crate::error::StoreError;
use crate::models::{
    CloseOutcome, ExitReason, FollowedSignal, MarketData, MarketType, NewFollowedSignal, Signal,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

#[derive(Default)]
struct State {
    signals: HashMap<i64, Signal>,
    next_signal_id: i64,
    market_data: BTreeMap<String, MarketData>,
    followed: HashMap<i64, FollowedSignal>,
    next_followed_id: i64,
}

/// All row sets live behind one lock, so every write is atomic with respect
/// to readers.
pub struct InMemoryStore {
    state: RwLock<State>,
    changes: broadcast::Sender<StoreChange>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            changes,
        }
    }

    fn publish(&self, change: StoreChange) {
        // No receivers is fine.
        let _ = self.changes.send(change);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_signals_first(mut signals: Vec<Signal>) -> Vec<Signal> {
    signals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    signals
}

#[async_trait::async_trait]
impl LocalStore for InMemoryStore {
    async fn upsert_signals(&self, batch: &[Signal]) -> Result<Vec<Signal>, StoreError> {
        let mut state = self.state.write().await;
        let explicit: HashSet<i64> = batch.iter().filter_map(|s| s.id).collect();
        let mut stored = Vec::with_capacity(batch.len());
        for signal in batch {
            if signal.symbol.trim().is_empty() {
                return Err(StoreError::Backend(
                    "signal symbol must not be blank".to_string(),
                ));
            }
            let mut signal = signal.clone();
            let id = match signal.id {
                Some(id) => id,
                None => loop {
                    state.next_signal_id += 1;
                    if !explicit.contains(&state.next_signal_id) {
                        break state.next_signal_id;
                    }
                },
            };
            state.next_signal_id = state.next_signal_id.max(id);
            signal.id = Some(id);
            stored.push(signal);
        }
        for signal in &stored {
            if let Some(id) = signal.id {
                state.signals.insert(id, signal.clone());
            }
        }
        drop(state);

        debug!(count = stored.len(), "InMemoryStore: upserted {} signals", stored.len());
        self.publish(StoreChange::Signals);
        Ok(stored)
    }

    async fn get_signal(&self, id: i64) -> Result<Option<Signal>, StoreError> {
        Ok(self.state.read().await.signals.get(&id).cloned())
    }

    async fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>, StoreError> {
        let state = self.state.read().await;
        let signals = state
            .signals
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        Ok(newest_signals_first(signals))
    }

    async fn unread_count(&self) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(state.signals.values().filter(|s| !s.is_read).count())
    }

    async fn mark_signal_read(&self, id: i64) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let signal = state
            .signals
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Signal", id))?;
        signal.is_read = true;
        drop(state);
        self.publish(StoreChange::Signals);
        Ok(())
    }

    async fn set_favorite(&self, id: i64, favorite: bool) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let signal = state
            .signals
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Signal", id))?;
        signal.is_favorite = favorite;
        drop(state);
        self.publish(StoreChange::Signals);
        Ok(())
    }

    async fn delete_signal(&self, id: i64) -> Result<(), StoreError> {
        let removed = self.state.write().await.signals.remove(&id);
        if removed.is_none() {
            return Err(StoreError::not_found("Signal", id));
        }
        self.publish(StoreChange::Signals);
        Ok(())
    }

    async fn delete_all_signals(&self) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let count = state.signals.len();
        state.signals.clear();
        drop(state);
        self.publish(StoreChange::Signals);
        Ok(count)
    }

    async fn upsert_market_data(&self, batch: &[MarketData]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for data in batch {
            state.market_data.insert(data.symbol.clone(), data.clone());
        }
        drop(state);
        self.publish(StoreChange::MarketData);
        Ok(())
    }

    async fn get_market_data(&self, symbol: &str) -> Result<Option<MarketData>, StoreError> {
        Ok(self.state.read().await.market_data.get(symbol).cloned())
    }

    async fn list_market_data(
        &self,
        market_type: Option<MarketType>,
    ) -> Result<Vec<MarketData>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .market_data
            .values()
            .filter(|d| market_type.map_or(true, |m| d.market_type == m))
            .cloned()
            .collect())
    }

    async fn search_market_data(&self, query: &str) -> Result<Vec<MarketData>, StoreError> {
        let query = query.to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .market_data
            .values()
            .filter(|d| d.symbol.to_lowercase().contains(&query))
            .cloned()
            .collect())
    }

    async fn purge_market_data_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let before = state.market_data.len();
        state.market_data.retain(|_, d| d.last_update_time >= cutoff);
        let purged = before - state.market_data.len();
        drop(state);
        if purged > 0 {
            self.publish(StoreChange::MarketData);
        }
        Ok(purged)
    }

    async fn is_following(&self, signal_id: i64) -> Result<bool, StoreError> {
        Ok(self.follow_active(signal_id).await?.is_some())
    }

    async fn follow_active(&self, signal_id: i64) -> Result<Option<FollowedSignal>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .followed
            .values()
            .find(|f| f.signal_id == signal_id && f.is_active)
            .cloned())
    }

    async fn insert_followed(&self, entity: NewFollowedSignal) -> Result<i64, StoreError> {
        let mut state = self.state.write().await;
        let duplicate = state
            .followed
            .values()
            .any(|f| f.signal_id == entity.signal_id && f.is_active);
        if duplicate {
            return Err(StoreError::DuplicateFollow {
                signal_id: entity.signal_id,
            });
        }
        state.next_followed_id += 1;
        let id = state.next_followed_id;
        state.followed.insert(id, entity.into_followed(id));
        drop(state);
        self.publish(StoreChange::FollowedSignals);
        Ok(id)
    }

    async fn get_followed(&self, id: i64) -> Result<Option<FollowedSignal>, StoreError> {
        Ok(self.state.read().await.followed.get(&id).cloned())
    }

    async fn list_followed(
        &self,
        filter: &FollowedFilter,
    ) -> Result<Vec<FollowedSignal>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<FollowedSignal> = state
            .followed
            .values()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        match filter {
            FollowedFilter::OppositeDetected => records.sort_by(|a, b| {
                b.opposite_signal_time
                    .cmp(&a.opposite_signal_time)
                    .then(b.id.cmp(&a.id))
            }),
            _ => records.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id))),
        }
        Ok(records)
    }

    async fn mark_opposite_detected(
        &self,
        id: i64,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .followed
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("FollowedSignal", id))?;
        if !record.is_active || record.opposite_signal_detected {
            return Ok(false);
        }
        record.opposite_signal_detected = true;
        record.opposite_signal_price = Some(price);
        record.opposite_signal_time = Some(time);
        drop(state);
        self.publish(StoreChange::FollowedSignals);
        Ok(true)
    }

    async fn close_followed(
        &self,
        id: i64,
        exited_at: DateTime<Utc>,
        reason: ExitReason,
        exit_price: Option<f64>,
    ) -> Result<CloseOutcome, StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .followed
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("FollowedSignal", id))?;
        if !record.is_active {
            warn!(
                followed_id = id,
                existing_reason = ?record.exit_reason,
                requested_reason = %reason,
                "InMemoryStore: close requested for already closed followed signal {}",
                id
            );
            return Ok(CloseOutcome::AlreadyClosed(record.clone()));
        }
        record.is_active = false;
        record.exited_at = Some(exited_at);
        record.exit_reason = Some(reason);
        record.exit_price = exit_price;
        let closed = record.clone();
        drop(state);
        self.publish(StoreChange::FollowedSignals);
        Ok(CloseOutcome::Closed(closed))
    }

    async fn delete_inactive_followed(&self) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let before = state.followed.len();
        state.followed.retain(|_, f| f.is_active);
        let deleted = before - state.followed.len();
        drop(state);
        if deleted > 0 {
            self.publish(StoreChange::FollowedSignals);
        }
        Ok(deleted)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
