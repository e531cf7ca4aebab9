//! PostgreSQL-backed store for signals, market data and followed signals

use super::{
    FollowedFilter, LocalStore, SignalFilter, StoreChange, CHANGE_CHANNEL_CAPACITY,
};
use crate::error::StoreError;
use crate::models::{
    CloseOutcome, ExitReason, FollowedSignal, MarketData, MarketType, NewFollowedSignal, Signal,
    SignalDirection,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use tokio::sync::{broadcast, Mutex};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};

const SIGNAL_COLUMNS: &str = "id, symbol, market_type, strategy, direction, price, tp1, tp2, \
     stop_loss, volume, quote_volume, timestamp, timeframe, accuracy, conditions_json, \
     all_conditions_met, sma_20, sma_40, sar, ma_value, ma_type, trend, active_band, \
     is_read, is_favorite, created_at";

const MARKET_DATA_COLUMNS: &str = "symbol, market_type, price, price_change_24h, \
     price_change_percent_24h, volume_24h, high_24h, low_24h, last_update_time";

const FOLLOWED_COLUMNS: &str = "id, signal_id, symbol, market_type, strategy, direction, \
     entry_price, take_profit1, take_profit2, stop_loss, timeframe, started_at, is_active, \
     exited_at, exit_reason, exit_price, opposite_signal_detected, opposite_signal_price, \
     opposite_signal_time";

pub struct PostgresStore {
    client: Mutex<Client>,
    changes: broadcast::Sender<StoreChange>,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to PostgreSQL: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let store = Self {
            client: Mutex::new(client),
            changes,
        };
        store.init_schema().await?;
        info!("PostgresStore: schema ready");

        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let client = self.client.lock().await;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS signals (
                    id BIGSERIAL PRIMARY KEY,
                    symbol TEXT NOT NULL,
                    market_type TEXT NOT NULL,
                    strategy TEXT NOT NULL,
                    direction TEXT NOT NULL,
                    price DOUBLE PRECISION NOT NULL,
                    tp1 DOUBLE PRECISION NOT NULL,
                    tp2 DOUBLE PRECISION NOT NULL,
                    stop_loss DOUBLE PRECISION NOT NULL,
                    volume DOUBLE PRECISION NOT NULL,
                    quote_volume DOUBLE PRECISION NOT NULL,
                    timestamp TEXT NOT NULL,
                    timeframe TEXT NOT NULL,
                    accuracy TEXT NOT NULL,
                    conditions_json TEXT NOT NULL,
                    all_conditions_met BOOLEAN NOT NULL,
                    sma_20 DOUBLE PRECISION,
                    sma_40 DOUBLE PRECISION,
                    sar DOUBLE PRECISION,
                    ma_value DOUBLE PRECISION,
                    ma_type TEXT,
                    trend TEXT,
                    active_band DOUBLE PRECISION,
                    is_read BOOLEAN NOT NULL DEFAULT FALSE,
                    is_favorite BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL
                );

                CREATE TABLE IF NOT EXISTS market_data (
                    symbol TEXT PRIMARY KEY,
                    market_type TEXT NOT NULL,
                    price DOUBLE PRECISION NOT NULL,
                    price_change_24h DOUBLE PRECISION NOT NULL,
                    price_change_percent_24h DOUBLE PRECISION NOT NULL,
                    volume_24h DOUBLE PRECISION NOT NULL,
                    high_24h DOUBLE PRECISION NOT NULL,
                    low_24h DOUBLE PRECISION NOT NULL,
                    last_update_time TIMESTAMPTZ NOT NULL
                );

                CREATE TABLE IF NOT EXISTS followed_signals (
                    id BIGSERIAL PRIMARY KEY,
                    signal_id BIGINT NOT NULL,
                    symbol TEXT NOT NULL,
                    market_type TEXT NOT NULL,
                    strategy TEXT NOT NULL,
                    direction TEXT NOT NULL,
                    entry_price DOUBLE PRECISION NOT NULL,
                    take_profit1 DOUBLE PRECISION NOT NULL,
                    take_profit2 DOUBLE PRECISION NOT NULL,
                    stop_loss DOUBLE PRECISION NOT NULL,
                    timeframe TEXT NOT NULL,
                    started_at TIMESTAMPTZ NOT NULL,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    exited_at TIMESTAMPTZ,
                    exit_reason TEXT,
                    exit_price DOUBLE PRECISION,
                    opposite_signal_detected BOOLEAN NOT NULL DEFAULT FALSE,
                    opposite_signal_price DOUBLE PRECISION,
                    opposite_signal_time TIMESTAMPTZ,
                    CHECK (NOT opposite_signal_detected
                        OR (opposite_signal_price IS NOT NULL AND opposite_signal_time IS NOT NULL)),
                    CHECK (is_active OR (exited_at IS NOT NULL AND exit_reason IS NOT NULL))
                );

                DO $$ BEGIN
                    ALTER TABLE signals ADD CONSTRAINT signals_symbol_not_blank
                        CHECK (btrim(symbol) <> '');
                EXCEPTION WHEN duplicate_object THEN NULL;
                END $$;

                CREATE UNIQUE INDEX IF NOT EXISTS idx_followed_one_active
                    ON followed_signals (signal_id) WHERE is_active;
                CREATE INDEX IF NOT EXISTS idx_followed_is_active
                    ON followed_signals (is_active);
                CREATE INDEX IF NOT EXISTS idx_signals_created_at
                    ON signals (created_at DESC);",
            )
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to create schema: {}", e)))
    }

    fn publish(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::Backend)
}

fn signal_from_row(row: &Row) -> Result<Signal, StoreError> {
    let market_type: String = row.get(2);
    let direction: String = row.get(4);
    let conditions_json: String = row.get(14);
    let conditions: BTreeMap<String, serde_json::Value> = serde_json::from_str(&conditions_json)?;

    Ok(Signal {
        id: Some(row.get(0)),
        symbol: row.get(1),
        market_type: parse_column::<MarketType>(&market_type)?,
        strategy: row.get(3),
        direction: parse_column::<SignalDirection>(&direction)?,
        price: row.get(5),
        tp1: row.get(6),
        tp2: row.get(7),
        stop_loss: row.get(8),
        volume: row.get(9),
        quote_volume: row.get(10),
        timestamp: row.get(11),
        timeframe: row.get(12),
        accuracy: row.get(13),
        conditions,
        all_conditions_met: row.get(15),
        sma_20: row.get(16),
        sma_40: row.get(17),
        sar: row.get(18),
        ma_value: row.get(19),
        ma_type: row.get(20),
        trend: row.get(21),
        active_band: row.get(22),
        is_read: row.get(23),
        is_favorite: row.get(24),
        created_at: row.get(25),
    })
}

fn market_data_from_row(row: &Row) -> Result<MarketData, StoreError> {
    let market_type: String = row.get(1);
    Ok(MarketData {
        symbol: row.get(0),
        market_type: parse_column::<MarketType>(&market_type)?,
        price: row.get(2),
        price_change_24h: row.get(3),
        price_change_percent_24h: row.get(4),
        volume_24h: row.get(5),
        high_24h: row.get(6),
        low_24h: row.get(7),
        last_update_time: row.get(8),
    })
}

fn followed_from_row(row: &Row) -> Result<FollowedSignal, StoreError> {
    let market_type: String = row.get(3);
    let direction: String = row.get(5);
    let exit_reason: Option<String> = row.get(14);

    Ok(FollowedSignal {
        id: row.get(0),
        signal_id: row.get(1),
        symbol: row.get(2),
        market_type: parse_column::<MarketType>(&market_type)?,
        strategy: row.get(4),
        direction: parse_column::<SignalDirection>(&direction)?,
        entry_price: row.get(6),
        take_profit1: row.get(7),
        take_profit2: row.get(8),
        stop_loss: row.get(9),
        timeframe: row.get(10),
        started_at: row.get(11),
        is_active: row.get(12),
        exited_at: row.get(13),
        exit_reason: exit_reason
            .as_deref()
            .map(parse_column::<ExitReason>)
            .transpose()?,
        exit_price: row.get(15),
        opposite_signal_detected: row.get(16),
        opposite_signal_price: row.get(17),
        opposite_signal_time: row.get(18),
    })
}

#[async_trait::async_trait]
impl LocalStore for PostgresStore {
    async fn upsert_signals(&self, batch: &[Signal]) -> Result<Vec<Signal>, StoreError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let upsert_sql = format!(
            "INSERT INTO signals ({SIGNAL_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                     $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
             ON CONFLICT (id) DO UPDATE SET
                symbol = EXCLUDED.symbol, market_type = EXCLUDED.market_type,
                strategy = EXCLUDED.strategy, direction = EXCLUDED.direction,
                price = EXCLUDED.price, tp1 = EXCLUDED.tp1, tp2 = EXCLUDED.tp2,
                stop_loss = EXCLUDED.stop_loss, volume = EXCLUDED.volume,
                quote_volume = EXCLUDED.quote_volume, timestamp = EXCLUDED.timestamp,
                timeframe = EXCLUDED.timeframe, accuracy = EXCLUDED.accuracy,
                conditions_json = EXCLUDED.conditions_json,
                all_conditions_met = EXCLUDED.all_conditions_met,
                sma_20 = EXCLUDED.sma_20, sma_40 = EXCLUDED.sma_40, sar = EXCLUDED.sar,
                ma_value = EXCLUDED.ma_value, ma_type = EXCLUDED.ma_type,
                trend = EXCLUDED.trend, active_band = EXCLUDED.active_band,
                is_read = EXCLUDED.is_read, is_favorite = EXCLUDED.is_favorite,
                created_at = EXCLUDED.created_at"
        );

        let explicit: HashSet<i64> = batch.iter().filter_map(|s| s.id).collect();
        let mut stored = Vec::with_capacity(batch.len());
        for signal in batch {
            let conditions_json = serde_json::to_string(&signal.conditions)?;
            let id: i64 = match signal.id {
                Some(id) => id,
                None => loop {
                    let row = tx
                        .query_one("SELECT nextval('signals_id_seq')", &[])
                        .await?;
                    let candidate: i64 = row.get(0);
                    if !explicit.contains(&candidate) {
                        break candidate;
                    }
                },
            };

            tx.execute(
                upsert_sql.as_str(),
                &[
                    &id,
                    &signal.symbol,
                    &signal.market_type.as_str(),
                    &signal.strategy,
                    &signal.direction.as_str(),
                    &signal.price,
                    &signal.tp1,
                    &signal.tp2,
                    &signal.stop_loss,
                    &signal.volume,
                    &signal.quote_volume,
                    &signal.timestamp,
                    &signal.timeframe,
                    &signal.accuracy,
                    &conditions_json,
                    &signal.all_conditions_met,
                    &signal.sma_20,
                    &signal.sma_40,
                    &signal.sar,
                    &signal.ma_value,
                    &signal.ma_type,
                    &signal.trend,
                    &signal.active_band,
                    &signal.is_read,
                    &signal.is_favorite,
                    &signal.created_at,
                ],
            )
            .await?;

            let mut signal = signal.clone();
            signal.id = Some(id);
            stored.push(signal);
        }

        // Explicit ids bypass the sequence. It only moves forward, so ids
        // of deleted signals are never handed out again.
        tx.execute(
            "SELECT setval('signals_id_seq',
                           GREATEST((SELECT COALESCE(MAX(id), 0) FROM signals),
                                    (SELECT last_value FROM signals_id_seq),
                                    1))",
            &[],
        )
        .await?;

        tx.commit().await?;
        drop(client);

        debug!(count = stored.len(), "PostgresStore: upserted {} signals", stored.len());
        self.publish(StoreChange::Signals);
        Ok(stored)
    }

    async fn get_signal(&self, id: i64) -> Result<Option<Signal>, StoreError> {
        let client = self.client.lock().await;
        let query = format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = $1");
        let row = client.query_opt(query.as_str(), &[&id]).await?;
        row.as_ref().map(signal_from_row).transpose()
    }

    async fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>, StoreError> {
        let client = self.client.lock().await;
        let order = "ORDER BY created_at DESC, id DESC";
        let rows = match filter {
            SignalFilter::All => {
                let q = format!("SELECT {SIGNAL_COLUMNS} FROM signals {order}");
                client.query(q.as_str(), &[]).await?
            }
            SignalFilter::Favorites => {
                let q = format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE is_favorite {order}");
                client.query(q.as_str(), &[]).await?
            }
            SignalFilter::Market(market) => {
                let q = format!(
                    "SELECT {SIGNAL_COLUMNS} FROM signals WHERE market_type = $1 {order}"
                );
                client.query(q.as_str(), &[&market.as_str()]).await?
            }
            SignalFilter::Strategy(strategy) => {
                let q = format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE strategy = $1 {order}");
                client.query(q.as_str(), &[strategy]).await?
            }
            SignalFilter::Direction(direction) => {
                let q =
                    format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE direction = $1 {order}");
                client.query(q.as_str(), &[&direction.as_str()]).await?
            }
            SignalFilter::Since(since) => {
                let q =
                    format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE created_at >= $1 {order}");
                client.query(q.as_str(), &[since]).await?
            }
            SignalFilter::Search(query) => {
                let q = format!(
                    "SELECT {SIGNAL_COLUMNS} FROM signals
                     WHERE strpos(lower(symbol), lower($1)) > 0
                        OR strpos(lower(strategy), lower($1)) > 0
                        OR strpos(lower(market_type), lower($1)) > 0
                     {order}"
                );
                client.query(q.as_str(), &[query]).await?
            }
        };
        rows.iter().map(signal_from_row).collect()
    }

    async fn unread_count(&self) -> Result<usize, StoreError> {
        let client = self.client.lock().await;
        let row = client
            .query_one("SELECT COUNT(*) FROM signals WHERE NOT is_read", &[])
            .await?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }

    async fn mark_signal_read(&self, id: i64) -> Result<(), StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .execute("UPDATE signals SET is_read = TRUE WHERE id = $1", &[&id])
            .await?;
        drop(client);
        if rows == 0 {
            return Err(StoreError::not_found("Signal", id));
        }
        self.publish(StoreChange::Signals);
        Ok(())
    }

    async fn set_favorite(&self, id: i64, favorite: bool) -> Result<(), StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .execute(
                "UPDATE signals SET is_favorite = $1 WHERE id = $2",
                &[&favorite, &id],
            )
            .await?;
        drop(client);
        if rows == 0 {
            return Err(StoreError::not_found("Signal", id));
        }
        self.publish(StoreChange::Signals);
        Ok(())
    }

    async fn delete_signal(&self, id: i64) -> Result<(), StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .execute("DELETE FROM signals WHERE id = $1", &[&id])
            .await?;
        drop(client);
        if rows == 0 {
            return Err(StoreError::not_found("Signal", id));
        }
        self.publish(StoreChange::Signals);
        Ok(())
    }

    async fn delete_all_signals(&self) -> Result<usize, StoreError> {
        let client = self.client.lock().await;
        let rows = client.execute("DELETE FROM signals", &[]).await?;
        drop(client);
        self.publish(StoreChange::Signals);
        Ok(rows as usize)
    }

    async fn upsert_market_data(&self, batch: &[MarketData]) -> Result<(), StoreError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        let upsert_sql = format!(
            "INSERT INTO market_data ({MARKET_DATA_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (symbol) DO UPDATE SET
                market_type = EXCLUDED.market_type, price = EXCLUDED.price,
                price_change_24h = EXCLUDED.price_change_24h,
                price_change_percent_24h = EXCLUDED.price_change_percent_24h,
                volume_24h = EXCLUDED.volume_24h, high_24h = EXCLUDED.high_24h,
                low_24h = EXCLUDED.low_24h, last_update_time = EXCLUDED.last_update_time"
        );
        for data in batch {
            tx.execute(
                upsert_sql.as_str(),
                &[
                    &data.symbol,
                    &data.market_type.as_str(),
                    &data.price,
                    &data.price_change_24h,
                    &data.price_change_percent_24h,
                    &data.volume_24h,
                    &data.high_24h,
                    &data.low_24h,
                    &data.last_update_time,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        drop(client);
        self.publish(StoreChange::MarketData);
        Ok(())
    }

    async fn get_market_data(&self, symbol: &str) -> Result<Option<MarketData>, StoreError> {
        let client = self.client.lock().await;
        let query = format!("SELECT {MARKET_DATA_COLUMNS} FROM market_data WHERE symbol = $1");
        let row = client.query_opt(query.as_str(), &[&symbol]).await?;
        row.as_ref().map(market_data_from_row).transpose()
    }

    async fn list_market_data(
        &self,
        market_type: Option<MarketType>,
    ) -> Result<Vec<MarketData>, StoreError> {
        let client = self.client.lock().await;
        let rows = match market_type {
            Some(market) => {
                let q = format!(
                    "SELECT {MARKET_DATA_COLUMNS} FROM market_data
                     WHERE market_type = $1 ORDER BY symbol ASC"
                );
                client.query(q.as_str(), &[&market.as_str()]).await?
            }
            None => {
                let q = format!("SELECT {MARKET_DATA_COLUMNS} FROM market_data ORDER BY symbol ASC");
                client.query(q.as_str(), &[]).await?
            }
        };
        rows.iter().map(market_data_from_row).collect()
    }

    async fn search_market_data(&self, query: &str) -> Result<Vec<MarketData>, StoreError> {
        let client = self.client.lock().await;
        let q = format!(
            "SELECT {MARKET_DATA_COLUMNS} FROM market_data
             WHERE strpos(lower(symbol), lower($1)) > 0 ORDER BY symbol ASC"
        );
        let rows = client.query(q.as_str(), &[&query]).await?;
        rows.iter().map(market_data_from_row).collect()
    }

    async fn purge_market_data_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .execute(
                "DELETE FROM market_data WHERE last_update_time < $1",
                &[&cutoff],
            )
            .await?;
        drop(client);
        if rows > 0 {
            self.publish(StoreChange::MarketData);
        }
        Ok(rows as usize)
    }

    async fn is_following(&self, signal_id: i64) -> Result<bool, StoreError> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM followed_signals WHERE signal_id = $1 AND is_active)",
                &[&signal_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn follow_active(&self, signal_id: i64) -> Result<Option<FollowedSignal>, StoreError> {
        let client = self.client.lock().await;
        let query = format!(
            "SELECT {FOLLOWED_COLUMNS} FROM followed_signals
             WHERE signal_id = $1 AND is_active LIMIT 1"
        );
        let row = client.query_opt(query.as_str(), &[&signal_id]).await?;
        row.as_ref().map(followed_from_row).transpose()
    }

    async fn insert_followed(&self, entity: NewFollowedSignal) -> Result<i64, StoreError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let exists: bool = tx
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM followed_signals WHERE signal_id = $1 AND is_active)",
                &[&entity.signal_id],
            )
            .await?
            .get(0);
        if exists {
            return Err(StoreError::DuplicateFollow {
                signal_id: entity.signal_id,
            });
        }

        let inserted = tx
            .query_one(
                "INSERT INTO followed_signals (
                    signal_id, symbol, market_type, strategy, direction, entry_price,
                    take_profit1, take_profit2, stop_loss, timeframe, started_at, is_active
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE)
                 RETURNING id",
                &[
                    &entity.signal_id,
                    &entity.symbol,
                    &entity.market_type.as_str(),
                    &entity.strategy,
                    &entity.direction.as_str(),
                    &entity.entry_price,
                    &entity.take_profit1,
                    &entity.take_profit2,
                    &entity.stop_loss,
                    &entity.timeframe,
                    &entity.started_at,
                ],
            )
            .await;

        let row = match inserted {
            Ok(row) => row,
            // Another connection won the race between the check and the insert.
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                return Err(StoreError::DuplicateFollow {
                    signal_id: entity.signal_id,
                });
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;
        drop(client);

        self.publish(StoreChange::FollowedSignals);
        Ok(row.get(0))
    }

    async fn get_followed(&self, id: i64) -> Result<Option<FollowedSignal>, StoreError> {
        let client = self.client.lock().await;
        let query = format!("SELECT {FOLLOWED_COLUMNS} FROM followed_signals WHERE id = $1");
        let row = client.query_opt(query.as_str(), &[&id]).await?;
        row.as_ref().map(followed_from_row).transpose()
    }

    async fn list_followed(
        &self,
        filter: &FollowedFilter,
    ) -> Result<Vec<FollowedSignal>, StoreError> {
        let client = self.client.lock().await;
        let rows = match filter {
            FollowedFilter::Active => {
                let q = format!(
                    "SELECT {FOLLOWED_COLUMNS} FROM followed_signals
                     WHERE is_active ORDER BY started_at DESC, id DESC"
                );
                client.query(q.as_str(), &[]).await?
            }
            FollowedFilter::All => {
                let q = format!(
                    "SELECT {FOLLOWED_COLUMNS} FROM followed_signals
                     ORDER BY started_at DESC, id DESC"
                );
                client.query(q.as_str(), &[]).await?
            }
            FollowedFilter::SymbolStrategy { symbol, strategy } => {
                let q = format!(
                    "SELECT {FOLLOWED_COLUMNS} FROM followed_signals
                     WHERE symbol = $1 AND strategy = $2 AND is_active
                     ORDER BY started_at DESC, id DESC"
                );
                client.query(q.as_str(), &[symbol, strategy]).await?
            }
            FollowedFilter::OppositeDetected => {
                let q = format!(
                    "SELECT {FOLLOWED_COLUMNS} FROM followed_signals
                     WHERE is_active AND opposite_signal_detected
                     ORDER BY opposite_signal_time DESC, id DESC"
                );
                client.query(q.as_str(), &[]).await?
            }
        };
        rows.iter().map(followed_from_row).collect()
    }

    async fn mark_opposite_detected(
        &self,
        id: i64,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .execute(
                "UPDATE followed_signals
                 SET opposite_signal_detected = TRUE,
                     opposite_signal_price = $2,
                     opposite_signal_time = $3
                 WHERE id = $1 AND is_active AND NOT opposite_signal_detected",
                &[&id, &price, &time],
            )
            .await?;
        if rows == 1 {
            drop(client);
            self.publish(StoreChange::FollowedSignals);
            return Ok(true);
        }

        let exists: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM followed_signals WHERE id = $1)",
                &[&id],
            )
            .await?
            .get(0);
        if !exists {
            return Err(StoreError::not_found("FollowedSignal", id));
        }
        Ok(false)
    }

    async fn close_followed(
        &self,
        id: i64,
        exited_at: DateTime<Utc>,
        reason: ExitReason,
        exit_price: Option<f64>,
    ) -> Result<CloseOutcome, StoreError> {
        let client = self.client.lock().await;
        let update = format!(
            "UPDATE followed_signals
             SET is_active = FALSE, exited_at = $2, exit_reason = $3, exit_price = $4
             WHERE id = $1 AND is_active
             RETURNING {FOLLOWED_COLUMNS}"
        );
        let closed = client
            .query_opt(
                update.as_str(),
                &[&id, &exited_at, &reason.as_str(), &exit_price],
            )
            .await?;
        if let Some(row) = closed {
            let record = followed_from_row(&row)?;
            drop(client);
            self.publish(StoreChange::FollowedSignals);
            return Ok(CloseOutcome::Closed(record));
        }

        let select = format!("SELECT {FOLLOWED_COLUMNS} FROM followed_signals WHERE id = $1");
        match client.query_opt(select.as_str(), &[&id]).await? {
            Some(row) => {
                let record = followed_from_row(&row)?;
                warn!(
                    followed_id = id,
                    existing_reason = ?record.exit_reason,
                    requested_reason = %reason,
                    "PostgresStore: close requested for already closed followed signal {}",
                    id
                );
                Ok(CloseOutcome::AlreadyClosed(record))
            }
            None => Err(StoreError::not_found("FollowedSignal", id)),
        }
    }

    async fn delete_inactive_followed(&self) -> Result<usize, StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .execute("DELETE FROM followed_signals WHERE NOT is_active", &[])
            .await?;
        drop(client);
        if rows > 0 {
            self.publish(StoreChange::FollowedSignals);
        }
        Ok(rows as usize)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
