//! Followed-signal lifecycle models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::signal::{MarketType, Signal, SignalDirection, TradeAction};

/// Why a followed position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    OppositeSignal,
    Manual,
    TakeProfit,
    StopLoss,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::OppositeSignal => "OPPOSITE_SIGNAL",
            ExitReason::Manual => "MANUAL",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPPOSITE_SIGNAL" => Ok(ExitReason::OppositeSignal),
            "MANUAL" => Ok(ExitReason::Manual),
            "TAKE_PROFIT" => Ok(ExitReason::TakeProfit),
            "STOP_LOSS" => Ok(ExitReason::StopLoss),
            other => Err(format!("unknown exit reason '{}'", other)),
        }
    }
}

/// A position the user follows, monitored for a contradicting signal.
///
/// Signal fields are copied rather than referenced so the record stays
/// meaningful after the originating [`Signal`] is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowedSignal {
    pub id: i64,
    pub signal_id: i64,

    pub symbol: String,
    pub market_type: MarketType,
    pub strategy: String,
    pub direction: SignalDirection,
    pub entry_price: f64,
    pub take_profit1: f64,
    pub take_profit2: f64,
    pub stop_loss: f64,
    pub timeframe: String,

    pub started_at: DateTime<Utc>,
    pub is_active: bool,

    pub exited_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub exit_price: Option<f64>,

    pub opposite_signal_detected: bool,
    pub opposite_signal_price: Option<f64>,
    pub opposite_signal_time: Option<DateTime<Utc>>,
}

/// Lifecycle state derived from the record's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowStatus {
    Following,
    /// Still open; the user has been told to exit.
    OppositeDetected,
    Closed(ExitReason),
}

impl FollowedSignal {
    pub fn opposite_direction(&self) -> SignalDirection {
        self.direction.opposite()
    }

    pub fn required_action(&self) -> TradeAction {
        self.direction.exit_action()
    }

    pub fn status(&self) -> FollowStatus {
        match (self.is_active, self.exit_reason) {
            (false, Some(reason)) => FollowStatus::Closed(reason),
            // Unreachable through the store; treat a bare inactive flag as manual.
            (false, None) => FollowStatus::Closed(ExitReason::Manual),
            (true, _) if self.opposite_signal_detected => FollowStatus::OppositeDetected,
            (true, _) => FollowStatus::Following,
        }
    }

    /// Time followed so far, or until exit for closed records.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let end = if self.is_active {
            now
        } else {
            self.exited_at.unwrap_or(now)
        };
        end - self.started_at
    }

    /// Profit or loss in percent, known only once closed with an exit price.
    pub fn profit_loss_pct(&self) -> Option<f64> {
        if self.is_active {
            return None;
        }
        let exit = self.exit_price?;
        let pct = match self.direction {
            SignalDirection::Long => (exit - self.entry_price) / self.entry_price * 100.0,
            SignalDirection::Short => (self.entry_price - exit) / self.entry_price * 100.0,
        };
        Some(pct)
    }

    pub fn is_contradicted_by(&self, signal: &Signal) -> bool {
        signal.is_opposite_of(&self.symbol, &self.strategy, self.direction)
    }
}

/// Insert payload for a new followed signal
#[derive(Debug, Clone, PartialEq)]
pub struct NewFollowedSignal {
    pub signal_id: i64,
    pub symbol: String,
    pub market_type: MarketType,
    pub strategy: String,
    pub direction: SignalDirection,
    pub entry_price: f64,
    pub take_profit1: f64,
    pub take_profit2: f64,
    pub stop_loss: f64,
    pub timeframe: String,
    pub started_at: DateTime<Utc>,
}

impl NewFollowedSignal {
    /// Build the insert payload from a stored signal. `None` if the signal has
    /// not been persisted yet and so has no id to reference.
    pub fn from_signal(signal: &Signal, started_at: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            signal_id: signal.id?,
            symbol: signal.symbol.clone(),
            market_type: signal.market_type,
            strategy: signal.strategy.clone(),
            direction: signal.direction,
            entry_price: signal.price,
            take_profit1: signal.tp1,
            take_profit2: signal.tp2,
            stop_loss: signal.stop_loss,
            timeframe: signal.timeframe.clone(),
            started_at,
        })
    }

    pub fn into_followed(self, id: i64) -> FollowedSignal {
        FollowedSignal {
            id,
            signal_id: self.signal_id,
            symbol: self.symbol,
            market_type: self.market_type,
            strategy: self.strategy,
            direction: self.direction,
            entry_price: self.entry_price,
            take_profit1: self.take_profit1,
            take_profit2: self.take_profit2,
            stop_loss: self.stop_loss,
            timeframe: self.timeframe,
            started_at: self.started_at,
            is_active: true,
            exited_at: None,
            exit_reason: None,
            exit_price: None,
            opposite_signal_detected: false,
            opposite_signal_price: None,
            opposite_signal_time: None,
        }
    }
}

/// Result of a close request against the store
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed(FollowedSignal),
    /// The record was already inactive and was left untouched.
    AlreadyClosed(FollowedSignal),
}

impl CloseOutcome {
    pub fn record(&self) -> &FollowedSignal {
        match self {
            CloseOutcome::Closed(record) | CloseOutcome::AlreadyClosed(record) => record,
        }
    }

    pub fn into_record(self) -> FollowedSignal {
        match self {
            CloseOutcome::Closed(record) | CloseOutcome::AlreadyClosed(record) => record,
        }
    }
}
