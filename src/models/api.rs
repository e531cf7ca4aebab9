//! Wire types for the signal service's account endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::followed::ExitReason;
use super::signal::{MarketType, Signal, SignalDirection};

/// Standard response envelope: `{ success, data?, message?, error? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(error.into()),
        }
    }

    /// Unwrap the payload. A `success=false` envelope or a missing `data`
    /// both count as a logical failure carrying the best available message.
    pub fn into_data(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(self
                .error
                .or(self.message)
                .unwrap_or_else(|| "Unknown error".to_string())),
        }
    }
}

/// Body of `POST signals/follow`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowSignalRequest {
    pub signal_id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub market_type: MarketType,
    pub strategy: String,
    pub signal_type: SignalDirection,
    pub entry_price: f64,
    pub take_profit1: f64,
    pub take_profit2: f64,
    pub stop_loss: f64,
}

impl FollowSignalRequest {
    pub fn for_signal(signal_id: i64, user_id: i64, signal: &Signal) -> Self {
        Self {
            signal_id,
            user_id,
            symbol: signal.symbol.clone(),
            market_type: signal.market_type,
            strategy: signal.strategy.clone(),
            signal_type: signal.direction,
            entry_price: signal.price,
            take_profit1: signal.tp1,
            take_profit2: signal.tp2,
            stop_loss: signal.stop_loss,
        }
    }
}

/// A followed signal as the service stores it for the account.
///
/// Timestamps are kept as the service sends them (naive ISO-8601).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFollowedSignal {
    pub id: i64,
    pub signal_id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub market_type: MarketType,
    pub strategy: String,
    pub signal_type: SignalDirection,
    pub entry_price: f64,
    pub take_profit1: f64,
    pub take_profit2: f64,
    pub stop_loss: f64,
    pub started_at: String,
    pub is_active: bool,
    #[serde(default)]
    pub exited_at: Option<String>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub opposite_signal_detected: bool,
    #[serde(default)]
    pub opposite_signal_price: Option<f64>,
    #[serde(default)]
    pub opposite_signal_time: Option<String>,
}

/// Server-side opposite-signal detection for one followed position.
///
/// `opposite_signal` is a raw row from the service's signal table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OppositeSignalDetection {
    pub followed_signal_id: i64,
    pub followed_signal: RemoteFollowedSignal,
    pub opposite_signal: Value,
}
