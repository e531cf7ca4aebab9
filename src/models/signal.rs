//! Trading signal data models shared by the store, the client and the monitor.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const SAR_SMA: &str = "SAR_SMA";
pub const SUPERTREND_MA: &str = "SUPERTREND_MA";

/// Every strategy the scanning service supports.
pub const SUPPORTED_STRATEGIES: [&str; 2] = [SAR_SMA, SUPERTREND_MA];

/// Trade direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Long,
    Short,
}

impl SignalDirection {
    pub fn opposite(self) -> Self {
        match self {
            SignalDirection::Long => SignalDirection::Short,
            SignalDirection::Short => SignalDirection::Long,
        }
    }

    /// Action a holder must take to exit a position in this direction.
    pub fn exit_action(self) -> TradeAction {
        match self {
            SignalDirection::Long => TradeAction::Sell,
            SignalDirection::Short => TradeAction::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalDirection::Long => "LONG",
            SignalDirection::Short => "SHORT",
        }
    }
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(SignalDirection::Long),
            "SHORT" => Ok(SignalDirection::Short),
            other => Err(format!("unknown signal direction '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => f.write_str("BUY"),
            TradeAction::Sell => f.write_str("SELL"),
        }
    }
}

/// Market class of an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketType {
    Crypto,
    Forex,
}

impl MarketType {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketType::Crypto => "CRYPTO",
            MarketType::Forex => "FOREX",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRYPTO" => Ok(MarketType::Crypto),
            "FOREX" => Ok(MarketType::Forex),
            other => Err(format!("unknown market type '{}'", other)),
        }
    }
}

/// A timestamped trading recommendation produced by the scanning service.
///
/// Everything except `is_read`, `is_favorite` and `created_at` comes from the
/// service and is never changed locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default)]
    pub id: Option<i64>,
    pub symbol: String,
    pub market_type: MarketType,
    pub strategy: String,
    #[serde(rename = "signal")]
    pub direction: SignalDirection,
    pub price: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub stop_loss: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub timestamp: String,
    pub timeframe: String,
    pub accuracy: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, Value>,
    pub all_conditions_met: bool,

    // SAR_SMA indicator values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sma_20: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sma_40: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sar: Option<f64>,

    // SUPERTREND_MA indicator values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ma_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ma_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_band: Option<f64>,

    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Time the service generated the signal, when its timestamp parses.
    ///
    /// The service emits naive ISO-8601 timestamps; those are read as UTC.
    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(ts.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(&self.timestamp, fmt).ok())
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
    }

    /// True when `self` contradicts a position opened in `direction` on the
    /// same symbol and strategy.
    pub fn is_opposite_of(&self, symbol: &str, strategy: &str, direction: SignalDirection) -> bool {
        self.symbol == symbol
            && self.strategy == strategy
            && self.direction == direction.opposite()
            && self.all_conditions_met
    }

    pub fn profit_pct(&self) -> f64 {
        match self.direction {
            SignalDirection::Long => (self.tp1 - self.price) / self.price * 100.0,
            SignalDirection::Short => (self.price - self.tp1) / self.price * 100.0,
        }
    }

    pub fn risk_reward(&self) -> f64 {
        let (profit, risk) = match self.direction {
            SignalDirection::Long => (self.tp1 - self.price, self.price - self.stop_loss),
            SignalDirection::Short => (self.price - self.tp1, self.stop_loss - self.price),
        };
        if risk != 0.0 {
            profit / risk
        } else {
            0.0
        }
    }
}

/// Order newest first: by service timestamp, then by local creation time.
pub fn sort_newest_first(signals: &mut [Signal]) {
    signals.sort_by(|a, b| {
        b.generated_at()
            .cmp(&a.generated_at())
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// Format a price with precision scaled to its magnitude.
pub fn format_price(price: f64) -> String {
    if price >= 1000.0 {
        format!("{:.2}", price)
    } else if price >= 1.0 {
        format!("{:.4}", price)
    } else {
        format!("{:.6}", price)
    }
}

/// Parameters of a scan request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub market_types: Vec<MarketType>,
    pub strategies: Vec<String>,
    pub timeframe: String,
    #[serde(default = "default_crypto_limit")]
    pub crypto_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forex_pairs: Option<Vec<String>>,
}

fn default_crypto_limit() -> u32 {
    30
}

/// Result of a scan. Not wrapped in the usual envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub success: bool,
    #[serde(default)]
    pub signals: Vec<Signal>,
    #[serde(rename = "scan_time")]
    pub scan_time_seconds: f64,
    pub total_symbols_scanned: u32,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
