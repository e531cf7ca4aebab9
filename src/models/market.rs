use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::{MarketType, SUPPORTED_STRATEGIES};

/// Latest known price snapshot for one symbol (one row per symbol)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub market_type: MarketType,
    pub price: f64,
    pub price_change_24h: f64,
    pub price_change_percent_24h: f64,
    pub volume_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    #[serde(default = "Utc::now")]
    pub last_update_time: DateTime<Utc>,
}

/// Aggregate counters reported by the scanning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_signals: u32,
    pub crypto_signals: u32,
    pub forex_signals: u32,
    pub long_signals: u32,
    pub short_signals: u32,
    pub sar_sma_signals: u32,
    pub supertrend_ma_signals: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_time: Option<String>,
}

/// Scanner settings stored on the service side for the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub scan_interval_minutes: u32,
    pub active_strategies: Vec<String>,
    pub scan_crypto: bool,
    pub scan_forex: bool,
    pub timeframe: String,
    pub crypto_top_coins: u32,
    pub forex_pairs: Vec<String>,
    pub notifications_enabled: bool,
    pub auto_scan_enabled: bool,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            scan_interval_minutes: 5,
            active_strategies: SUPPORTED_STRATEGIES.iter().map(|s| s.to_string()).collect(),
            scan_crypto: true,
            scan_forex: true,
            timeframe: "5m".to_string(),
            crypto_top_coins: 30,
            forex_pairs: [
                "EURUSD", "GBPUSD", "USDJPY", "XAUUSD", "AUDUSD", "USDCAD", "USDCHF", "NZDUSD",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            notifications_enabled: true,
            auto_scan_enabled: false,
        }
    }
}
