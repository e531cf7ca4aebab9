//! Environment-driven configuration

use crate::core::scheduler::cron_expression;
use crate::error::ConfigError;
use crate::models::{MarketType, ScanRequest, SAR_SMA, SUPERTREND_MA};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Deployment environment name (`APP_ENV`), `sandbox` when unset
pub fn get_environment() -> String {
    env::var("APP_ENV").unwrap_or_else(|_| "sandbox".to_string())
}

pub fn is_production() -> bool {
    matches!(get_environment().as_str(), "production" | "prod")
}

/// Settings for the periodic opposite-signal check
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub interval_minutes: u64,
    pub timeframe: String,
    pub crypto_limit: u32,
    pub max_retries: usize,
    pub notify_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            timeframe: "5m".to_string(),
            crypto_limit: 50,
            max_retries: 3,
            notify_timeout: Duration::from_millis(5000),
        }
    }
}

impl MonitorConfig {
    /// The broad scan every cycle runs: both markets, both strategies.
    pub fn scan_request(&self) -> ScanRequest {
        ScanRequest {
            market_types: vec![MarketType::Crypto, MarketType::Forex],
            strategies: vec![SAR_SMA.to_string(), SUPERTREND_MA.to_string()],
            timeframe: self.timeframe.clone(),
            crypto_limit: self.crypto_limit,
            forex_pairs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub environment: String,
    pub api_base_url: Url,
    pub api_token: Option<String>,
    pub user_id: Option<i64>,
    pub database_url: Option<String>,
    pub port: u16,
    pub http_timeout: Duration,
    pub monitor: MonitorConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_url = get("API_BASE_URL").ok_or(ConfigError::Missing("API_BASE_URL"))?;
        let api_base_url = Url::parse(&raw_url).map_err(|e| ConfigError::Invalid {
            key: "API_BASE_URL",
            message: e.to_string(),
        })?;

        let defaults = MonitorConfig::default();
        let monitor = MonitorConfig {
            interval_minutes: parse_or(&get, "MONITOR_INTERVAL_MINUTES", defaults.interval_minutes)?,
            timeframe: get("MONITOR_TIMEFRAME").unwrap_or(defaults.timeframe),
            crypto_limit: parse_or(&get, "MONITOR_CRYPTO_LIMIT", defaults.crypto_limit)?,
            max_retries: parse_or(&get, "MONITOR_MAX_RETRIES", defaults.max_retries)?,
            notify_timeout: Duration::from_millis(parse_or(&get, "NOTIFY_TIMEOUT_MS", 5000u64)?),
        };
        cron_expression(monitor.interval_minutes)?;

        let user_id = match get("USER_ID") {
            Some(raw) => Some(raw.parse::<i64>().map_err(|e| ConfigError::Invalid {
                key: "USER_ID",
                message: e.to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            environment: get("APP_ENV").unwrap_or_else(|| "sandbox".to_string()),
            api_base_url,
            api_token: get("API_TOKEN"),
            user_id,
            database_url: get("DATABASE_URL"),
            port: parse_or(&get, "PORT", 8080u16)?,
            http_timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECONDS", 30u64)?),
            monitor,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
