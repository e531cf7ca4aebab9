//! Shared data models spanning the store, client and monitor layers.

pub mod api;
pub mod followed;
pub mod market;
pub mod signal;

pub use api::{ApiResponse, FollowSignalRequest, OppositeSignalDetection, RemoteFollowedSignal};
pub use followed::{CloseOutcome, ExitReason, FollowStatus, FollowedSignal, NewFollowedSignal};
pub use market::{MarketData, Statistics, UserConfig};
pub use signal::{
    format_price, sort_newest_first, MarketType, ScanRequest, ScanResponse, Signal,
    SignalDirection, TradeAction, SAR_SMA, SUPERTREND_MA, SUPPORTED_STRATEGIES,
};
