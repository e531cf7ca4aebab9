//! Followed trading-signal monitor: local store, remote signal client,
//! reconciling repository and the opposite-signal monitor cycle.

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod services;
