//! External services: the remote signal API and alert delivery

pub mod notifier;
pub mod signal_api;

pub use notifier::{Alert, ChannelNotifier, LogNotifier, Notifier};
pub use signal_api::{HttpSignalApi, SignalApi};
