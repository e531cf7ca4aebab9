//! Delivery of opposite-signal alerts

use crate::error::NotifyError;
use crate::models::{format_price, FollowedSignal, Signal};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One user-facing alert. `dedup_key` identifies the followed record, so a
/// sink may drop repeats for the same record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub dedup_key: String,
    pub title: String,
    pub body: String,
}

impl Alert {
    pub fn opposite_signal(followed: &FollowedSignal, opposite: &Signal) -> Self {
        Self {
            dedup_key: format!("followed-{}", followed.id),
            title: format!("OPPOSITE SIGNAL: {}", followed.symbol),
            body: format!(
                "{} NOW! {} {}: {} signal detected at {}",
                followed.required_action(),
                followed.symbol,
                followed.strategy,
                opposite.direction,
                format_price(opposite.price)
            ),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: Alert) -> Result<(), NotifyError> {
        info!(
            dedup_key = %alert.dedup_key,
            title = %alert.title,
            "Notifier: {}",
            alert.body
        );
        Ok(())
    }
}

/// Number of dedup keys a `ChannelNotifier` remembers by default
pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

/// Recently delivered dedup keys, oldest evicted first
struct DeliveredKeys {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DeliveredKeys {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    fn insert(&mut self, key: String) {
        if !self.seen.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}

/// Hands alerts to a consumer task over a bounded channel without waiting.
///
/// Alerts whose `dedup_key` is among the most recently delivered keys are
/// dropped. The check and the send happen under one lock.
pub struct ChannelNotifier {
    sender: mpsc::Sender<Alert>,
    delivered: Mutex<DeliveredKeys>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        Self::with_dedup_capacity(capacity, DEFAULT_DEDUP_CAPACITY)
    }

    pub fn with_dedup_capacity(
        capacity: usize,
        dedup_capacity: usize,
    ) -> (Self, mpsc::Receiver<Alert>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                delivered: Mutex::new(DeliveredKeys::new(dedup_capacity)),
            },
            receiver,
        )
    }
}

#[async_trait::async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, alert: Alert) -> Result<(), NotifyError> {
        let mut delivered = match self.delivered.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if delivered.contains(&alert.dedup_key) {
            debug!(dedup_key = %alert.dedup_key, "ChannelNotifier: duplicate alert dropped");
            return Ok(());
        }

        let key = alert.dedup_key.clone();
        match self.sender.try_send(alert) {
            Ok(()) => {
                delivered.insert(key);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(dedup_key = %key, "ChannelNotifier: channel full, alert dropped");
                Err(NotifyError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NotifyError::Closed),
        }
    }
}
