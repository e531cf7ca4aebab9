//! Unit tests for alert construction and delivery

use crate::fixtures::{followed, signal};
use signalwatch::error::NotifyError;
use signalwatch::models::{SignalDirection, SAR_SMA};
use signalwatch::services::{Alert, ChannelNotifier, LogNotifier, Notifier};
use std::sync::Arc;

#[test]
fn test_alert_text_for_long_position() {
    let record = followed(4, SignalDirection::Long, 1.2);
    let opposite = signal("EURUSD", SAR_SMA, SignalDirection::Short, 1.195);

    let alert = Alert::opposite_signal(&record, &opposite);

    assert_eq!(alert.dedup_key, "followed-4");
    assert_eq!(alert.title, "OPPOSITE SIGNAL: EURUSD");
    assert_eq!(
        alert.body,
        "SELL NOW! EURUSD SAR_SMA: SHORT signal detected at 1.1950"
    );
}

#[test]
fn test_alert_text_for_short_position() {
    let record = followed(5, SignalDirection::Short, 1.2);
    let opposite = signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2050);

    let alert = Alert::opposite_signal(&record, &opposite);
    assert!(alert.body.starts_with("BUY NOW!"));
    assert!(alert.body.ends_with("LONG signal detected at 1.2050"));
}

#[test]
fn test_log_notifier_accepts_alerts() {
    let record = followed(1, SignalDirection::Long, 1.2);
    let opposite = signal("EURUSD", SAR_SMA, SignalDirection::Short, 1.19);
    tokio_test::assert_ok!(tokio_test::block_on(
        LogNotifier.notify(Alert::opposite_signal(&record, &opposite))
    ));
}

#[tokio::test]
async fn test_channel_notifier_drops_repeats() {
    let (notifier, mut receiver) = ChannelNotifier::new(4);
    let record = followed(1, SignalDirection::Long, 1.2);
    let opposite = signal("EURUSD", SAR_SMA, SignalDirection::Short, 1.19);
    let alert = Alert::opposite_signal(&record, &opposite);

    notifier.notify(alert.clone()).await.unwrap();
    notifier.notify(alert.clone()).await.unwrap();

    assert_eq!(receiver.recv().await.unwrap(), alert);
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_channel_notifier_reports_full_and_closed() {
    let (notifier, receiver) = ChannelNotifier::new(1);
    let opposite = signal("EURUSD", SAR_SMA, SignalDirection::Short, 1.19);

    let first = Alert::opposite_signal(&followed(1, SignalDirection::Long, 1.2), &opposite);
    let second = Alert::opposite_signal(&followed(2, SignalDirection::Long, 1.2), &opposite);
    let third = Alert::opposite_signal(&followed(3, SignalDirection::Long, 1.2), &opposite);

    notifier.notify(first).await.unwrap();
    assert_eq!(notifier.notify(second.clone()).await, Err(NotifyError::Full));

    drop(receiver);
    assert_eq!(notifier.notify(third).await, Err(NotifyError::Closed));
}

#[tokio::test]
async fn test_channel_notifier_concurrent_repeats_deliver_once() {
    let (notifier, mut receiver) = ChannelNotifier::new(16);
    let notifier = Arc::new(notifier);
    let record = followed(1, SignalDirection::Long, 1.2);
    let opposite = signal("EURUSD", SAR_SMA, SignalDirection::Short, 1.19);
    let alert = Alert::opposite_signal(&record, &opposite);

    let sends: Vec<_> = (0..8)
        .map(|_| {
            let notifier = notifier.clone();
            let alert = alert.clone();
            tokio::spawn(async move { notifier.notify(alert).await })
        })
        .collect();
    for send in sends {
        send.await.unwrap().unwrap();
    }

    assert_eq!(receiver.recv().await.unwrap(), alert);
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_channel_notifier_forgets_oldest_keys() {
    let (notifier, mut receiver) = ChannelNotifier::with_dedup_capacity(8, 2);
    let opposite = signal("EURUSD", SAR_SMA, SignalDirection::Short, 1.19);
    let alerts: Vec<Alert> = (1..=3)
        .map(|id| Alert::opposite_signal(&followed(id, SignalDirection::Long, 1.2), &opposite))
        .collect();

    for alert in &alerts {
        notifier.notify(alert.clone()).await.unwrap();
    }
    notifier.notify(alerts[2].clone()).await.unwrap();
    notifier.notify(alerts[0].clone()).await.unwrap();

    let mut received = Vec::new();
    while let Ok(alert) = receiver.try_recv() {
        received.push(alert.dedup_key);
    }
    assert_eq!(
        received,
        vec!["followed-1", "followed-2", "followed-3", "followed-1"]
    );
}

