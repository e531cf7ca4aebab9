//! Unit tests for the in-memory store

use crate::fixtures::{at, new_followed, signal, stored};
use chrono::Duration;
use signalwatch::db::{FollowedFilter, InMemoryStore, LocalStore, SignalFilter, StoreChange};
use signalwatch::error::StoreError;
use signalwatch::models::{
    CloseOutcome, ExitReason, MarketData, MarketType, SignalDirection, SAR_SMA, SUPERTREND_MA,
};

fn snapshot(symbol: &str, market_type: MarketType, minutes_old: i64) -> MarketData {
    MarketData {
        symbol: symbol.to_string(),
        market_type,
        price: 1.0,
        price_change_24h: 0.0,
        price_change_percent_24h: 0.0,
        volume_24h: 0.0,
        high_24h: 1.0,
        low_24h: 1.0,
        last_update_time: at(12, 0) - Duration::minutes(minutes_old),
    }
}

#[tokio::test]
async fn test_upsert_assigns_ids_and_replaces_existing() {
    let store = InMemoryStore::new();
    let first = store
        .upsert_signals(&[
            signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2),
            stored(signal("GBPUSD", SAR_SMA, SignalDirection::Long, 1.27), 40),
            signal("BTCUSDT", SAR_SMA, SignalDirection::Short, 65000.0),
        ])
        .await
        .unwrap();

    assert_eq!(first[0].id, Some(1));
    assert_eq!(first[1].id, Some(40));
    assert_eq!(first[2].id, Some(41));

    let mut replacement = first[1].clone();
    replacement.price = 1.28;
    store.upsert_signals(&[replacement]).await.unwrap();

    assert_eq!(store.get_signal(40).await.unwrap().unwrap().price, 1.28);
    assert_eq!(store.list_signals(&SignalFilter::All).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_list_signals_newest_first_with_filters() {
    let store = InMemoryStore::new();
    let mut early = signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2);
    early.created_at = at(9, 0);
    let mut late = signal("BTCUSDT", SUPERTREND_MA, SignalDirection::Short, 65000.0);
    late.created_at = at(11, 0);
    store.upsert_signals(&[early, late]).await.unwrap();

    let all = store.list_signals(&SignalFilter::All).await.unwrap();
    assert_eq!(all[0].symbol, "BTCUSDT");
    assert_eq!(all[1].symbol, "EURUSD");

    let crypto = store
        .list_signals(&SignalFilter::Market(MarketType::Crypto))
        .await
        .unwrap();
    assert_eq!(crypto.len(), 1);

    let since = store
        .list_signals(&SignalFilter::Since(at(10, 0)))
        .await
        .unwrap();
    assert_eq!(since.len(), 1);
    assert_eq!(since[0].symbol, "BTCUSDT");

    let forex = store
        .list_signals(&SignalFilter::Search("FOREX".to_string()))
        .await
        .unwrap();
    assert_eq!(forex.len(), 1);
    assert_eq!(forex[0].symbol, "EURUSD");
}

#[tokio::test]
async fn test_generated_ids_skip_explicit_ids_in_the_batch() {
    let store = InMemoryStore::new();
    let batch = store
        .upsert_signals(&[
            signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2),
            stored(signal("GBPUSD", SAR_SMA, SignalDirection::Long, 1.27), 1),
        ])
        .await
        .unwrap();

    assert_eq!(batch[0].id, Some(2));
    assert_eq!(batch[1].id, Some(1));
    assert_eq!(store.list_signals(&SignalFilter::All).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_ids_of_deleted_signals_are_not_reused() {
    let store = InMemoryStore::new();
    let first = store
        .upsert_signals(&[
            signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2),
            signal("GBPUSD", SAR_SMA, SignalDirection::Long, 1.27),
        ])
        .await
        .unwrap();
    let newest = first[1].id.unwrap();
    store
        .insert_followed(new_followed(newest, "GBPUSD", SignalDirection::Long))
        .await
        .unwrap();
    store.delete_signal(newest).await.unwrap();

    let next = store
        .upsert_signals(&[signal("USDJPY", SAR_SMA, SignalDirection::Short, 151.0)])
        .await
        .unwrap();

    let id = next[0].id.unwrap();
    assert!(id > newest);
    assert!(!store.is_following(id).await.unwrap());
}

#[tokio::test]
async fn test_blank_symbol_fails_the_whole_batch() {
    let store = InMemoryStore::new();
    let result = store
        .upsert_signals(&[
            signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2),
            signal("GBPUSD", SAR_SMA, SignalDirection::Long, 1.27),
            signal("", SAR_SMA, SignalDirection::Long, 1.0),
        ])
        .await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert!(store.list_signals(&SignalFilter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_ignores_case() {
    let store = InMemoryStore::new();
    store
        .upsert_signals(&[
            signal("BTCUSDT", SUPERTREND_MA, SignalDirection::Long, 65000.0),
            signal("EURUSD", SAR_SMA, SignalDirection::Short, 1.08),
        ])
        .await
        .unwrap();

    let btc = store
        .list_signals(&SignalFilter::Search("btc".to_string()))
        .await
        .unwrap();
    assert_eq!(btc.len(), 1);
    assert_eq!(btc[0].symbol, "BTCUSDT");

    let strategy = store
        .list_signals(&SignalFilter::Search("supertrend".to_string()))
        .await
        .unwrap();
    assert_eq!(strategy.len(), 1);

    store
        .upsert_market_data(&[
            snapshot("BTCUSDT", MarketType::Crypto, 0),
            snapshot("ETHUSDT", MarketType::Crypto, 0),
            snapshot("EURUSD", MarketType::Forex, 0),
        ])
        .await
        .unwrap();
    let usdt = store.search_market_data("usdt").await.unwrap();
    let symbols: Vec<&str> = usdt.iter().map(|d| d.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
}

#[tokio::test]
async fn test_flags_on_missing_signal_are_not_found() {
    let store = InMemoryStore::new();
    assert!(matches!(
        store.mark_signal_read(3).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.set_favorite(3, true).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.delete_signal(3).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_market_data_ordering_and_purge() {
    let store = InMemoryStore::new();
    store
        .upsert_market_data(&[
            snapshot("XAUUSD", MarketType::Forex, 5),
            snapshot("BTCUSDT", MarketType::Crypto, 90),
            snapshot("ETHUSDT", MarketType::Crypto, 10),
        ])
        .await
        .unwrap();

    let all = store.list_market_data(None).await.unwrap();
    let symbols: Vec<&str> = all.iter().map(|d| d.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "XAUUSD"]);

    let forex = store
        .list_market_data(Some(MarketType::Forex))
        .await
        .unwrap();
    assert_eq!(forex.len(), 1);

    let purged = store
        .purge_market_data_before(at(12, 0) - Duration::minutes(60))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(store.get_market_data("BTCUSDT").await.unwrap().is_none());
}

#[tokio::test]
async fn test_one_active_follow_per_signal() {
    let store = InMemoryStore::new();
    let id = store
        .insert_followed(new_followed(7, "EURUSD", SignalDirection::Long))
        .await
        .unwrap();

    let duplicate = store
        .insert_followed(new_followed(7, "EURUSD", SignalDirection::Long))
        .await;
    assert!(matches!(
        duplicate,
        Err(StoreError::DuplicateFollow { signal_id: 7 })
    ));
    assert!(store.is_following(7).await.unwrap());
    assert_eq!(store.follow_active(7).await.unwrap().unwrap().id, id);

    store
        .close_followed(id, at(13, 0), ExitReason::Manual, None)
        .await
        .unwrap();
    assert!(!store.is_following(7).await.unwrap());

    let second = store
        .insert_followed(new_followed(7, "EURUSD", SignalDirection::Long))
        .await
        .unwrap();
    assert_ne!(second, id);
    assert_eq!(store.active_followed_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_latch_is_set_once_and_only_while_active() {
    let store = InMemoryStore::new();
    let id = store
        .insert_followed(new_followed(1, "EURUSD", SignalDirection::Long))
        .await
        .unwrap();

    assert!(store.mark_opposite_detected(id, 1.19, at(12, 5)).await.unwrap());
    assert!(!store.mark_opposite_detected(id, 1.18, at(12, 10)).await.unwrap());

    let record = store.get_followed(id).await.unwrap().unwrap();
    assert_eq!(record.opposite_signal_price, Some(1.19));
    assert_eq!(record.opposite_signal_time, Some(at(12, 5)));

    let closed = store
        .insert_followed(new_followed(2, "GBPUSD", SignalDirection::Short))
        .await
        .unwrap();
    store
        .close_followed(closed, at(12, 30), ExitReason::StopLoss, Some(1.3))
        .await
        .unwrap();
    assert!(!store.mark_opposite_detected(closed, 1.25, at(12, 40)).await.unwrap());

    assert!(matches!(
        store.mark_opposite_detected(999, 1.0, at(12, 0)).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_close_is_compare_and_swap() {
    let store = InMemoryStore::new();
    let id = store
        .insert_followed(new_followed(1, "EURUSD", SignalDirection::Long))
        .await
        .unwrap();

    let first = store
        .close_followed(id, at(13, 0), ExitReason::TakeProfit, Some(1.25))
        .await
        .unwrap();
    let second = store
        .close_followed(id, at(14, 0), ExitReason::Manual, Some(1.1))
        .await
        .unwrap();

    let CloseOutcome::Closed(record) = first else {
        panic!("first close should close");
    };
    assert_eq!(record.exited_at, Some(at(13, 0)));
    assert_eq!(second, CloseOutcome::AlreadyClosed(record));
}

#[tokio::test]
async fn test_followed_filters() {
    let store = InMemoryStore::new();
    let eur = store
        .insert_followed(new_followed(1, "EURUSD", SignalDirection::Long))
        .await
        .unwrap();
    let gbp = store
        .insert_followed(new_followed(2, "GBPUSD", SignalDirection::Long))
        .await
        .unwrap();
    let old = store
        .insert_followed(new_followed(3, "EURUSD", SignalDirection::Short))
        .await
        .unwrap();
    store
        .close_followed(old, at(12, 30), ExitReason::Manual, None)
        .await
        .unwrap();
    store.mark_opposite_detected(gbp, 1.26, at(12, 20)).await.unwrap();

    let active = store.list_followed(&FollowedFilter::Active).await.unwrap();
    assert_eq!(active.len(), 2);

    let all = store.list_followed(&FollowedFilter::All).await.unwrap();
    assert_eq!(all.len(), 3);

    let eur_active = store
        .list_followed(&FollowedFilter::SymbolStrategy {
            symbol: "EURUSD".to_string(),
            strategy: SAR_SMA.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(eur_active.len(), 1);
    assert_eq!(eur_active[0].id, eur);

    let latched = store
        .list_followed(&FollowedFilter::OppositeDetected)
        .await
        .unwrap();
    assert_eq!(latched.len(), 1);
    assert_eq!(latched[0].id, gbp);

    assert_eq!(store.delete_inactive_followed().await.unwrap(), 1);
    assert!(store.get_followed(old).await.unwrap().is_none());
}

#[tokio::test]
async fn test_writes_notify_subscribers() {
    let store = InMemoryStore::new();
    let mut changes = store.subscribe();

    store
        .upsert_signals(&[signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2)])
        .await
        .unwrap();
    store
        .upsert_market_data(&[snapshot("EURUSD", MarketType::Forex, 0)])
        .await
        .unwrap();
    store
        .insert_followed(new_followed(1, "EURUSD", SignalDirection::Long))
        .await
        .unwrap();

    assert_eq!(changes.recv().await.unwrap(), StoreChange::Signals);
    assert_eq!(changes.recv().await.unwrap(), StoreChange::MarketData);
    assert_eq!(changes.recv().await.unwrap(), StoreChange::FollowedSignals);
}
