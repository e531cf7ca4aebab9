//! Repository reconciliation and follow lifecycle

use crate::test_utils::{base_time, market_data, minutes, signal, Harness};
use signalwatch::db::{LocalStore, SignalFilter, StoreChange};
use signalwatch::error::{ApiError, RepositoryError};
use signalwatch::models::{
    ApiResponse, ExitReason, FollowStatus, MarketType, ScanResponse, SignalDirection, SAR_SMA,
    SUPERTREND_MA,
};
use signalwatch::config::MonitorConfig;

#[tokio::test]
async fn scan_persists_every_signal_and_returns_stored_rows() {
    let h = Harness::new();
    h.api.set_scan_signals(vec![
        signal("BTCUSDT", SAR_SMA, SignalDirection::Long, 65000.0),
        signal("EURUSD", SUPERTREND_MA, SignalDirection::Short, 1.08),
        signal("ETHUSDT", SAR_SMA, SignalDirection::Short, 3200.0),
    ]);

    let response = h
        .repository
        .perform_scan(&MonitorConfig::default().scan_request())
        .await
        .expect("scan succeeds");

    assert_eq!(response.signals.len(), 3);
    assert!(response.signals.iter().all(|s| s.id.is_some()));

    let stored = h.repository.all_signals().await.unwrap();
    assert_eq!(stored.len(), 3);
    for returned in &response.signals {
        assert!(stored.contains(returned));
    }
}

#[tokio::test]
async fn failed_batch_persists_nothing() {
    let h = Harness::new();
    h.api.set_scan_signals(vec![
        signal("BTCUSDT", SAR_SMA, SignalDirection::Long, 65000.0),
        signal("EURUSD", SUPERTREND_MA, SignalDirection::Short, 1.08),
    ]);
    h.store.fail_signal_upserts(true);

    let result = h
        .repository
        .perform_scan(&MonitorConfig::default().scan_request())
        .await;

    assert!(matches!(result, Err(RepositoryError::Persistence(_))));
    assert!(h.repository.all_signals().await.unwrap().is_empty());
}

#[tokio::test]
async fn mid_batch_fault_leaves_no_partial_write() {
    let h = Harness::new();
    h.api
        .set_scan_signals(vec![signal("XAUUSD", SAR_SMA, SignalDirection::Long, 2300.0)]);
    h.repository
        .perform_scan(&MonitorConfig::default().scan_request())
        .await
        .expect("first scan succeeds");

    h.api.set_scan_signals(vec![
        signal("BTCUSDT", SAR_SMA, SignalDirection::Long, 65000.0),
        signal("EURUSD", SUPERTREND_MA, SignalDirection::Short, 1.08),
        signal(" ", SAR_SMA, SignalDirection::Short, 3200.0),
        signal("ETHUSDT", SAR_SMA, SignalDirection::Short, 3200.0),
    ]);

    let result = h
        .repository
        .perform_scan(&MonitorConfig::default().scan_request())
        .await;

    assert!(matches!(result, Err(RepositoryError::Persistence(_))));
    let stored = h.repository.all_signals().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].symbol, "XAUUSD");
}

#[tokio::test]
async fn scan_transport_failure_is_retryable_and_writes_nothing() {
    let h = Harness::new();
    h.api
        .set_scan(Err(ApiError::Transport("connection reset".to_string())));

    let err = h
        .repository
        .perform_scan(&MonitorConfig::default().scan_request())
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(h.repository.all_signals().await.unwrap().is_empty());
}

#[tokio::test]
async fn unsuccessful_scan_is_a_remote_error() {
    let h = Harness::new();
    h.api.set_scan(Ok(ScanResponse {
        success: false,
        message: Some("scanner busy".to_string()),
        ..crate::test_utils::scan_response(vec![signal(
            "BTCUSDT",
            SAR_SMA,
            SignalDirection::Long,
            65000.0,
        )])
    }));

    let err = h
        .repository
        .perform_scan(&MonitorConfig::default().scan_request())
        .await
        .unwrap_err();

    assert_eq!(err, RepositoryError::Remote("scanner busy".to_string()));
    assert!(!err.is_retryable());
    assert!(h.repository.all_signals().await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_signals_maps_envelope_failures_to_remote() {
    let h = Harness::new();
    h.api.set_recent(Ok(ApiResponse::failure("Invalid token")));

    let err = h.repository.sync_signals(24).await.unwrap_err();
    assert_eq!(err, RepositoryError::Remote("Invalid token".to_string()));

    h.api.set_recent(Ok(ApiResponse {
        success: true,
        data: None,
        message: Some("empty".to_string()),
        error: None,
    }));
    let err = h.repository.sync_signals(24).await.unwrap_err();
    assert_eq!(err, RepositoryError::Remote("empty".to_string()));
}

#[tokio::test]
async fn sync_signals_persists_recent_signals() {
    let h = Harness::new();
    let mut recent = signal("GBPUSD", SAR_SMA, SignalDirection::Long, 1.27);
    recent.id = Some(41);
    h.api.set_recent(Ok(ApiResponse::ok(vec![recent])));

    let synced = h.repository.sync_signals(6).await.unwrap();

    assert_eq!(synced.len(), 1);
    let stored = h.repository.signal(41).await.unwrap();
    assert_eq!(stored.symbol, "GBPUSD");
}

#[tokio::test]
async fn market_data_and_price_are_reconciled_into_the_store() {
    let h = Harness::new();
    h.api.set_market(Ok(ApiResponse::ok(vec![
        market_data("ETHUSDT", 3200.0, base_time()),
        market_data("BTCUSDT", 65000.0, base_time()),
    ])));
    h.api
        .set_price(Ok(ApiResponse::ok(market_data("SOLUSDT", 150.0, base_time()))));

    h.repository.fetch_market_data(None).await.unwrap();
    let price = h.repository.current_price("SOLUSDT").await.unwrap();
    assert_eq!(price.price, 150.0);

    let all = h.repository.all_market_data().await.unwrap();
    let symbols: Vec<&str> = all.iter().map(|d| d.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);

    let crypto = h
        .repository
        .market_data_by_type(MarketType::Crypto)
        .await
        .unwrap();
    assert_eq!(crypto.len(), 3);

    let found = h.repository.search_market_data("usdt").await.unwrap();
    assert_eq!(found.len(), 3);
    let eth = h.repository.search_market_data("Eth").await.unwrap();
    assert_eq!(eth.len(), 1);
    assert_eq!(eth[0].symbol, "ETHUSDT");
}

#[tokio::test]
async fn purge_removes_only_stale_market_data() {
    let h = Harness::new();
    h.store
        .upsert_market_data(&[
            market_data("OLD", 1.0, base_time() - minutes(120)),
            market_data("NEW", 2.0, base_time()),
        ])
        .await
        .unwrap();

    let purged = h
        .repository
        .purge_market_data_before(base_time() - minutes(60))
        .await
        .unwrap();

    assert_eq!(purged, 1);
    let left = h.repository.all_market_data().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].symbol, "NEW");
}

#[tokio::test]
async fn following_twice_is_rejected_until_closed() {
    let h = Harness::new();
    let followed = h
        .follow(signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2))
        .await;
    let source = h.repository.signal(followed.signal_id).await.unwrap();

    let err = h.repository.follow_signal(&source).await.unwrap_err();
    assert_eq!(err, RepositoryError::DuplicateFollow(followed.signal_id));

    h.repository
        .stop_following(followed.id, ExitReason::Manual, Some(1.21))
        .await
        .unwrap();

    let again = h.repository.follow_signal(&source).await.unwrap();
    assert_ne!(again.id, followed.id);
    assert!(again.is_active);
    assert_eq!(h.repository.active_followed_count().await.unwrap(), 1);
}

#[tokio::test]
async fn follow_copies_signal_fields() {
    let h = Harness::new();
    let followed = h
        .follow(signal("BTCUSDT", SUPERTREND_MA, SignalDirection::Short, 65000.0))
        .await;

    assert_eq!(followed.symbol, "BTCUSDT");
    assert_eq!(followed.strategy, SUPERTREND_MA);
    assert_eq!(followed.direction, SignalDirection::Short);
    assert_eq!(followed.entry_price, 65000.0);
    assert_eq!(followed.timeframe, "5m");
    assert_eq!(followed.status(), FollowStatus::Following);
    assert!(!followed.opposite_signal_detected);
}

#[tokio::test]
async fn followed_record_survives_source_signal_deletion() {
    let h = Harness::new();
    let followed = h
        .follow(signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2))
        .await;

    h.repository.delete_signal(followed.signal_id).await.unwrap();

    let record = h.followed(followed.id).await;
    assert_eq!(record.symbol, "EURUSD");
    assert_eq!(record.entry_price, 1.2);
}

#[tokio::test]
async fn follow_by_unknown_signal_id_is_not_found() {
    let h = Harness::new();
    let err = h.repository.follow_signal_by_id(999).await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound(_)));
}

#[tokio::test]
async fn second_close_keeps_the_first_exit() {
    let h = Harness::new();
    let followed = h
        .follow(signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2))
        .await;

    let first = h
        .repository
        .stop_following(followed.id, ExitReason::Manual, Some(1.25))
        .await
        .unwrap();
    let second = h
        .repository
        .stop_following(followed.id, ExitReason::OppositeSignal, Some(1.19))
        .await
        .unwrap();

    assert_eq!(first.exit_reason, Some(ExitReason::Manual));
    assert_eq!(second, first);
    let pct = second.profit_loss_pct().unwrap();
    assert!((pct - 4.1666).abs() < 0.01);
}

#[tokio::test]
async fn closing_unknown_record_is_not_found() {
    let h = Harness::new();
    let err = h
        .repository
        .stop_following(404, ExitReason::Manual, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound(_)));
}

#[tokio::test]
async fn clear_inactive_keeps_active_records() {
    let h = Harness::new();
    let open = h
        .follow(signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2))
        .await;
    let closed = h
        .follow(signal("GBPUSD", SAR_SMA, SignalDirection::Short, 1.27))
        .await;
    h.repository
        .stop_following(closed.id, ExitReason::StopLoss, Some(1.28))
        .await
        .unwrap();

    assert_eq!(h.repository.clear_inactive_followed().await.unwrap(), 1);
    let all = h.repository.all_followed_signals().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, open.id);
}

#[tokio::test]
async fn local_flags_and_queries() {
    let h = Harness::new();
    let stored = h
        .store
        .upsert_signals(&[
            signal("BTCUSDT", SAR_SMA, SignalDirection::Long, 65000.0),
            signal("EURUSD", SUPERTREND_MA, SignalDirection::Short, 1.08),
        ])
        .await
        .unwrap();
    let btc = stored[0].id.unwrap();

    assert_eq!(h.repository.unread_count().await.unwrap(), 2);
    h.repository.mark_signal_read(btc).await.unwrap();
    assert_eq!(h.repository.unread_count().await.unwrap(), 1);

    h.repository.toggle_favorite(btc, true).await.unwrap();
    let favorites = h.repository.favorite_signals().await.unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].symbol, "BTCUSDT");

    assert_eq!(h.repository.search_signals("EUR").await.unwrap().len(), 1);
    assert_eq!(
        h.repository
            .signals_by_direction(SignalDirection::Short)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        h.repository
            .signals(&SignalFilter::Strategy(SAR_SMA.to_string()))
            .await
            .unwrap()
            .len(),
        1
    );

    assert_eq!(h.repository.delete_all_signals().await.unwrap(), 2);
    assert!(h.repository.all_signals().await.unwrap().is_empty());
}

#[tokio::test]
async fn subscribers_see_followed_changes() {
    let h = Harness::new();
    let mut changes = h.repository.subscribe();

    h.follow(signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2))
        .await;

    let mut seen = Vec::new();
    while let Ok(change) = changes.try_recv() {
        seen.push(change);
    }
    assert!(seen.contains(&StoreChange::Signals));
    assert!(seen.contains(&StoreChange::FollowedSignals));
}

#[tokio::test]
async fn remote_follow_sends_account_and_signal_fields() {
    let h = Harness::new();
    let mut source = signal("EURUSD", SAR_SMA, SignalDirection::Long, 1.2);
    source.id = Some(12);

    let err = h.repository.remote_follow(&source).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Remote(_)));

    let requests = h.api.follow_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].signal_id, 12);
    assert_eq!(requests[0].user_id, 7);
    assert_eq!(requests[0].signal_type, SignalDirection::Long);
    assert_eq!(requests[0].entry_price, 1.2);
}

#[tokio::test]
async fn health_check_reports_transport_failures() {
    let h = Harness::new();
    assert!(h.repository.check_api_health().await.unwrap());

    h.api.set_healthy(false);
    let err = h.repository.check_api_health().await.unwrap_err();
    assert!(err.is_retryable());
}
