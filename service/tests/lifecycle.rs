//! End-to-end: create a sale, sell through it, audit, relay the events.

#![allow(clippy::unwrap_used)]

use chrono::Duration as ChronoDuration;
use flashsale_core::environment::Clock;
use flashsale_core::error::OrderError;
use flashsale_core::types::{
    FlashsaleStatus, NewFlashsale, OrderStatus, ProductId, SkuId, UserId,
};
use flashsale_service::config::RelayConfig;
use flashsale_service::{
    AdmissionConfig, FlashsaleService, OrderAdmissionOrchestrator, OutboxRelay, RetryPolicy,
};
use flashsale_testing::{
    FailPoint, InMemoryEventPublisher, InMemoryFlashsaleStore, InMemoryStockLedger, ManualClock,
    MockRiskEvaluator, SequentialIdGenerator, init_test_tracing, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

struct System {
    clock: ManualClock,
    ledger: InMemoryStockLedger,
    store: InMemoryFlashsaleStore,
    orchestrator: OrderAdmissionOrchestrator,
    service: FlashsaleService,
}

fn system() -> System {
    init_test_tracing();
    let clock = ManualClock::new(test_clock().now());
    let ledger = InMemoryStockLedger::new();
    let store = InMemoryFlashsaleStore::new();

    let orchestrator = OrderAdmissionOrchestrator::new(
        Arc::new(ledger.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(MockRiskEvaluator::allow()),
        Arc::new(clock.clone()),
        Arc::new(SequentialIdGenerator::new(500)),
        AdmissionConfig::default(),
    )
    .with_compensation_policy(RetryPolicy::new(1).with_initial_delay(Duration::from_millis(1)));
    let service = FlashsaleService::new(
        Arc::new(store.clone()),
        Arc::new(ledger.clone()),
        Arc::new(clock.clone()),
        Arc::clone(orchestrator.cache()),
    );

    System {
        clock,
        ledger,
        store,
        orchestrator,
        service,
    }
}

fn new_sale(clock: &ManualClock, total_stock: i32) -> NewFlashsale {
    let start = clock.now() + ChronoDuration::minutes(1);
    NewFlashsale {
        name: "Lunar headphones".into(),
        product_id: ProductId::new(8),
        sku_id: SkuId::new(80),
        original_price: 30_000,
        flash_price: 12_000,
        total_stock,
        limit_per_user: 1,
        start_time: start,
        end_time: start + ChronoDuration::minutes(30),
    }
}

#[tokio::test]
async fn sale_runs_from_creation_to_relay() {
    let s = system();
    let sale = s.service.create_flashsale(new_sale(&s.clock, 3)).await.unwrap();

    let early = s.orchestrator.place_order(UserId::new(1), sale.id, 1).await;
    assert_eq!(early, Err(OrderError::NotStarted(sale.id)));

    s.clock.advance(ChronoDuration::minutes(2));
    assert_eq!(
        s.service.get_flashsale(sale.id).await.unwrap().status,
        FlashsaleStatus::Ongoing
    );

    for user in 1..=4 {
        let _ = s.orchestrator.place_order(UserId::new(user), sale.id, 1).await;
    }
    let view = s.service.get_flashsale(sale.id).await.unwrap();
    assert_eq!(view.remaining_stock, 0);

    let audit = s.service.audit(sale.id).await.unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.sold_count, 3);

    let publisher = InMemoryEventPublisher::new();
    let (relay, _shutdown) = OutboxRelay::new(
        Arc::new(s.store.clone()),
        Arc::new(publisher.clone()),
        RelayConfig::default(),
    );
    let round = relay.relay_once().await.unwrap();
    assert_eq!(round.published, 3);
    assert!(publisher.published().iter().all(|e| e.topic == "flashsale.order.created"));

    s.clock.advance(ChronoDuration::hours(1));
    assert_eq!(
        s.service.get_flashsale(sale.id).await.unwrap().status,
        FlashsaleStatus::Ended
    );
}

#[tokio::test]
async fn audit_detects_a_failed_compensation() {
    let s = system();
    let sale = s.service.create_flashsale(new_sale(&s.clock, 5)).await.unwrap();
    s.clock.advance(ChronoDuration::minutes(2));

    s.store.fail_at(FailPoint::SaveOrder);
    s.ledger.fail_next_reverts(5);
    let err = s
        .orchestrator
        .place_order(UserId::new(1), sale.id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::CommitFailed { compensated: false, .. }));

    let audit = s.service.audit(sale.id).await.unwrap();
    assert_eq!(audit.drift, 1);
    assert!(!audit.is_consistent());
}

#[tokio::test]
async fn cancel_after_sellout_frees_a_unit() {
    let s = system();
    let sale = s.service.create_flashsale(new_sale(&s.clock, 1)).await.unwrap();
    s.clock.advance(ChronoDuration::minutes(2));

    let order = s
        .orchestrator
        .place_order(UserId::new(1), sale.id, 1)
        .await
        .unwrap();
    assert_eq!(
        s.orchestrator.place_order(UserId::new(2), sale.id, 1).await,
        Err(OrderError::SoldOut(sale.id))
    );

    s.orchestrator.cancel_order(order.id).await.unwrap();
    s.orchestrator
        .place_order(UserId::new(2), sale.id, 1)
        .await
        .unwrap();

    assert!(s.service.audit(sale.id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn failed_cancel_revert_is_left_to_the_audit() {
    let s = system();
    let sale = s.service.create_flashsale(new_sale(&s.clock, 3)).await.unwrap();
    s.clock.advance(ChronoDuration::minutes(2));
    let order = s
        .orchestrator
        .place_order(UserId::new(1), sale.id, 1)
        .await
        .unwrap();

    s.ledger.fail_next_reverts(5);
    let err = s.orchestrator.cancel_order(order.id).await.unwrap_err();
    assert!(matches!(err, OrderError::Ledger(_)));

    // The order is already cancelled, so a second cancel does not retry
    let reverts = s.ledger.revert_calls();
    s.orchestrator.cancel_order(order.id).await.unwrap();
    assert_eq!(s.ledger.revert_calls(), reverts);
    assert_eq!(s.store.orders()[0].status, OrderStatus::Cancelled);
    assert_eq!(s.ledger.remaining_now(sale.id), 2);

    let audit = s.service.audit(sale.id).await.unwrap();
    assert_eq!(audit.sold_count, 0);
    assert_eq!(audit.drift, 1);
}
