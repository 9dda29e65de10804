//! End-to-end flows across the stores, mutation pipeline, outbox, snapshots,
//! replay and the scheduler.
//!
//! Verifies:
//! - A committed mutation lands record, stream, ledger and outbox together, or not at all
//! - Concurrent allocations never oversell, and replay agrees with the winner
//! - Replay from a daily snapshot matches the live state
//! - A commit stamped earlier than one already committed takes the later time
//! - The outbox reaches subscribers in per-SKU order

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::Value as JsonValue;

use stockledger_core::{AggregateRoot, DomainError, OperatorId, Sku};
use stockledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockledger_inventory::{HoldType, PlaceHold, SnapshotReason, SnapshotType, StockStatus};

use crate::event_store::EventStore;
use crate::inbound::InboundHandler;
use crate::jobs::{InMemoryJobRecordStore, JobRecordStore, JobScheduler, RunStatus};
use crate::mutation::{MutationContext, MutationError, MutationService};
use crate::outbox::{BusTransport, OutboxPublishJob, OutboxPublisher};
use crate::replay::ReplayEngine;
use crate::retention::{HoldExpiryJob, LedgerRetentionJob, OutboxRetentionJob};
use crate::snapshots::{
    close_of_day, DailySnapshotJob, PeriodEndSnapshotJob, SnapshotRetentionJob, SnapshotService,
};
use crate::store::{
    InMemoryStockStore, LedgerStore, OutboxStore, SnapshotStore, StockStore, StoreError,
};

type Store = Arc<InMemoryStockStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

fn sku(raw: &str) -> Sku {
    Sku::parse(raw).unwrap()
}

fn day(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, d, h, 0, 0).unwrap()
}

fn ctx(at: DateTime<Utc>) -> MutationContext {
    MutationContext::new(OperatorId::new("clerk-7")).at(at)
}

fn setup() -> (Store, Arc<MutationService<Store>>) {
    let store = Arc::new(InMemoryStockStore::new());
    let service = Arc::new(MutationService::new(store.clone()));
    (store, service)
}

#[test]
fn receive_allocate_pick_and_hold_scenarios() {
    let (_, service) = setup();
    let s = sku("SKU-1");

    service.create(&s, 0, &ctx(day(1, 8))).unwrap();
    let received = service.receive(&s, 100, &ctx(day(1, 9))).unwrap().record;
    assert_eq!(received.stock_by_status().get(StockStatus::Available), 100);
    assert_eq!(received.quantity_on_hand(), 100);
    assert_eq!(received.atp(), 100);

    let hold = PlaceHold::new(HoldType::QualityHold, 40, "inspection", None);
    let held = service.place_hold(&s, hold, &ctx(day(1, 10))).unwrap();
    assert_eq!(held.record.atp(), 60);
    let hold_id = held.record.active_holds()[0].id;
    service.release_hold(&s, hold_id, &ctx(day(1, 11))).unwrap();

    let allocated = service.allocate(&s, 30, &ctx(day(1, 12))).unwrap().record;
    assert_eq!(allocated.quantity_allocated(), 30);
    assert_eq!(allocated.atp(), 70);

    let picked = service.process_pick(&s, 20, &ctx(day(1, 13))).unwrap().record;
    assert_eq!(picked.stock_by_status().get(StockStatus::Available), 80);
    assert_eq!(picked.quantity_on_hand(), 80);
    assert_eq!(picked.quantity_allocated(), 10);
    assert_eq!(picked.atp(), 70);
}

#[test]
fn replay_from_daily_snapshot_matches_live_state() {
    let (store, service) = setup();
    let snapshots = SnapshotService::new(store.clone());
    let s = sku("SKU-REPLAY");

    // Day 1, then the nightly snapshot of it just after midnight.
    service.create(&s, 0, &ctx(day(1, 8))).unwrap();
    service.receive(&s, 100, &ctx(day(1, 9))).unwrap();
    service.allocate(&s, 30, &ctx(day(1, 15))).unwrap();
    let report = snapshots.run_daily(day(2, 0)).unwrap();
    assert_eq!(report.created, 1);

    // Day 2; note the live state at its close.
    service.receive(&s, 50, &ctx(day(2, 9))).unwrap();
    service.allocate(&s, 20, &ctx(day(2, 14))).unwrap();
    let end_of_day_2 = day(2, 23);
    let live = service.get(&s).unwrap().unwrap();

    // Day 3 must not leak into the replay.
    service.receive(&s, 10, &ctx(day(3, 9))).unwrap();

    let day_1 = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
    let baseline = store.latest_before(&s, end_of_day_2).unwrap().unwrap();
    assert_eq!(baseline.snapshot_type, SnapshotType::Daily);
    assert_eq!(Some(baseline.snapshot_timestamp), close_of_day(day_1));
    assert_eq!(baseline.last_sequence_number, 3);
    let window = store
        .load_window(&s, baseline.last_sequence_number, end_of_day_2)
        .unwrap();
    assert!(!window.is_empty());
    let day_2 = NaiveDate::from_ymd_opt(2024, 10, 2).unwrap();
    assert!(window.iter().all(|e| e.occurred_at.date_naive() == day_2));

    let engine = ReplayEngine::new(store.clone(), store.clone());
    let replayed = engine
        .state_at(&s, end_of_day_2, SnapshotReason::Investigation, OperatorId::system())
        .unwrap();

    assert_eq!(replayed.snapshot_type, SnapshotType::AdHoc);
    assert_eq!(replayed.snapshot_timestamp, end_of_day_2);
    assert_eq!(replayed.state(), *live.state());
    assert_eq!(replayed.quantity_on_hand, 150);
    assert_eq!(replayed.quantity_allocated, 50);
    assert_eq!(service.get(&s).unwrap().unwrap().quantity_on_hand(), 160);
}

#[test]
fn concurrent_allocations_never_oversell() {
    for round in 0..20 {
        let (store, service) = setup();
        let s = sku("SKU-RACE");
        service.create(&s, 10, &ctx(day(6, 8))).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                let barrier = barrier.clone();
                let s = s.clone();
                thread::spawn(move || {
                    barrier.wait();
                    service.allocate(&s, 10, &ctx(day(6, 9)))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1, "round {round}: {results:?}");
        assert!(results.iter().any(|r| matches!(
            r,
            Err(MutationError::Domain(DomainError::InsufficientStock { .. }))
                | Err(MutationError::Concurrency { .. })
        )));

        let record = store.load(&s).unwrap().unwrap();
        assert_eq!(record.quantity_allocated(), 10);
        assert_eq!(record.atp(), 0);
        assert_eq!(record.version(), 2);
        assert_eq!(store.entries(&s, None, None).unwrap().len(), 2);

        let engine = ReplayEngine::new(store.clone(), store.clone());
        let replayed = engine
            .state_at(&s, day(6, 10), SnapshotReason::Reconciliation, OperatorId::system())
            .unwrap();
        assert_eq!(replayed.state(), *record.state(), "round {round}");
        assert_eq!(replayed.last_sequence_number, 2);
    }
}

#[test]
fn interleaved_commits_replay_and_publish_in_commit_order() {
    let (store, service) = setup();
    let a = sku("SKU-LATE");
    let b = sku("SKU-OTHER");
    service.create(&a, 100, &ctx(day(7, 8))).unwrap();

    // Two writers: the allocation stamped 10:00 commits first, then the receipt
    // stamped 09:00 lands on top of it.
    let allocated = service.allocate(&a, 30, &ctx(day(7, 10))).unwrap();
    let received = service.receive(&a, 50, &ctx(day(7, 9))).unwrap();
    service.create(&b, 5, &ctx(day(7, 9))).unwrap();

    assert_eq!(allocated.change.occurred_at, day(7, 10));
    assert_eq!(received.change.occurred_at, day(7, 10));
    assert_eq!(received.ledger_entry.timestamp, day(7, 10));

    let stream = store.load_stream(&a).unwrap();
    assert!(stream.windows(2).all(|w| w[0].occurred_at <= w[1].occurred_at));
    let ledger = store.entries(&a, None, None).unwrap();
    assert!(ledger.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let engine = ReplayEngine::new(store.clone(), store.clone());
    let replay_at = |at| {
        engine
            .state_at(&a, at, SnapshotReason::Investigation, OperatorId::system())
            .unwrap()
    };
    let live = service.get(&a).unwrap().unwrap();
    let end = replay_at(day(7, 12));
    assert_eq!(end.state(), *live.state());
    assert_eq!(end.quantity_on_hand, 150);
    assert_eq!(end.quantity_allocated, 30);

    let before_both = replay_at(day(7, 9));
    assert_eq!(before_both.quantity_on_hand, 100);
    assert_eq!(before_both.quantity_allocated, 0);

    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let subscription = bus.subscribe();
    let publisher = OutboxPublisher::new(store.clone(), BusTransport::new(bus.clone()));
    assert_eq!(publisher.publish_pending(day(7, 12)).unwrap().delivered, 4);

    let delivered: Vec<u64> = subscription
        .drain()
        .iter()
        .filter(|e| e.sku() == &a)
        .map(|e| e.sequence_number())
        .collect();
    assert_eq!(delivered, vec![1, 2, 3]);
}

#[test]
fn failed_commit_leaves_no_partial_writes() {
    let (store, service) = setup();
    let s = sku("SKU-ATOMIC");
    service.create(&s, 10, &ctx(day(4, 8))).unwrap();
    let before = store.load(&s).unwrap().unwrap();

    store.fail_next_commit();
    let err = service.receive(&s, 5, &ctx(day(4, 9))).unwrap_err();

    assert!(matches!(err, MutationError::Store(StoreError::Storage(_))));
    assert_eq!(store.load(&s).unwrap().unwrap(), before);
    assert_eq!(store.load_stream(&s).unwrap().len(), 1);
    assert_eq!(store.entries(&s, None, None).unwrap().len(), 1);
    assert_eq!(store.unpublished_count().unwrap(), 1);

    // The store recovers and the next attempt goes through.
    let outcome = service.receive(&s, 5, &ctx(day(4, 10))).unwrap();
    assert_eq!(outcome.record.quantity_on_hand(), 15);
    assert_eq!(outcome.events[0].sequence_number, 2);
}

#[test]
fn inbound_messages_flow_through_the_outbox_to_subscribers() {
    let (store, service) = setup();
    let a = sku("SKU-A");
    let b = sku("SKU-B");
    service.create(&a, 20, &MutationContext::system()).unwrap();
    service.create(&b, 20, &MutationContext::system()).unwrap();

    let inbound = InboundHandler::new(service.clone());
    inbound
        .handle_json(r#"{"type":"AllocationRequested","sku":"SKU-A","quantity":5,"orderId":"SO-1"}"#)
        .unwrap();
    inbound
        .handle_json(r#"{"type":"ItemPicked","sku":"SKU-A","quantity":5,"orderId":"SO-1"}"#)
        .unwrap();
    inbound
        .handle_json(r#"{"type":"AllocationRequested","sku":"SKU-B","quantity":3,"orderId":"SO-2"}"#)
        .unwrap();
    inbound
        .handle_json(r#"{"type":"ExternalCancellation","sku":"SKU-B","quantity":3,"orderId":"SO-2"}"#)
        .unwrap();

    let ledger = store.entries(&a, None, None).unwrap();
    assert_eq!(ledger.last().unwrap().source_reference.as_deref(), Some("SO-1"));

    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let subscription = bus.subscribe();
    let publisher = OutboxPublisher::new(store.clone(), BusTransport::new(bus.clone()));

    let report = publisher.publish_pending(Utc::now()).unwrap();
    assert_eq!(report.delivered, 6);
    assert_eq!(store.unpublished_count().unwrap(), 0);

    let received = subscription.drain();
    assert_eq!(received.len(), 6);
    for target in [&a, &b] {
        let sequence: Vec<u64> = received
            .iter()
            .filter(|e| e.sku() == target)
            .map(|e| e.sequence_number())
            .collect();
        assert_eq!(sequence, vec![1, 2, 3], "{target}");
    }
    assert!(received
        .iter()
        .all(|e| e.event_type() == "inventory.stock.level_changed"));
}

#[test]
fn expired_holds_are_released_by_the_job_and_restore_atp() {
    let (store, service) = setup();
    let s = sku("SKU-HOLD");
    service.create(&s, 50, &ctx(day(5, 8))).unwrap();
    service
        .place_hold(
            &s,
            PlaceHold::new(HoldType::CustomerReserve, 20, "vip", Some(day(5, 12))),
            &ctx(day(5, 9)),
        )
        .unwrap();
    assert_eq!(service.atp(&s).unwrap(), 30);

    let job = HoldExpiryJob::new(service.clone(), StdDuration::from_secs(60));
    assert_eq!(job.release_expired(day(5, 11)).unwrap(), (0, 0));
    assert_eq!(job.release_expired(day(5, 13)).unwrap(), (1, 0));

    assert_eq!(service.atp(&s).unwrap(), 50);
    let types: Vec<String> = store
        .load_stream(&s)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types.iter().rev().take(2).map(String::as_str).collect::<Vec<_>>(),
        vec!["inventory.stock.level_changed", "inventory.hold.released"]
    );
}

#[test]
fn scheduler_runs_every_job_once_per_window() {
    let (store, service) = setup();
    let s = sku("SKU-JOBS");
    service.create(&s, 5, &ctx(day(29, 8))).unwrap();

    let snapshots = Arc::new(SnapshotService::new(store.clone()));
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let records = InMemoryJobRecordStore::arc();

    let mut scheduler = JobScheduler::new(records.clone());
    scheduler
        .register(OutboxPublishJob::new(
            OutboxPublisher::new(store.clone(), BusTransport::new(bus.clone())),
            StdDuration::from_secs(5),
        ))
        .register(DailySnapshotJob::new(snapshots.clone(), 0))
        .register(PeriodEndSnapshotJob::new(snapshots.clone(), 0))
        .register(SnapshotRetentionJob::new(snapshots.clone(), 0))
        .register(LedgerRetentionJob::new(store.clone(), Duration::days(730), 0))
        .register(OutboxRetentionJob::new(store.clone(), Duration::days(7), 0))
        .register(HoldExpiryJob::new(service.clone(), StdDuration::from_secs(60)));

    // 1 November: October has just closed.
    let now = Utc.with_ymd_and_hms(2024, 11, 1, 0, 30, 0).unwrap();
    let runs = scheduler.run_due(now).unwrap();
    assert_eq!(runs.len(), 7);
    assert!(runs.iter().all(|r| r.outcome.is_ok()), "{runs:?}");

    let taken = store.list(&s, now - Duration::days(1), now).unwrap();
    let mut types: Vec<SnapshotType> = taken.iter().map(|s| s.snapshot_type).collect();
    types.sort_by_key(|t| t.as_str());
    assert_eq!(types, vec![SnapshotType::Daily, SnapshotType::MonthEnd]);
    assert_eq!(store.unpublished_count().unwrap(), 0);

    let again = scheduler.run_due(now + Duration::seconds(1)).unwrap();
    assert!(again.is_empty());

    let later = scheduler.run_due(now + Duration::seconds(10)).unwrap();
    let names: Vec<&str> = later.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["outbox-publisher"]);

    let record = records.load("daily-snapshots").unwrap().unwrap();
    assert_eq!(record.last_status, RunStatus::Succeeded);
    assert_eq!(record.runs, 1);
}
