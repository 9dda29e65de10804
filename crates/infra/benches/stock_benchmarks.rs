use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use stockledger_core::{OperatorId, Sku};
use stockledger_infra::mutation::{MutationContext, MutationService};
use stockledger_infra::replay::ReplayEngine;
use stockledger_infra::snapshots::SnapshotService;
use stockledger_infra::store::InMemoryStockStore;
use stockledger_inventory::SnapshotReason;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn at(minutes: i64) -> MutationContext {
    MutationContext::system().at(t0() + Duration::minutes(minutes))
}

type Service = MutationService<Arc<InMemoryStockStore>>;

/// A SKU with `pairs` receive/allocate pairs in its history.
fn seeded(pairs: i64) -> (Arc<InMemoryStockStore>, Service, Sku) {
    let store = Arc::new(InMemoryStockStore::new());
    let service = MutationService::new(store.clone());
    let sku = Sku::parse("SKU-BENCH").unwrap();
    service.create(&sku, 0, &at(0)).unwrap();
    extend(&service, &sku, 1..=pairs);
    (store, service, sku)
}

fn extend(service: &Service, sku: &Sku, pairs: std::ops::RangeInclusive<i64>) {
    for i in pairs {
        service.receive(sku, 10, &at(2 * i)).unwrap();
        service.allocate(sku, 5, &at(2 * i + 1)).unwrap();
    }
}

fn bench_mutation_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutation_latency");
    group.sample_size(500);

    group.bench_function("receive_on_fresh_sku", |b| {
        b.iter(|| {
            let (_, service, sku) = seeded(0);
            black_box(service.receive(&sku, 10, &MutationContext::system()).unwrap());
        });
    });

    group.bench_function("allocate_with_history", |b| {
        let (_, service, sku) = seeded(100);
        b.iter(|| {
            service.receive(&sku, 1, &MutationContext::system()).unwrap();
            black_box(service.allocate(&sku, 1, &MutationContext::system()).unwrap());
        });
    });

    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for pairs in [10i64, 100, 1000] {
        group.throughput(Throughput::Elements((2 * pairs) as u64));

        group.bench_with_input(BenchmarkId::new("from_empty", pairs), &pairs, |b, &pairs| {
            let (store, _, sku) = seeded(pairs);
            let engine = ReplayEngine::new(store.clone(), store.clone());
            let target = t0() + Duration::days(30);
            b.iter(|| {
                black_box(
                    engine
                        .state_at(&sku, target, SnapshotReason::Investigation, OperatorId::system())
                        .unwrap(),
                )
            });
        });

        let id = BenchmarkId::new("from_midpoint_snapshot", pairs);
        group.bench_with_input(id, &pairs, |b, &pairs| {
            let half = pairs / 2;
            let (store, service, sku) = seeded(half);
            let midpoint = at(2 * half + 1).occurred_at;
            SnapshotService::new(store.clone())
                .capture_ad_hoc(&sku, SnapshotReason::Manual, OperatorId::system(), midpoint)
                .unwrap();
            extend(&service, &sku, half + 1..=pairs);
            let engine = ReplayEngine::new(store.clone(), store.clone());
            let target = t0() + Duration::days(30);
            b.iter(|| {
                black_box(
                    engine
                        .state_at(&sku, target, SnapshotReason::Investigation, OperatorId::system())
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mutation_latency, bench_replay);
criterion_main!(benches);
