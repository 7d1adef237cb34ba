// SPDX-License-Identifier: PMPL-1.0-or-later
//! Performance benchmarks for condition translation, change fan-out and
//! store writes.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tokio::runtime::Runtime;

use tank_condition::{parse_selector, Condition};
use tank_core::{ChangeKind, ChangeRecord, Document, Namespace};
use tank_document::{
    escape_document, to_native, DocumentDriver, InMemoryDocumentDb, ListenerConfig,
    ListenerRegistry, WatchRouter,
};
use tank_store::{PutOption, Store, StoreConfig};

fn chain(len: usize) -> Condition {
    (0..len).fold(Condition::truth(), |cond, i| {
        let key = format!("field{i}");
        match i % 4 {
            0 => cond.eq(&key, i as i64),
            1 => cond.gt(&key, i as i64),
            2 => cond.is_in(&key, vec![json!(1), json!(2), json!(3)]),
            _ => cond.contains(&key, "needle.in"),
        }
    })
}

fn document(n: usize) -> Document {
    json!({
        "ip": format!("10.0.{}.{}", n / 256, n % 256),
        "role": "db",
        "labels": {"zone.name": "a", "$tier": "gold"},
        "n": n,
    })
    .as_object()
    .cloned()
    .unwrap()
}

// ============================================================================
// Condition Benchmarks
// ============================================================================

fn bench_condition_translate(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition");

    for len in [1usize, 8, 64] {
        let cond = chain(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("to_native", len), &cond, |b, cond| {
            b.iter(|| black_box(to_native(cond)))
        });
    }

    let nested = chain(8).or(&chain(8).not()).and(&chain(4));
    group.bench_function("to_native_nested", |b| b.iter(|| black_box(to_native(&nested))));

    let doc = document(7);
    let cond = Condition::truth().eq("role", "db").ne("ip", "10.0.0.1").gte("n", 3);
    group.bench_function("matches", |b| b.iter(|| black_box(cond.matches(&doc))));

    group.bench_function("parse_selector", |b| {
        b.iter(|| black_box(parse_selector("role=db,zone!=a,tier+in+gold|silver,cpu=4")))
    });

    group.finish();
}

fn bench_escape(c: &mut Criterion) {
    let doc = document(1);
    c.bench_function("escape_document", |b| b.iter(|| black_box(escape_document(&doc))));
}

// ============================================================================
// Fan-out Benchmarks
// ============================================================================

fn bench_router_fanout(c: &mut Criterion) {
    let ns = Namespace::new("cluster", "nodes");
    let record = ChangeRecord {
        namespace: ns.clone(),
        id: "node-1".to_string(),
        kind: ChangeKind::Update,
        document: Some(document(1)),
        updated_fields: document(1),
        removed_fields: Vec::new(),
    };

    let mut group = c.benchmark_group("router");
    for subscribers in [1usize, 16, 256] {
        let router = WatchRouter::new();
        let mut subs: Vec<_> = (0..subscribers).map(|_| router.subscribe(&ns, 4)).collect();
        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("publish", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    let delivered = router.publish(record.clone());
                    for sub in &mut subs {
                        black_box(sub.try_recv());
                    }
                    black_box(delivered)
                })
            },
        );
    }
    group.finish();
}

// ============================================================================
// Store Benchmarks
// ============================================================================

fn bench_store_put(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = rt.block_on(async {
        let driver = DocumentDriver::connect(
            "cluster",
            Arc::new(InMemoryDocumentDb::new()),
            ListenerConfig::named("bench"),
            Arc::new(ListenerRegistry::new()),
        )
        .unwrap();
        Store::with_driver(driver, StoreConfig::default())
    });

    let put = PutOption::unique(&["ip"]).with_times("createTime", "updateTime");
    let mut n = 0usize;
    c.bench_function("store_put", |b| {
        b.to_async(&rt).iter(|| {
            n = (n + 1) % 1024;
            let doc = document(n);
            let store = store.clone();
            let put = put.clone();
            async move { black_box(store.put("nodes", doc, put).await.is_ok()) }
        })
    });
}

criterion_group!(
    benches,
    bench_condition_translate,
    bench_escape,
    bench_router_fanout,
    bench_store_put,
);
criterion_main!(benches);
