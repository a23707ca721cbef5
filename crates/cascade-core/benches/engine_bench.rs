//! Engine Criterion benchmarks.
//!
//! Measures per-iteration driver overhead on linear chains: idle iterations
//! (no source change), incremental iterations (every change absorbed by a
//! handler), and full-recompute iterations, plus DAG construction cost.
//!
//! Run with: cargo bench --bench engine_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use cascade_core::{ChangeHandlerFn, ComputeResult, Engine, HandlerResult, NodeSpec};

/// Builds an initialized chain: `src -> n1 -> ... -> n(len-1)`.
///
/// The source reports `source_result` every iteration; every edge carries a
/// handler that absorbs the change without touching data.
fn chain_engine(len: usize, source_result: ComputeResult) -> Engine {
    let mut builder = Engine::builder();
    let mut prev = builder
        .add_node(NodeSpec::new("src", move |_node, _data| source_result))
        .unwrap();
    for i in 1..len {
        let node = builder
            .add_node(NodeSpec::new(format!("n{i}"), |_node, _data| {
                ComputeResult::Updated
            }))
            .unwrap();
        let handler: ChangeHandlerFn =
            Box::new(|_node, _data| HandlerResult::HandledUpdated);
        builder.add_input(node, prev, Some(handler)).unwrap();
        prev = node;
    }
    let mut engine = builder.build().unwrap();
    engine.init(&()).unwrap();
    engine
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");
    for len in [8usize, 64, 256] {
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter(|| black_box(chain_engine(len, ComputeResult::Unchanged)));
        });
    }
    group.finish();
}

fn bench_idle_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("idle_iteration");
    for len in [8usize, 64, 256] {
        group.throughput(Throughput::Elements(len as u64));
        let mut engine = chain_engine(len, ComputeResult::Unchanged);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                engine.init_run();
                engine.run(true).unwrap();
                black_box(engine.has_updated())
            });
        });
    }
    group.finish();
}

fn bench_incremental_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_iteration");
    for len in [8usize, 64, 256] {
        group.throughput(Throughput::Elements(len as u64));
        let mut engine = chain_engine(len, ComputeResult::Updated);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                engine.init_run();
                engine.run(true).unwrap();
                black_box(engine.has_updated())
            });
        });
    }
    group.finish();
}

fn bench_full_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_recompute");
    for len in [8usize, 64, 256] {
        group.throughput(Throughput::Elements(len as u64));
        let mut engine = chain_engine(len, ComputeResult::Unchanged);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                engine.init_run();
                engine.set_force_recompute();
                engine.run(true).unwrap();
                black_box(engine.has_updated())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_construction,
    bench_idle_iteration,
    bench_incremental_iteration,
    bench_full_recompute
);
criterion_main!(benches);
