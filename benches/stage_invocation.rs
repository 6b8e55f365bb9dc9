//! Stage invocation benchmarks
//!
//! Measures the per-call overhead the stage wrapper adds around a trivial
//! body: argument binding, cache key hashing, event dispatch and cache hits.
//!
//! Run with: cargo bench --bench stage_invocation

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use stagecraft::cache::{CacheKey, MemoryCache};
use stagecraft::logging::DiscardResults;
use stagecraft::stage::{bind, Injections, Kwargs, Param, RandomState, Signature};
use stagecraft::tracking::TrackingObserver;
use stagecraft::{Experiment, Options, StageDef, StageLogger};

const PARAM_COUNTS: [usize; 3] = [1, 8, 32];

fn signature(n: usize) -> Signature {
    let params: Vec<Param> = (0..n).map(|i| Param::with_default(format!("p{i}"), i)).collect();
    Signature::resolve("bench", &params).unwrap_or_else(|e| panic!("{e}"))
}

/// Binding with every parameter coming from the options
fn bench_bind(c: &mut Criterion) {
    let mut group = c.benchmark_group("bind");
    let random_state = RandomState::from_seed(1);
    let logger = StageLogger::new("bench", Arc::new(DiscardResults));

    for n in PARAM_COUNTS {
        let signature = signature(n);
        let options = (0..n).fold(Options::new(), |o, i| o.with(format!("p{i}"), i * 2));
        group.bench_with_input(BenchmarkId::new("from_options", n), &n, |b, _| {
            b.iter(|| {
                bind(
                    black_box(&signature),
                    &[],
                    &Kwargs::new(),
                    black_box(&options),
                    Injections {
                        random_state: &random_state,
                        logger: &logger,
                    },
                )
            });
        });
    }
    group.finish();
}

/// SHA-256 cache key over a growing argument map
fn bench_cache_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");
    let source = "fn score(model, data) { model.predict(data).mean() }";

    for n in PARAM_COUNTS {
        let arguments: BTreeMap<String, Value> = (0..n).map(|i| (format!("p{i}"), json!(i))).collect();
        group.bench_with_input(BenchmarkId::new("from_parts", n), &arguments, |b, arguments| {
            b.iter(|| CacheKey::from_parts(black_box(source), arguments.clone()));
        });
    }
    group.finish();
}

/// Full stage calls: plain, observed, and served from the cache
fn bench_stage_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage_call");
    let def = || {
        StageDef::new("sum", "a + b", |args| {
            Ok(json!(args.get::<i64>("a")? + args.get::<i64>("b")?))
        })
        .arg("a")
        .arg_with_default("b", 1)
    };
    let options = Options::new().with("a", 41);

    let mut plain = Experiment::builder("plain")
        .options(options.clone())
        .seed(1)
        .build()
        .unwrap_or_else(|e| panic!("{e}"));
    let stage = plain.stage(def()).unwrap_or_else(|e| panic!("{e}"));
    group.bench_function("plain", |b| {
        b.iter(|| stage.call(&[], black_box(&Kwargs::new())));
    });

    let mut observed = Experiment::builder("observed")
        .options(options.clone())
        .seed(1)
        .observer(Arc::new(TrackingObserver::new()))
        .build()
        .unwrap_or_else(|e| panic!("{e}"));
    let stage = observed.stage(def()).unwrap_or_else(|e| panic!("{e}"));
    group.bench_function("tracked", |b| {
        b.iter(|| stage.call(&[], black_box(&Kwargs::new())));
    });

    let mut cached = Experiment::builder("cached")
        .options(options)
        .seed(1)
        .cache(Arc::new(MemoryCache::new()))
        .caching_threshold(Duration::ZERO)
        .build()
        .unwrap_or_else(|e| panic!("{e}"));
    let stage = cached.stage(def()).unwrap_or_else(|e| panic!("{e}"));
    let warm: Value = stage.call(&[], &Kwargs::new()).unwrap_or_default();
    black_box(warm);
    group.bench_function("cache_hit", |b| {
        b.iter(|| stage.call(&[], black_box(&Kwargs::new())));
    });

    group.finish();
}

criterion_group!(benches, bench_bind, bench_cache_key, bench_stage_call);
criterion_main!(benches);
