use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use acl_prof::{
    ApiTypeId, MemoryBackend, ProfilingManager, ResourceKind, ResourceStatistics, ScopedReporter,
};

fn benchmark_scoped_reporter(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoped_reporter");

    let backend = Arc::new(MemoryBackend::new());
    let manager = ProfilingManager::new(backend.clone());

    // --- Stopped: the fast path should be two atomic loads ---
    group.bench_function("stopped", |bench| {
        bench.iter(|| {
            let reporter = ScopedReporter::new(black_box(&manager), ApiTypeId::RT_MEMCPY);
            black_box(&reporter);
        })
    });

    // --- Running: clock reads plus one backend report ---
    manager.start().unwrap();
    group.bench_function("running", |bench| {
        bench.iter(|| {
            let reporter = ScopedReporter::new(black_box(&manager), ApiTypeId::RT_MEMCPY);
            black_box(&reporter);
        });
        backend.clear();
    });

    group.finish();
}

fn benchmark_resource_counters(c: &mut Criterion) {
    let stats = ResourceStatistics::new();
    c.bench_function("resource_counter_add", |bench| {
        bench.iter(|| stats.add_apply_total(black_box(ResourceKind::CreateDestroyStream)))
    });
    c.bench_function("resource_dump", |bench| bench.iter(|| black_box(stats.dump())));
}

criterion_group!(benches, benchmark_scoped_reporter, benchmark_resource_counters);
criterion_main!(benches);
