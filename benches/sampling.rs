//! Benchmarks for sampling passes and value snapshots

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use prometheus::Registry;
use regstats::{
    decode, BlockSpec, Domain, DomainConfig, MemoryRegion, MetricSpec, MetricValue,
    RegisterField, ZoneSpec,
};

const METRICS: usize = 64;
const ELEMENTS: usize = 16;

fn populated_domain() -> (Domain, MemoryRegion) {
    let region = MemoryRegion::new(METRICS * ELEMENTS * 8);
    let metrics = (0..METRICS).map(|i| {
        MetricSpec::counter(format!("counter_{}", i), RegisterField::new(i * ELEMENTS * 8, 8))
            .with_elements(ELEMENTS)
    });
    let zone = ZoneSpec::new("cmac0").with_block(
        BlockSpec::new("stats")
            .with_io(Arc::new(region.clone()))
            .with_metrics(metrics),
    );

    let config = DomainConfig::new("bench").with_clear_on_start(false);
    let domain = Domain::new(config, Registry::new());
    domain.alloc_zone(zone).unwrap();
    (domain, region)
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampling");
    let (domain, region) = populated_domain();

    group.throughput(Throughput::Elements((METRICS * ELEMENTS) as u64));

    group.bench_function("update_1024_values", |b| {
        let mut tick = 0u64;
        b.iter(|| {
            tick += 1;
            region.write_u64(0, tick);
            domain.update_metrics();
        })
    });

    group.bench_function("get_1024_values", |b| {
        let mut out = vec![MetricValue::default(); METRICS * ELEMENTS];
        b.iter(|| black_box(domain.get_values(&mut out)))
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let word = 0x0002_8000u32.to_ne_bytes();

    group.bench_function("decode_u32_field", |b| {
        b.iter(|| decode(black_box(&word), 4, 6, 10, false).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_update, bench_decode);
criterion_main!(benches);
