//! Micro benchmark for the per-QER sliding-window rate limiter. Pure CPU,
//! no atomics or map access - the CAS loop around this lives in the
//! datapath itself.
//!
//! ```bash
//! cargo bench --bench bench_ratelimit
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use upf_ebpf_common::ratelimit::evaluate;

fn bench_accept_path(c: &mut Criterion) {
    // 1 Gbps budget, one second of headroom, a 1200-byte packet: always
    // accepted, exercising the common case.
    c.bench_function("ratelimit_evaluate_accept", |b| {
        b.iter(|| {
            evaluate(
                std::hint::black_box(0),
                std::hint::black_box(1_000_000_000),
                std::hint::black_box(1200),
                std::hint::black_box(1_000_000_000),
            )
        });
    });
}

fn bench_drop_path(c: &mut Criterion) {
    // Zero elapsed time means zero instantaneous capacity: every packet is
    // dropped, exercising the early-reject branch.
    c.bench_function("ratelimit_evaluate_drop", |b| {
        b.iter(|| {
            evaluate(
                std::hint::black_box(1_000_000_000),
                std::hint::black_box(1_000_000_000),
                std::hint::black_box(1200),
                std::hint::black_box(1_000_000),
            )
        });
    });
}

criterion_group!(ratelimit_benches, bench_accept_path, bench_drop_path);
criterion_main!(ratelimit_benches);
