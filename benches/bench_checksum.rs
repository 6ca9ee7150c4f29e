//! Micro benchmarks for the incremental one's-complement checksum helpers.
//! Pure CPU - no network, no IO.
//!
//! ```bash
//! cargo bench --bench bench_checksum
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use upf_ebpf_common::csum::{checksum, update_u16, update_u32};

/// A 20-byte IPv4 header, checksum field zeroed.
const IPV4_HEADER: [u8; 20] = [
    0x45, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x01,
    0x0a, 0x00, 0x00, 0x02,
];

fn bench_full_checksum(c: &mut Criterion) {
    c.bench_function("checksum_ipv4_header", |b| {
        b.iter(|| checksum(std::hint::black_box(&IPV4_HEADER)));
    });
}

fn bench_update_u32(c: &mut Criterion) {
    let base = checksum(&IPV4_HEADER);
    let orig_addr: u32 = 0x0a000001;
    let new_addr: u32 = 0xc0a80101;

    c.bench_function("checksum_update_u32_address_rewrite", |b| {
        b.iter(|| {
            update_u32(
                std::hint::black_box(base),
                std::hint::black_box(orig_addr),
                std::hint::black_box(new_addr),
            )
        });
    });
}

fn bench_update_u16(c: &mut Criterion) {
    let base = checksum(&IPV4_HEADER);
    let orig_port: u16 = 443;
    let new_port: u16 = 2152;

    c.bench_function("checksum_update_u16_port_rewrite", |b| {
        b.iter(|| {
            update_u16(
                std::hint::black_box(base),
                std::hint::black_box(orig_port),
                std::hint::black_box(new_port),
            )
        });
    });
}

criterion_group!(checksum_benches, bench_full_checksum, bench_update_u32, bench_update_u16);
criterion_main!(checksum_benches);
