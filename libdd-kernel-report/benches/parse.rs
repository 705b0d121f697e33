// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use criterion::{criterion_group, criterion_main, Criterion};

fn build_log() -> Vec<u8> {
    let mut log = Vec::new();
    for i in 0..2000 {
        log.extend_from_slice(
            format!("[  522.{i:06}] netlink: {i} bytes leftover after parsing attributes\n")
                .as_bytes(),
        );
    }
    log.extend_from_slice(
        b"[  536.429346] BUG: KASAN: use-after-free in snd_seq_queue_alloc+0x670/0x690 at addr ffff8801d0c6b080\n\
          [  536.430000] Read of size 4 by task syz-executor2/5764\n\
          [  536.431000] Call Trace:\n",
    );
    for i in 0..40 {
        log.extend_from_slice(format!("[  536.440000]  frame_{i}+0x101/0x185\n").as_bytes());
    }
    log
}

pub fn parse_benchmark(criterion: &mut Criterion) {
    let log = build_log();
    let mut group = criterion.benchmark_group("parse");
    group.bench_function("kasan_report", |b| {
        b.iter(|| {
            let report = libdd_kernel_report::parse(std::hint::black_box(&log), &[]).unwrap();
            std::hint::black_box(report);
        })
    });
    group.bench_function("clean_log_scan", |b| {
        let clean = log[..log.len() / 2].to_vec();
        b.iter(|| std::hint::black_box(libdd_kernel_report::contains_crash(&clean, &[])))
    });
    group.finish();
}

criterion_group!(benches, parse_benchmark);
criterion_main!(benches);
