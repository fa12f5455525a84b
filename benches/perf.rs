use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use keydir::{Keydir, Record};

static GLOBAL_ID: AtomicU64 = AtomicU64::new(0);

fn temp_basedir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join("keydir_bench")
        .join(format!("{}_{}", name, std::process::id()))
}

fn bench_keydir_suites(c: &mut Criterion) {
    let dir = temp_basedir("perf");
    let kd = Keydir::init(&dir, 1024, 64).expect("init keydir");
    for i in 0..1000u32 {
        let key = format!("seed-{i}");
        kd.put(
            key.as_bytes(),
            Record {
                file_id: 1,
                total_size: 32,
                offset: i as u64 * 32,
                timestamp: i,
            },
            None,
        )
        .unwrap();
    }

    let mut g = c.benchmark_group("Keydir-Operations");
    g.measurement_time(Duration::from_secs(5));

    g.bench_function("get_hit", |b| {
        b.iter(|| {
            kd.get(b"seed-500", keydir::MAX_EPOCH).unwrap();
        });
    });

    g.bench_function("put_overwrite", |b| {
        b.iter(|| {
            kd.put(
                b"seed-500",
                Record {
                    file_id: 1,
                    total_size: 32,
                    offset: 999,
                    timestamp: 1,
                },
                None,
            )
            .unwrap();
        });
    });

    g.bench_function("put_new_key", |b| {
        b.iter(|| {
            let id = GLOBAL_ID.fetch_add(1, Ordering::SeqCst);
            let key = format!("new-{id}");
            kd.put(
                key.as_bytes(),
                Record {
                    file_id: 2,
                    total_size: 16,
                    offset: id,
                    timestamp: 0,
                },
                None,
            )
            .unwrap();
        });
    });
    g.finish();

    let mut g2 = c.benchmark_group("Keydir-Concurrency");
    g2.measurement_time(Duration::from_secs(5));
    g2.bench_function("concurrent_get_put", |b| {
        b.iter_custom(|iters| {
            let kd = Arc::new(kd.clone());
            let start = std::time::Instant::now();
            std::thread::scope(|s| {
                for t in 0..4 {
                    let kd = kd.clone();
                    s.spawn(move || {
                        for i in 0..(iters / 4).max(1) {
                            let key = format!("thread-{t}-{i}");
                            kd.put(
                                key.as_bytes(),
                                Record {
                                    file_id: 3,
                                    total_size: 8,
                                    offset: i,
                                    timestamp: 0,
                                },
                                None,
                            )
                            .unwrap();
                            let _ = kd.get(key.as_bytes(), keydir::MAX_EPOCH);
                        }
                    });
                }
            });
            start.elapsed()
        });
    });
    g2.finish();
}

criterion_group!(benches, bench_keydir_suites);
criterion_main!(benches);
