//! 레지스트리 검색 벤치마크

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use peershare::Registry;

fn populated_registry(peers: usize, files_per_peer: usize) -> Registry {
    let registry = Registry::in_memory();
    for p in 0..peers {
        let addr = format!("10.0.{}.{}", p / 256, p % 256);
        registry.join(&addr).unwrap();
        for f in 0..files_per_peer {
            let ext = if f % 3 == 0 { "mkv" } else { "txt" };
            registry
                .create_file(&addr, &format!("file-{}-{}.{}", p, f, ext), (f * 1024) as u64)
                .unwrap();
        }
    }
    registry
}

fn bench_search(c: &mut Criterion) {
    let registry = populated_registry(200, 50);

    c.bench_function("search_suffix_10k", |b| {
        b.iter(|| registry.search(black_box(r"\.mkv$")).unwrap())
    });

    c.bench_function("list_all_10k", |b| b.iter(|| registry.list_all()));
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
