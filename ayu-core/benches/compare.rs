//! Comparison against serde_json.
//!
//! Both parsers read the same JSON document into an owned tree, so this
//! measures what it costs to accept the looser ayu grammar.
//!
//! Run with: cargo bench --bench compare

use ayu_core::{parse, print, PrintOptions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Generate a flat JSON array of `count` objects.
fn generate_json(count: usize) -> String {
    let items: Vec<String> = (0..count)
        .map(|i| {
            format!(
                r#"{{"id":{i},"name":"item {i}","price":{}.25,"tags":["a","b"],"active":{}}}"#,
                i % 500,
                i % 2 == 0
            )
        })
        .collect();
    format!("[{}]", items.join(","))
}

fn bench_parse_comparison(c: &mut Criterion) {
    for count in [50, 500, 5000] {
        let doc = generate_json(count);

        let mut group = c.benchmark_group(format!("compare_parse_{count}"));
        group.throughput(Throughput::Bytes(doc.len() as u64));

        group.bench_with_input(BenchmarkId::new("ayu", ""), &doc, |b, doc| {
            b.iter(|| parse(black_box(doc.as_bytes()), "<bench>"))
        });

        group.bench_with_input(BenchmarkId::new("serde_json", ""), &doc, |b, doc| {
            b.iter(|| serde_json::from_str::<serde_json::Value>(black_box(doc)))
        });

        group.finish();
    }
}

fn bench_print_comparison(c: &mut Criterion) {
    let doc = generate_json(1000);
    let tree = parse(doc.as_bytes(), "<bench>").unwrap();
    let value: serde_json::Value = serde_json::from_str(&doc).unwrap();

    let mut group = c.benchmark_group("compare_print");
    group.throughput(Throughput::Bytes(doc.len() as u64));

    group.bench_function("ayu", |b| b.iter(|| print(black_box(&tree), PrintOptions::JSON)));
    group.bench_function("serde_json", |b| b.iter(|| serde_json::to_string(black_box(&value))));

    group.finish();
}

criterion_group!(benches, bench_parse_comparison, bench_print_comparison);
criterion_main!(benches);
