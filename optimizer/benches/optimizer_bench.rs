//! Optimizer benchmarks
//!
//! Measures the pass schedule over representative template shapes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use liquidc_frontend::parse;
use liquidc_optimizer::{allocate, Optimizer};

fn bench_pass_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");

    let templates = [
        ("constant_filters", "{{ 'hello' | upcase | append: ' WORLD' | truncate: 8 }}"),
        (
            "constant_branches",
            "{% if true %}a{% else %}b{% endif %}{% if false %}c{% endif %}",
        ),
        (
            "mixed_page",
            "Hello {{ user.name }}! {% for item in items %}{{ item.title | upcase }} \
             {% if item.sale %}SALE{% endif %}{% endfor %}{% capture f %}end{% endcapture %}{{ f }}",
        ),
    ];

    for (name, source) in templates {
        let il = parse(source).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &il, |b, il| {
            let optimizer = Optimizer::new();
            b.iter(|| {
                let mut work = black_box(il).clone();
                optimizer.optimize(&mut work);
                work
            });
        });
    }
    group.finish();
}

fn bench_register_allocation(c: &mut Criterion) {
    let source: String = (0..50)
        .map(|i| format!("{{% assign v{i} = {i} %}}"))
        .collect();
    let mut il = parse(&source).unwrap();
    Optimizer::new().optimize(&mut il);

    c.bench_function("allocate_50_assigns", |b| {
        b.iter(|| {
            let mut work = black_box(&il).clone();
            allocate(&mut work)
        });
    });
}

criterion_group!(benches, bench_pass_schedule, bench_register_allocation);
criterion_main!(benches);
