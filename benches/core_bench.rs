//! Benchmarks for infragraph core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use infragraph::core::parser::parse_input;
use infragraph::core::types::{ResourceId, SimpleEdge};
use infragraph::engine::path_selection::build_path_selection_graph;
use infragraph::engine::{solve, EngineConfig};
use infragraph::kb::KnowledgeBase;
use infragraph::rules::template::Template;
use std::fmt::Write as _;
use std::sync::Arc;

/// A chain `p:t0 -> p:t1 -> ... -> p:t{n-1}` with every other type functional.
fn chain_kb(n: usize) -> KnowledgeBase {
    let mut yaml = String::from("resources:\n");
    for i in 0..n {
        let _ = writeln!(yaml, "  - qualified_type_name: p:t{}", i);
        if i % 2 == 0 {
            yaml.push_str("    classification:\n      is: [compute]\n");
        }
        yaml.push_str("    properties:\n      Name:\n        type: string\n        default_value: \"{{ .Self.Name }}\"\n");
    }
    yaml.push_str("edges:\n");
    for i in 1..n {
        let _ = writeln!(yaml, "  - source: p:t{}\n    target: p:t{}", i - 1, i);
    }
    KnowledgeBase::from_yaml(&yaml).unwrap()
}

fn bench_template_parse(c: &mut Criterion) {
    let src = r#"{{ .Self.Name }}-{{ upstream "p:vpc" .Self }}/{{ fieldValue "Arn" (downstream "p:role" .Self) }}"#;
    c.bench_function("template_parse", |b| {
        b.iter(|| black_box(Template::parse(black_box(src)).unwrap()));
    });
}

fn bench_path_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_selection");
    for n in [3, 5, 8] {
        let kb = chain_kb(n);
        let edge = SimpleEdge::new(
            ResourceId::parse("p:t0:src").unwrap(),
            ResourceId::parse(&format!("p:t{}:dst", n - 1)).unwrap(),
        );
        group.bench_with_input(BenchmarkId::from_parameter(n), &edge, |b, edge| {
            b.iter(|| black_box(build_path_selection_graph(edge, &kb, "", false).unwrap()));
        });
    }
    group.finish();
}

fn bench_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve");
    for n in [3, 5] {
        let kb = Arc::new(chain_kb(n));
        let input = format!(
            "resources:\n  - id: p:t0:src\n  - id: p:t{0}:dst\nedges:\n  - p:t0:src -> p:t{0}:dst\n",
            n - 1
        );
        group.bench_with_input(BenchmarkId::from_parameter(n), &input, |b, input| {
            b.iter(|| {
                let graph = parse_input(input).unwrap();
                black_box(solve(Arc::clone(&kb), graph, EngineConfig::default()).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_template_parse, bench_path_selection, bench_solve);
criterion_main!(benches);
