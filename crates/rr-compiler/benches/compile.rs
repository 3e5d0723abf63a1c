use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rr_compiler::{build_ruleset, compile};
use rr_core::rewrite::{TextDocument, TextRewriter};
use rr_core::types::{TextRule, UrlRule};

fn url_rules(count: usize) -> Vec<UrlRule> {
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                UrlRule::new(format!("^https://cdn{i}\\.example\\.com/(.*)"), "https://mirror.example/")
            } else {
                UrlRule::new(format!("avatar-{i}"), "https://img.example/default.png")
            }
        })
        .collect()
}

fn bench_compile(c: &mut Criterion) {
    let rules = url_rules(500);
    c.bench_function("compile_500", |b| b.iter(|| compile(black_box(&rules))));

    let compiled = compile(&rules);
    c.bench_function("ruleset_500", |b| b.iter(|| build_ruleset(black_box(&compiled), false)));
}

fn bench_rewrite(c: &mut Criterion) {
    let rules: Vec<TextRule> = (0..50)
        .map(|i| TextRule::new(format!("word{i}"), format!("term{i}")))
        .collect();
    let rewriter = TextRewriter::new(&rules);
    let nodes: Vec<String> = (0..2000)
        .map(|i| format!("paragraph {i} mentions word{} and (parens)", i % 60))
        .collect();

    c.bench_function("rewrite_pass_2000_nodes", |b| {
        b.iter(|| {
            let mut doc = TextDocument::new(nodes.iter().cloned());
            rewriter.apply(black_box(&mut doc)).ok()
        })
    });
}

criterion_group!(benches, bench_compile, bench_rewrite);
criterion_main!(benches);
