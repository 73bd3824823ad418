use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rift_mock::condition::Condition;
use rift_mock::request::NormalizedRequest;
use rift_mock::rule::{Rule, RuleDefaults, RuleFile};
use rift_mock::rule_tree::RuleTree;
use std::sync::Arc;

fn create_rule(id: usize, path: &str, q: Option<&str>) -> Arc<Rule> {
    let file = RuleFile {
        name: Some(format!("rule-{id}")),
        path: Some(path.to_string()),
        q: q.map(str::to_string),
        ..Default::default()
    };
    Arc::new(Rule::from_file(&file, &RuleDefaults::default(), None, String::new()).unwrap())
}

fn build_tree(count: usize) -> RuleTree {
    (0..count)
        .map(|i| create_rule(i, &format!("/api/v1/group{}/endpoint{i}", i % 10), None))
        .collect()
}

fn bench_candidates(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_tree_candidates");

    for rule_count in [10, 100, 1000, 10000].iter() {
        let tree = build_tree(*rule_count);
        let last = rule_count - 1;
        let path = format!("/api/v1/group{}/endpoint{last}/item/42", last % 10);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("hit", rule_count), rule_count, |b, _| {
            b.iter(|| tree.candidates(black_box("get"), black_box(&path)));
        });
        group.bench_with_input(BenchmarkId::new("miss", rule_count), rule_count, |b, _| {
            b.iter(|| tree.candidates(black_box("get"), black_box("/other/path/entirely")));
        });
    }

    group.finish();
}

fn bench_path_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_tree_depth");
    let tree = build_tree(1000);

    for depth in [1, 4, 16, 64].iter() {
        let path = format!("/api/v1/group9/endpoint999{}", "/seg".repeat(*depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| tree.candidates(black_box("get"), black_box(&path)));
        });
    }

    group.finish();
}

fn bench_condition_evaluation(c: &mut Criterion) {
    let condition =
        Condition::compile("query.flag == true and header.x-env like 'prod%' or ip = '10.0.0.1'")
            .unwrap();
    let request = NormalizedRequest::new("GET", "/x?flag=true")
        .with_header("X-Env", "production")
        .with_ip("10.0.0.2");

    c.bench_function("condition_evaluation", |b| {
        b.iter(|| condition.matches(black_box(&request)));
    });
}

criterion_group!(
    benches,
    bench_candidates,
    bench_path_depth,
    bench_condition_evaluation
);
criterion_main!(benches);
