use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use picoflow_core::{
    AnalysisConfig, AnalysisVariant, Dataset, ExecutionContext, FlowAnalysis, ThreadPolicy,
    ToyModel,
};

const SEED: u64 = 19140004;
const TIERS: [(&str, usize); 2] = [("small", 200), ("large", 2000)];

fn toy_dataset(n_events: usize) -> Dataset {
    ToyModel::new(0.06)
        .generate(n_events, SEED)
        .expect("toy model should be valid")
}

fn event_loop_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_loop");
    group.sample_size(20);
    group.warm_up_time(Duration::from_millis(800));
    for (tier, n_events) in TIERS {
        let dataset = toy_dataset(n_events);
        for variant in [AnalysisVariant::Inclusive, AnalysisVariant::Centrality] {
            let analysis = FlowAnalysis::new(AnalysisConfig::for_variant(variant));
            group.bench_with_input(
                BenchmarkId::new(format!("single/{variant}"), tier),
                &dataset,
                |b, dataset| b.iter(|| black_box(analysis.run(dataset.clone()))),
            );
        }
    }
    group.finish();
}

#[cfg(feature = "rayon")]
fn thread_policy_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_policy");
    group.sample_size(20);
    let dataset = toy_dataset(TIERS[1].1);
    let analysis = FlowAnalysis::new(AnalysisConfig::default());
    for policy in [
        ThreadPolicy::Single,
        ThreadPolicy::GlobalPool,
        ThreadPolicy::Dedicated(4),
    ] {
        let ctx = ExecutionContext::new(policy).expect("execution context should build");
        group.bench_with_input(
            BenchmarkId::new("run_with_context", format!("{policy:?}")),
            &dataset,
            |b, dataset| b.iter(|| black_box(analysis.run_with_context(dataset.clone(), &ctx))),
        );
    }
    group.finish();
}

#[cfg(not(feature = "rayon"))]
fn thread_policy_benchmark(_c: &mut Criterion) {
    let _ = (ExecutionContext::default(), ThreadPolicy::Single);
}

criterion_group!(benches, event_loop_benchmark, thread_policy_benchmark);
criterion_main!(benches);
