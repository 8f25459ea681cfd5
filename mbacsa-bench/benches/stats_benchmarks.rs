//! Benchmarks for result aggregation and in-process chain handling.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mbacsa_bench::client::Agent;
use mbacsa_bench::stats::round_two_places;
use mbacsa_bench::{
    build_chain, AgentId, ChainOptions, DelegationClient, LocalAuthority, PerformanceResult,
};

const RESOURCE: &str = "http://localhost:3000/Bob/social/post1.txt";

fn agents(n: usize) -> Vec<Agent> {
    (0..n)
        .map(|i| {
            let id = AgentId::parse(&format!("http://localhost:3000/agent{}/profile/card#me", i))
                .unwrap();
            Agent::new(id, format!("agent{}@example.com", i), "secret")
        })
        .collect()
}

fn benchmark_aggregation(c: &mut Criterion) {
    let samples: Vec<f64> = (0..1000u32).map(|i| f64::from((i * 7919) % 50_000)).collect();

    c.bench_function("summarize_1000_samples", |b| {
        b.iter(|| PerformanceResult::from_samples(black_box(&samples)).unwrap())
    });

    c.bench_function("round_two_places", |b| {
        b.iter(|| round_two_places(black_box(1234.5678)))
    });
}

fn benchmark_local_chain(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("local_chain");

    for length in [2usize, 8, 32] {
        let agents = agents(length);
        let members = agents.as_slice();
        group.bench_with_input(BenchmarkId::new("build", length), &length, |b, &n| {
            b.to_async(&runtime).iter(move || async move {
                let authority = LocalAuthority::new();
                build_chain(&authority, members, n, RESOURCE, ChainOptions::default())
                    .await
                    .unwrap()
            })
        });

        let authority = LocalAuthority::new();
        let chain = runtime
            .block_on(build_chain(
                &authority,
                &agents,
                length,
                RESOURCE,
                ChainOptions::default(),
            ))
            .unwrap();
        let (authority, chain) = (&authority, &chain);
        group.bench_with_input(BenchmarkId::new("authorize_tail", length), &length, |b, &n| {
            b.to_async(&runtime).iter(move || async move {
                authority
                    .access(RESOURCE, chain.authorization_bundle(n - 1))
                    .await
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_aggregation, benchmark_local_chain);
criterion_main!(benches);
