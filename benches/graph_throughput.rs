//! Benchmarks for packet throughput through calculator graphs
//!
//! Run with: cargo bench

use calcgraph::{CalculatorGraph, CalculatorRegistry, GraphConfig, NodeConfig, Packet, Timestamp};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::HashMap;
use std::sync::Arc;

const PACKETS: i64 = 1_000;

fn chain(length: usize, num_threads: usize) -> GraphConfig {
    let mut config = GraphConfig::new()
        .input("in")
        .output("out")
        .with_num_threads(num_threads);
    for i in 0..length {
        let input = if i == 0 { "in".to_string() } else { format!("s{}", i) };
        let output = if i + 1 == length { "out".to_string() } else { format!("s{}", i + 1) };
        config = config.node(NodeConfig::new("PassThroughCalculator").input(input).output(output));
    }
    config
}

fn mux(num_threads: usize) -> GraphConfig {
    GraphConfig::new()
        .input("in0")
        .input("in1")
        .input("select")
        .output("out")
        .with_num_threads(num_threads)
        .node(
            NodeConfig::new("MuxCalculator")
                .input("INPUT:0:in0")
                .input("INPUT:1:in1")
                .input("SELECT:select")
                .output("OUTPUT:out"),
        )
}

fn run_once(graph: &CalculatorGraph, inputs: &[&str]) {
    graph.start_run(HashMap::new()).unwrap();
    for t in 0..PACKETS {
        for input in inputs {
            let packet = if *input == "select" {
                Packet::new((t % 2) as i32)
            } else {
                Packet::new(t)
            };
            graph
                .add_packet_to_input_stream(input, packet.into_at(Timestamp::new(t)))
                .unwrap();
        }
    }
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();
}

fn bench_pass_through_chain(c: &mut Criterion) {
    let registry = Arc::new(CalculatorRegistry::with_builtins());
    let mut group = c.benchmark_group("pass_through_chain");
    group.throughput(Throughput::Elements(PACKETS as u64));

    for length in [1usize, 4, 16] {
        for threads in [0usize, 4] {
            let graph = CalculatorGraph::from_config(registry.clone(), chain(length, threads)).unwrap();
            let id = BenchmarkId::new(format!("threads_{}", threads), length);
            group.bench_with_input(id, &length, |b, _| {
                b.iter(|| run_once(black_box(&graph), &["in"]));
            });
        }
    }

    group.finish();
}

fn bench_mux(c: &mut Criterion) {
    let registry = Arc::new(CalculatorRegistry::with_builtins());
    let mut group = c.benchmark_group("mux");
    group.throughput(Throughput::Elements(PACKETS as u64));

    for threads in [0usize, 2] {
        let graph = CalculatorGraph::from_config(registry.clone(), mux(threads)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, _| {
            b.iter(|| run_once(black_box(&graph), &["in0", "in1", "select"]));
        });
    }

    group.finish();
}

fn bench_graph_validation(c: &mut Criterion) {
    let registry = Arc::new(CalculatorRegistry::with_builtins());
    c.bench_function("validate_chain_64", |b| {
        b.iter(|| CalculatorGraph::from_config(registry.clone(), black_box(chain(64, 1))).unwrap())
    });
}

criterion_group!(benches, bench_pass_through_chain, bench_mux, bench_graph_validation);
criterion_main!(benches);
