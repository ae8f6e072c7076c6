//! Integration tests for subgraph nodes
//!
//! These tests validate:
//! - Expansion of registered subgraphs into prefixed nodes and streams
//! - Boundary binding by tag and index, for streams and side packets
//! - Nested subgraphs and self-inclusion errors

mod common;

use calcgraph::{CalculatorGraph, CalculatorRegistry, Error, GraphConfig, NodeConfig, Packet};
use common::{feed, registry, Collector};
use std::collections::HashMap;
use std::sync::Arc;

/// `in` → relay → +2 offset → `out`.
fn offset_pair() -> GraphConfig {
    GraphConfig::new()
        .input("in")
        .output("out")
        .node(
            NodeConfig::new("PassThroughCalculator")
                .with_name("relay")
                .input("in")
                .output("mid"),
        )
        .node(
            NodeConfig::new("AddOffsetCalculator")
                .input("mid")
                .output("out")
                .option("offset", 2i64),
        )
}

fn registry_with(subgraphs: Vec<(&str, GraphConfig)>) -> Arc<CalculatorRegistry> {
    let mut registry = registry();
    for (name, config) in subgraphs {
        registry.register_subgraph(name, config).unwrap();
    }
    Arc::new(registry)
}

fn run_collect(graph: &CalculatorGraph, stream: &str, input: &str, values: &[i64]) -> Collector {
    let collector = Collector::attach(graph, stream, false);
    graph.start_run(HashMap::new()).unwrap();
    feed(graph, input, values);
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();
    collector
}

#[test]
fn test_subgraph_expands_with_prefixed_names() {
    let config = GraphConfig::new()
        .input("a")
        .output("b")
        .with_num_threads(1)
        .node(NodeConfig::new("OffsetPair").input("a").output("b"));
    let graph = CalculatorGraph::from_config(registry_with(vec![("OffsetPair", offset_pair())]), config).unwrap();

    let plan = graph.validated_config().unwrap();
    assert_eq!(plan.stats.total_nodes, 2);
    assert_eq!(plan.stats.expanded_subgraphs, 1);
    assert!(plan.node_by_name("offsetpair_0__relay").is_some());
    assert!(plan.node_by_name("offsetpair_0__AddOffsetCalculator").is_some());
    assert!(plan.stream_by_name("offsetpair_0__mid").is_some());
    // Boundary streams keep the outer names.
    assert!(plan.stream_by_name("a").is_some());
    assert!(plan.stream_by_name("offsetpair_0__in").is_none());

    let b = run_collect(&graph, "b", "a", &[1, 2, 3]);
    assert_eq!(b.values::<i64>(), vec![1, 2, 3]);
    assert_eq!(b.timestamps(), vec![2, 3, 4]);
}

#[test]
fn test_two_instances_do_not_share_streams() {
    let config = GraphConfig::new()
        .input("a")
        .output("c")
        .with_num_threads(2)
        .node(NodeConfig::new("OffsetPair").input("a").output("b"))
        .node(NodeConfig::new("OffsetPair").input("b").output("c"));
    let graph = CalculatorGraph::from_config(registry_with(vec![("OffsetPair", offset_pair())]), config).unwrap();

    let plan = graph.validated_config().unwrap();
    assert!(plan.stream_by_name("offsetpair_0__mid").is_some());
    assert!(plan.stream_by_name("offsetpair_1__mid").is_some());

    let c = run_collect(&graph, "c", "a", &[5, 6]);
    assert_eq!(c.timestamps(), vec![4, 5]);
}

#[test]
fn test_tagged_boundary_binding() {
    let tagged = GraphConfig::new()
        .input("VALUE:in")
        .input("GATE:gate")
        .output("VALUE:out")
        .node(
            NodeConfig::new("PassThroughCalculator")
                .input("in")
                .input("gate")
                .output("out")
                .output("gate_out"),
        );
    let config = GraphConfig::new()
        .input("x")
        .input("y")
        .output("z")
        .with_num_threads(1)
        .node(
            NodeConfig::new("Gated")
                .input("GATE:y")
                .input("VALUE:x")
                .output("VALUE:z"),
        );
    let graph = CalculatorGraph::from_config(registry_with(vec![("Gated", tagged)]), config).unwrap();
    let z = Collector::attach(&graph, "z", false);
    graph.start_run(HashMap::new()).unwrap();

    feed(&graph, "x", &[7i64, 8]);
    feed(&graph, "y", &[0i64, 0]);
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();

    assert_eq!(z.values::<i64>(), vec![7, 8]);
}

#[test]
fn test_unknown_boundary_tag_rejected() {
    let config = GraphConfig::new()
        .input("a")
        .output("b")
        .node(NodeConfig::new("OffsetPair").input("EXTRA:a").output("b"));

    let err = CalculatorGraph::from_config(registry_with(vec![("OffsetPair", offset_pair())]), config).unwrap_err();
    assert!(matches!(err.root_cause(), Error::Config(_)), "{err}");
}

#[test]
fn test_side_packets_cross_the_boundary() {
    let emitter = GraphConfig::new()
        .input_side("value")
        .output("out")
        .node(
            NodeConfig::new("SidePacketToStreamCalculator")
                .input_side("value")
                .output("out")
                .option("at", 0i64),
        );
    let config = GraphConfig::new()
        .input_side("seed")
        .output("seeded")
        .with_num_threads(1)
        .node(NodeConfig::new("Emitter").input_side("seed").output("seeded"));
    let graph = CalculatorGraph::from_config(registry_with(vec![("Emitter", emitter)]), config).unwrap();
    let seeded = Collector::attach(&graph, "seeded", false);

    let mut side_packets = HashMap::new();
    side_packets.insert("seed".to_string(), Packet::new(99i64));
    graph.run(side_packets).unwrap();

    assert_eq!(seeded.values::<i64>(), vec![99]);
}

#[test]
fn test_nested_subgraphs() {
    let doubled = GraphConfig::new()
        .input("in")
        .output("out")
        .node(NodeConfig::new("OffsetPair").input("in").output("half"))
        .node(NodeConfig::new("OffsetPair").input("half").output("out"));
    let config = GraphConfig::new()
        .input("a")
        .output("b")
        .with_num_threads(2)
        .node(NodeConfig::new("DoubleOffset").with_name("Twice").input("a").output("b"));
    let graph = CalculatorGraph::from_config(
        registry_with(vec![("OffsetPair", offset_pair()), ("DoubleOffset", doubled)]),
        config,
    )
    .unwrap();

    let plan = graph.validated_config().unwrap();
    assert_eq!(plan.stats.total_nodes, 4);
    assert!(plan.node_by_name("twice_0__offsetpair_1__relay").is_some());
    assert!(plan.stream_by_name("twice_0__half").is_some());

    let b = run_collect(&graph, "b", "a", &[1, 2, 3]);
    assert_eq!(b.timestamps(), vec![4, 5, 6]);
}

#[test]
fn test_self_including_subgraph_rejected() {
    let looping = GraphConfig::new()
        .input("in")
        .output("out")
        .node(NodeConfig::new("Loop").input("in").output("out"));
    let config = GraphConfig::new()
        .input("a")
        .output("b")
        .node(NodeConfig::new("Loop").input("a").output("b"));

    let err = CalculatorGraph::from_config(registry_with(vec![("Loop", looping)]), config).unwrap_err();
    assert!(matches!(err.root_cause(), Error::Config(_)), "{err}");
    assert!(err.to_string().contains("Loop"), "{err}");
}
