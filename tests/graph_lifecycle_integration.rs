//! Integration tests for the graph run lifecycle
//!
//! These tests validate:
//! - Source nodes and graph runs without inputs
//! - Restarts with fresh calculators
//! - Error reporting from calculators and from packet typing
//! - Named executors and resource loading

mod common;

use calcgraph::pipeline::resources::ResourceOptions;
use calcgraph::pipeline::FileResources;
use calcgraph::{
    Calculator, CalculatorContext, CalculatorGraph, Error, ExecutorConfig, ExecutorKind, GraphConfig,
    NodeConfig, Packet, PacketType, Result, Timestamp,
};
use common::{at, feed, graph, registry, test_timeout, Collector};
use std::collections::HashMap;
use std::sync::Arc;

fn source_graph(count: i64) -> GraphConfig {
    GraphConfig::new()
        .output("out")
        .with_num_threads(2)
        .node(
            NodeConfig::new("IntSourceCalculator")
                .output("numbers")
                .option("count", count),
        )
        .node(NodeConfig::new("PassThroughCalculator").input("numbers").output("out"))
}

#[test]
fn test_source_graph_runs_to_completion() {
    let graph = graph(source_graph(5));
    let poller = graph.add_output_stream_poller("out").unwrap();
    graph.run(HashMap::new()).unwrap();

    let values: Vec<i64> = poller.iter().map(|p| *p.get::<i64>().unwrap()).collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_poller_blocks_until_packets_arrive() {
    let graph = graph(source_graph(3));
    let poller = graph.add_output_stream_poller("out").unwrap();
    graph.start_run(HashMap::new()).unwrap();

    let first = poller.next_timeout(test_timeout()).expect("first packet");
    assert_eq!(first.timestamp(), Timestamp::new(0));

    graph.wait_until_done().unwrap();
    assert_eq!(poller.iter().count(), 2);
    assert!(poller.next().is_none());
}

#[test]
fn test_restart_uses_fresh_calculators() {
    let graph = graph(source_graph(4));
    let out = Collector::attach(&graph, "out", false);

    graph.run(HashMap::new()).unwrap();
    assert_eq!(out.values::<i64>(), vec![0, 1, 2, 3]);

    out.clear();
    graph.restart().unwrap();
    graph.wait_until_done().unwrap();
    // A reused source would have nothing left to emit.
    assert_eq!(out.values::<i64>(), vec![0, 1, 2, 3]);
}

#[test]
fn test_poller_belongs_to_one_run() {
    let graph = graph(source_graph(2));
    let poller = graph.add_output_stream_poller("out").unwrap();

    graph.run(HashMap::new()).unwrap();
    assert_eq!(poller.iter().count(), 2);

    graph.restart().unwrap();
    graph.wait_until_done().unwrap();
    assert!(poller.try_next().is_none());
}

#[test]
fn test_calculator_error_fails_run() {
    let config = GraphConfig::new()
        .input("in")
        .output("out")
        .with_num_threads(2)
        .node(
            NodeConfig::new("FailOnCalculator")
                .with_name("picky")
                .input("in")
                .output("out")
                .option("fail_on", 3i64),
        );
    let graph = graph(config);
    let out = Collector::attach(&graph, "out", false);
    graph.start_run(HashMap::new()).unwrap();

    for t in 0..10i64 {
        if graph.add_packet_to_input_stream("in", at(t, t)).is_err() {
            break;
        }
    }
    let _ = graph.close_all_input_streams();

    let err = graph.wait_until_done().unwrap_err();
    assert!(matches!(err.root_cause(), Error::Calculator { .. }), "{err}");
    assert!(err.to_string().contains("picky"), "{err}");
    assert!(graph.has_error());
    assert!(out.values::<i64>().iter().all(|v| *v < 3));
}

#[test]
fn test_stream_type_mismatch_rejected_at_init() {
    let config = GraphConfig::new()
        .input("in")
        .output("out")
        .node(NodeConfig::new("IntToStringCalculator").input("in").output("text"))
        .node(NodeConfig::new("FailOnCalculator").input("text").output("out"));

    let err = CalculatorGraph::from_config(Arc::new(registry()), config).unwrap_err();
    assert!(matches!(err.root_cause(), Error::Config(_)), "{err}");
}

#[test]
fn test_wrong_packet_type_at_runtime() {
    let config = GraphConfig::new()
        .input("in")
        .output("out")
        .with_num_threads(1)
        .node(NodeConfig::new("IntToStringCalculator").input("in").output("out"));
    let graph = graph(config);
    graph.start_run(HashMap::new()).unwrap();

    let added = graph.add_packet_to_input_stream("in", at("seven".to_string(), 0));
    let _ = graph.close_all_input_streams();
    let done = graph.wait_until_done();

    let err = added.err().or(done.err()).expect("wrong type should fail");
    assert!(matches!(err.root_cause(), Error::Contract(_)), "{err}");
}

#[test]
fn test_typed_chain_converts() {
    let config = GraphConfig::new()
        .input("in")
        .output("text")
        .with_num_threads(1)
        .node(NodeConfig::new("IntToStringCalculator").input("in").output("text"));
    let graph = graph(config);
    let text = Collector::attach(&graph, "text", false);
    graph.start_run(HashMap::new()).unwrap();

    feed(&graph, "in", &[4i64, 2]);
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();

    assert_eq!(text.values::<String>(), vec!["4".to_string(), "2".to_string()]);
}

#[test]
fn test_missing_side_packet_fails_start() {
    let config = GraphConfig::new()
        .input_side("value")
        .output("out")
        .node(
            NodeConfig::new("SidePacketToStreamCalculator")
                .input_side("value")
                .output("out"),
        );
    let graph = graph(config);

    let err = graph.start_run(HashMap::new()).unwrap_err();
    assert!(matches!(err.root_cause(), Error::Config(_)), "{err}");
}

#[test]
fn test_nodes_on_named_executor() {
    let config = GraphConfig::new()
        .input("in")
        .output("out")
        .with_num_threads(1)
        .with_executor(ExecutorConfig {
            name: "workers".to_string(),
            kind: ExecutorKind::ThreadPool,
            num_threads: Some(3),
        })
        .node(
            NodeConfig::new("PassThroughCalculator")
                .input("in")
                .output("mid")
                .on_executor("workers"),
        )
        .node(NodeConfig::new("PassThroughCalculator").input("mid").output("out"));
    let graph = graph(config);
    let out = Collector::attach(&graph, "out", false);
    graph.start_run(HashMap::new()).unwrap();

    feed(&graph, "in", &(0..100i64).collect::<Vec<_>>());
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();

    assert_eq!(out.values::<i64>(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_unknown_executor_rejected() {
    let config = GraphConfig::new()
        .input("in")
        .output("out")
        .node(
            NodeConfig::new("PassThroughCalculator")
                .input("in")
                .output("out")
                .on_executor("gpu"),
        );

    let err = CalculatorGraph::from_config(Arc::new(registry()), config).unwrap_err();
    assert!(matches!(err.root_cause(), Error::NotFound(_)), "{err}");
}

#[test]
fn test_plan_stats() {
    let graph = graph(source_graph(1));
    let plan = graph.validated_config().expect("initialized");

    assert_eq!(plan.stats.total_nodes, 2);
    assert_eq!(plan.stats.source_nodes, 1);
    assert!(plan.has_source_nodes());
    assert!(plan.node_by_name("IntSourceCalculator").is_some());
}

/// Source that emits the text of the resource named by option `resource`.
struct ResourceTextCalculator {
    resource: String,
}

impl Calculator for ResourceTextCalculator {
    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let resource = cc
            .resources()
            .get(&self.resource, &ResourceOptions::default())?;
        let text = resource.as_str()?.trim().to_string();
        cc.output("", 0)?.add_value(text, Timestamp::new(0))?;
        Err(Error::Stop)
    }
}

#[test]
fn test_calculators_read_graph_resources() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("labels.txt"), "person\n").unwrap();

    let mut registry = registry();
    registry
        .register_fn(
            "ResourceTextCalculator",
            |cc| {
                cc.set_outputs("", PacketType::of::<String>());
                Ok(())
            },
            |options| {
                Ok(Box::new(ResourceTextCalculator {
                    resource: options.get_or("resource", String::new())?,
                }) as Box<dyn Calculator>)
            },
        )
        .unwrap();

    let config = GraphConfig::new()
        .output("text")
        .with_num_threads(1)
        .node(
            NodeConfig::new("ResourceTextCalculator")
                .output("text")
                .option("resource", "labels.txt"),
        );
    let graph = CalculatorGraph::from_config(Arc::new(registry), config)
        .unwrap()
        .with_resources(Arc::new(FileResources::new(dir.path())));
    let text = Collector::attach(&graph, "text", false);
    graph.run(HashMap::new()).unwrap();

    assert_eq!(text.values::<String>(), vec!["person".to_string()]);
}

#[test]
fn test_missing_resource_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = registry();
    registry
        .register_fn(
            "ResourceTextCalculator",
            |cc| {
                cc.set_outputs("", PacketType::of::<String>());
                Ok(())
            },
            |_options| {
                Ok(Box::new(ResourceTextCalculator {
                    resource: "absent.txt".to_string(),
                }) as Box<dyn Calculator>)
            },
        )
        .unwrap();

    let config = GraphConfig::new()
        .output("text")
        .with_num_threads(1)
        .node(NodeConfig::new("ResourceTextCalculator").output("text"));
    let graph = CalculatorGraph::from_config(Arc::new(registry), config)
        .unwrap()
        .with_resources(Arc::new(FileResources::new(dir.path())));

    let err = graph.run(HashMap::new()).unwrap_err();
    assert!(matches!(err.root_cause(), Error::Io(_)), "{err}");
}

#[test]
fn test_side_packets_survive_restart() {
    let config = GraphConfig::new()
        .input_side("value")
        .output("out")
        .with_num_threads(1)
        .node(
            NodeConfig::new("SidePacketToStreamCalculator")
                .input_side("value")
                .output("out")
                .option("at", 0i64),
        );
    let graph = graph(config);
    let out = Collector::attach(&graph, "out", false);

    let mut side_packets = HashMap::new();
    side_packets.insert("value".to_string(), Packet::new(11i64));
    graph.run(side_packets).unwrap();
    graph.restart().unwrap();
    graph.wait_until_done().unwrap();

    assert_eq!(out.values::<i64>(), vec![11, 11]);
    assert_eq!(*graph.get_output_side_packet("value").unwrap().get::<i64>().unwrap(), 11);
}
