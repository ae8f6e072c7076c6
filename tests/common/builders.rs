//! Graph config builders shared by the integration tests

use calcgraph::{GraphConfig, NodeConfig};

/// `in` → PassThrough × `length` → `out`.
pub fn chain_graph(length: usize, num_threads: usize) -> GraphConfig {
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

/// Three data inputs and a `select` stream into a mux.
pub fn mux_graph(num_threads: usize) -> GraphConfig {
    GraphConfig::new()
        .input("in0")
        .input("in1")
        .input("in2")
        .input("select")
        .output("out")
        .with_num_threads(num_threads)
        .node(
            NodeConfig::new("MuxCalculator")
                .input("INPUT:0:in0")
                .input("INPUT:1:in1")
                .input("INPUT:2:in2")
                .input("SELECT:select")
                .output("OUTPUT:out"),
        )
}

/// Same as [`mux_graph`] with the selector as a side packet.
pub fn mux_side_graph(num_threads: usize) -> GraphConfig {
    GraphConfig::new()
        .input("in0")
        .input("in1")
        .input("in2")
        .output("out")
        .with_num_threads(num_threads)
        .node(
            NodeConfig::new("MuxCalculator")
                .input("INPUT:0:in0")
                .input("INPUT:1:in1")
                .input("INPUT:2:in2")
                .input_side("SELECT:select")
                .output("OUTPUT:out"),
        )
}

/// Split a 4-element `Vec<i32>` into one stream per element and pick one
/// of them per timestamp with the `select` stream.
pub fn split_mux_graph(num_threads: usize) -> GraphConfig {
    let ranges = toml::Value::Array(
        (0..4i64)
            .map(|i| toml::Value::Array(vec![toml::Value::Integer(i), toml::Value::Integer(i + 1)]))
            .collect(),
    );
    GraphConfig::new()
        .input("vector")
        .input("select")
        .output("out")
        .with_num_threads(num_threads)
        .node(
            NodeConfig::new("SplitIntVectorCalculator")
                .input("vector")
                .output("e0")
                .output("e1")
                .output("e2")
                .output("e3")
                .option("ranges", ranges)
                .option("element_only", true),
        )
        .node(
            NodeConfig::new("MuxCalculator")
                .input("INPUT:0:e0")
                .input("INPUT:1:e1")
                .input("INPUT:2:e2")
                .input("INPUT:3:e3")
                .input("SELECT:select")
                .output("OUTPUT:out"),
        )
}

/// `in` → round-robin demux over three branches → mux driven by the
/// demux's own SELECT output → `out`.
pub fn demux_mux_graph(num_threads: usize) -> GraphConfig {
    let mut config = GraphConfig::new()
        .input("in")
        .output("out")
        .with_num_threads(num_threads)
        .node(
            NodeConfig::new("RoundRobinDemuxCalculator")
                .input("in")
                .output("OUTPUT:0:d0")
                .output("OUTPUT:1:d1")
                .output("OUTPUT:2:d2")
                .output("SELECT:which"),
        );
    for i in 0..3 {
        config = config.node(
            NodeConfig::new("PassThroughCalculator")
                .with_name(format!("branch{}", i))
                .input(format!("d{}", i))
                .output(format!("b{}", i)),
        );
    }
    config.node(
        NodeConfig::new("MuxCalculator")
            .input("INPUT:0:b0")
            .input("INPUT:1:b1")
            .input("INPUT:2:b2")
            .input("SELECT:which")
            .output("OUTPUT:out"),
    )
}

/// Fibonacci-flavoured data for the three mux inputs.
pub fn mux_inputs() -> [Vec<i64>; 3] {
    [
        vec![1, 3, 13, 55, 233, 987, 4181],
        vec![1, 5, 21, 89, 377, 1597, 6765],
        vec![2, 8, 34, 144, 610, 2584, 10946],
    ]
}
