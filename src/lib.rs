//! # calcgraph: timestamped calculator graphs
//!
//! A dataflow engine in which independent calculators exchange timestamped
//! packets over named streams. Each node runs as soon as its inputs are
//! settled at a timestamp, on a configurable pool of executors, while the
//! engine keeps per-stream and per-node timestamp order.
//!
//! ## Architecture
//!
//! - **Config**: graphs are described in TOML or JSON ([`config::GraphConfig`])
//! - **Validation**: [`pipeline::GraphCompiler`] checks names, tags, types and
//!   cycles and expands subgraphs into a [`pipeline::ValidatedGraphConfig`]
//! - **Run control**: [`pipeline::CalculatorGraph`] starts runs, feeds graph
//!   input streams and waits for completion
//! - **Scheduling**: readiness comes from input stream handlers; work runs on
//!   thread pools or the calling thread
//! - **Observation**: output stream callbacks and crossbeam-backed pollers
//!
//! ## Example
//!
//! ```ignore
//! use calcgraph::{CalculatorGraph, CalculatorRegistry, GraphConfig, NodeConfig, Packet, Timestamp};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! fn main() -> calcgraph::Result<()> {
//!     let config = GraphConfig::new()
//!         .input("in")
//!         .output("out")
//!         .node(NodeConfig::new("PassThroughCalculator").input("in").output("out"));
//!
//!     let graph = CalculatorGraph::from_config(Arc::new(CalculatorRegistry::with_builtins()), config)?;
//!     let poller = graph.add_output_stream_poller("out")?;
//!     graph.start_run(HashMap::new())?;
//!     for t in 0..3 {
//!         graph.add_packet_to_input_stream("in", Packet::new(t * 10).into_at(Timestamp::new(t)))?;
//!     }
//!     graph.close_all_input_streams()?;
//!     graph.wait_until_done()?;
//!
//!     for packet in poller.iter() {
//!         println!("{}: {}", packet.timestamp(), packet.get::<i64>()?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use config::{ExecutorConfig, ExecutorKind, GraphConfig, InputStreamHandlerConfig, NodeConfig, NodeOptions};
pub use error::{Error, Result, ResultExt};
pub use pipeline::{
    Calculator, CalculatorContext, CalculatorContract, CalculatorGraph, CalculatorRegistry,
    CalculatorType, GraphInputStreamAddMode, OutputStreamPoller, Packet, PacketType, Timestamp,
    TimestampDiff, ValidatedGraphConfig,
};
