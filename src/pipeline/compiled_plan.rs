//! Validated graph: the read-only index the scheduler is built from.

use crate::config::{GraphConfig, NodeOptions};
use crate::pipeline::calculator::CalculatorContract;
use crate::pipeline::id::{NodeId, SidePacketId, StreamId};
use crate::pipeline::input_handler::HandlerSpec;
use crate::pipeline::packet::PacketType;
use crate::pipeline::port::TagMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Something that injects packets into the graph without consuming any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceRef {
    GraphInput(StreamId),
    Node(NodeId),
}

/// Producer of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProducer {
    GraphInput,
    Node { node: NodeId, port: usize },
}

/// One input port reading a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConsumer {
    pub node: NodeId,
    pub port: usize,
    pub back_edge: bool,
}

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub id: StreamId,
    pub name: String,
    pub producer: StreamProducer,
    pub packet_type: PacketType,
    pub consumers: Vec<StreamConsumer>,
}

/// Producer of a side packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidePacketProducer {
    /// Supplied to `start_run`.
    Graph,
    Node { node: NodeId, port: usize },
}

#[derive(Debug, Clone)]
pub struct SidePacketInfo {
    pub id: SidePacketId,
    pub name: String,
    pub producer: SidePacketProducer,
    pub packet_type: PacketType,
    /// `(node, input side packet port)` readers.
    pub consumers: Vec<(NodeId, usize)>,
}

/// Validated metadata of one node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub calculator: String,
    pub options: NodeOptions,
    pub contract: CalculatorContract,
    pub handler: HandlerSpec,
    /// Stream read by each input port.
    pub input_streams: Vec<StreamId>,
    pub back_edges: Vec<bool>,
    /// Stream written by each output port.
    pub output_streams: Vec<StreamId>,
    pub input_side_packets: Vec<SidePacketId>,
    pub output_side_packets: Vec<SidePacketId>,
    /// Named executor, `None` for the graph default.
    pub executor: Option<String>,
    /// Position in the topological order, back edges excluded.
    pub rank: usize,
    /// Graph inputs and source nodes this node depends on.
    pub ancestor_sources: BTreeSet<SourceRef>,
}

impl NodeInfo {
    pub fn input_tag_map(&self) -> &Arc<TagMap> {
        self.contract.inputs().tag_map()
    }

    pub fn output_tag_map(&self) -> &Arc<TagMap> {
        self.contract.outputs().tag_map()
    }

    /// A node without input streams runs until it returns `Stop`.
    pub fn is_source(&self) -> bool {
        self.input_streams.is_empty()
    }

    pub fn is_sink(&self) -> bool {
        self.output_streams.is_empty()
    }
}

/// Statistics about the validated graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Nodes after subgraph expansion.
    pub total_nodes: usize,

    /// Subgraph nodes replaced during expansion.
    pub expanded_subgraphs: usize,

    /// Streams, graph inputs included.
    pub streams: usize,

    pub side_packets: usize,

    pub back_edges: usize,

    /// Nodes without input streams.
    pub source_nodes: usize,

    /// Nodes without output streams.
    pub sink_nodes: usize,

    /// Validation time in microseconds
    pub compile_time_us: u64,
}

/// Canonical, type-checked form of a [`GraphConfig`]. Built once by
/// [`GraphCompiler`](crate::pipeline::compiler::GraphCompiler) and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct ValidatedGraphConfig {
    pub config: GraphConfig,
    pub nodes: Vec<NodeInfo>,
    pub streams: Vec<StreamInfo>,
    pub side_packets: Vec<SidePacketInfo>,
    pub stream_index: HashMap<String, StreamId>,
    pub side_packet_index: HashMap<String, SidePacketId>,
    pub graph_input_streams: Vec<StreamId>,
    pub graph_output_streams: Vec<StreamId>,
    /// Node ids in dependency order, back edges excluded.
    pub topological_order: Vec<NodeId>,
    pub stats: PlanStats,
}

impl ValidatedGraphConfig {
    pub fn node(&self, id: NodeId) -> &NodeInfo {
        &self.nodes[id.index()]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn stream(&self, id: StreamId) -> &StreamInfo {
        &self.streams[id.index()]
    }

    pub fn stream_by_name(&self, name: &str) -> Option<&StreamInfo> {
        self.stream_index.get(name).map(|id| self.stream(*id))
    }

    pub fn side_packet_by_name(&self, name: &str) -> Option<&SidePacketInfo> {
        self.side_packet_index
            .get(name)
            .map(|id| &self.side_packets[id.index()])
    }

    pub fn is_graph_input(&self, name: &str) -> bool {
        self.stream_by_name(name)
            .is_some_and(|s| s.producer == StreamProducer::GraphInput)
    }

    pub fn has_source_nodes(&self) -> bool {
        self.nodes.iter().any(NodeInfo::is_source)
    }
}
