use super::compiled_plan::{
    NodeInfo, PlanStats, SidePacketInfo, SidePacketProducer, SourceRef, StreamConsumer,
    StreamInfo, StreamProducer, ValidatedGraphConfig,
};
use super::registry::CalculatorRegistry;
use crate::config::{
    expand_subgraphs, GraphConfig, InputStreamHandlerConfig, NodeConfig, NodeOptions,
    DEFAULT_INPUT_STREAM_HANDLER,
};
use crate::error::{Error, Result, ResultExt};
use crate::pipeline::calculator::CalculatorContract;
use crate::pipeline::id::{NodeId, SidePacketId, StreamId};
use crate::pipeline::input_handler::HandlerSpec;
use crate::pipeline::packet::PacketType;
use crate::pipeline::port::{parse_tag_index, parse_tag_index_name, TagMap};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Compiles a graph config into a [`ValidatedGraphConfig`].
pub struct GraphCompiler;

impl GraphCompiler {
    /// Validate `config` against the calculators in `registry`.
    ///
    /// Expands subgraphs, collects every calculator contract, connects each
    /// input port to the single producer of its stream, type-checks the
    /// edges and orders the nodes topologically with back edges removed.
    /// All problems are reported here, before any node runs.
    pub fn compile(config: &GraphConfig, registry: &CalculatorRegistry) -> Result<ValidatedGraphConfig> {
        let start_time = std::time::Instant::now();

        let lookup = |name: &str| registry.subgraph(name);
        let expanded = expand_subgraphs(config, &lookup)?;
        let expanded_subgraphs = config
            .nodes
            .iter()
            .filter(|n| registry.subgraph(&n.calculator).is_some())
            .count();

        let mut tables = Tables::default();
        tables.add_graph_inputs(&expanded)?;

        let names = Self::node_names(&expanded.nodes)?;
        let mut nodes = Vec::with_capacity(expanded.nodes.len());
        for (index, (node, name)) in expanded.nodes.iter().zip(names).enumerate() {
            let info = Self::declare_node(NodeId(index as u32), name, node, &expanded, registry, &mut tables)
                .with_context(|| format!("node \"{}\"", node.display_name()))?;
            nodes.push(info);
        }

        for (node, node_config) in nodes.iter_mut().zip(&expanded.nodes) {
            Self::connect_inputs(node, node_config, &mut tables)
                .with_context(|| format!("node \"{}\"", node.name))?;
        }

        let graph_output_streams = expanded
            .output_stream
            .iter()
            .map(|spec| {
                let name = parse_tag_index_name(spec)?.name;
                tables
                    .stream_index
                    .get(&name)
                    .copied()
                    .ok_or_else(|| Error::Config(format!("graph output stream \"{}\" is never produced", name)))
            })
            .collect::<Result<Vec<_>>>()?;
        for spec in &expanded.output_side_packet {
            let name = parse_tag_index_name(spec)?.name;
            if !tables.side_packet_index.contains_key(&name) {
                return Err(Error::Config(format!(
                    "graph output side packet \"{}\" is never produced",
                    name
                )));
            }
        }

        let topological_order = Self::topological_sort(&nodes, &tables.streams)?;
        for (rank, id) in topological_order.iter().enumerate() {
            nodes[id.index()].rank = rank;
        }
        Self::compute_ancestors(&mut nodes, &tables.streams, &topological_order);

        let back_edges = nodes
            .iter()
            .map(|n| n.back_edges.iter().filter(|b| **b).count())
            .sum();
        let stats = PlanStats {
            total_nodes: nodes.len(),
            expanded_subgraphs,
            streams: tables.streams.len(),
            side_packets: tables.side_packets.len(),
            back_edges,
            source_nodes: nodes.iter().filter(|n| n.is_source()).count(),
            sink_nodes: nodes.iter().filter(|n| n.is_sink()).count(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        tracing::info!(
            "Graph validated: {} nodes, {} streams, {} side packets ({} us)",
            stats.total_nodes,
            stats.streams,
            stats.side_packets,
            stats.compile_time_us
        );

        Ok(ValidatedGraphConfig {
            config: expanded,
            nodes,
            streams: tables.streams,
            side_packets: tables.side_packets,
            stream_index: tables.stream_index,
            side_packet_index: tables.side_packet_index,
            graph_input_streams: tables.graph_input_streams,
            graph_output_streams,
            topological_order,
            stats,
        })
    }

    /// Unique node names. Explicit names must not repeat; unnamed nodes
    /// take their calculator name, numbered when it is shared.
    fn node_names(nodes: &[NodeConfig]) -> Result<Vec<String>> {
        let mut explicit = HashSet::new();
        for node in nodes {
            if let Some(name) = &node.name {
                if !explicit.insert(name.clone()) {
                    return Err(Error::AlreadyExists(format!("node name \"{}\"", name)));
                }
            }
        }

        let mut calculator_counts: HashMap<&str, usize> = HashMap::new();
        for node in nodes.iter().filter(|n| n.name.is_none()) {
            *calculator_counts.entry(node.calculator.as_str()).or_default() += 1;
        }

        let mut taken = explicit;
        let mut next_suffix: HashMap<&str, usize> = HashMap::new();
        let mut names = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(name) = &node.name {
                names.push(name.clone());
                continue;
            }
            let base = node.calculator.as_str();
            let name = if calculator_counts[base] == 1 && !taken.contains(base) {
                base.to_string()
            } else {
                let suffix = next_suffix.entry(base).or_insert(0);
                loop {
                    let candidate = format!("{}_{}", base, suffix);
                    *suffix += 1;
                    if !taken.contains(&candidate) {
                        break candidate;
                    }
                }
            };
            taken.insert(name.clone());
            names.push(name);
        }
        Ok(names)
    }

    fn declare_node(
        id: NodeId,
        name: String,
        node: &NodeConfig,
        graph: &GraphConfig,
        registry: &CalculatorRegistry,
        tables: &mut Tables,
    ) -> Result<NodeInfo> {
        let inputs = Arc::new(TagMap::from_specs(&node.input_stream)?);
        let outputs = Arc::new(TagMap::from_specs(&node.output_stream)?);
        let input_sides = Arc::new(TagMap::from_specs(&node.input_side_packet)?);
        let output_sides = Arc::new(TagMap::from_specs(&node.output_side_packet)?);

        let options = NodeOptions::new(node.options.clone());
        let mut contract = CalculatorContract::new(
            name.clone(),
            options.clone(),
            inputs.clone(),
            outputs.clone(),
            input_sides,
            output_sides.clone(),
        );
        registry
            .get_contract(&node.calculator, &mut contract)
            .map_err(|e| match e {
                Error::NotFound(_) | Error::Config(_) => e,
                other => Error::Config(format!("contract of {}: {}", node.calculator, other)),
            })?;

        let handler_config = node
            .input_stream_handler
            .clone()
            .or_else(|| contract.input_stream_handler().cloned())
            .or_else(|| graph.input_stream_handler.clone())
            .unwrap_or_else(|| InputStreamHandlerConfig::new(DEFAULT_INPUT_STREAM_HANDLER));
        let handler = HandlerSpec::resolve(&handler_config, &inputs)?;

        if let Some(executor) = node.executor.as_deref().filter(|e| !e.is_empty()) {
            if !graph.executors.iter().any(|e| e.name == executor) {
                return Err(Error::NotFound(format!("executor \"{}\"", executor)));
            }
        }

        let output_streams = (0..outputs.num_entries())
            .map(|port| {
                tables.add_stream(
                    outputs.name(port),
                    StreamProducer::Node { node: id, port },
                    *contract.outputs().by_id(port),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let output_side_packets = (0..output_sides.num_entries())
            .map(|port| {
                tables.add_side_packet(
                    output_sides.name(port),
                    SidePacketProducer::Node { node: id, port },
                    *contract.output_side_packets().by_id(port),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(NodeInfo {
            id,
            name,
            calculator: node.calculator.clone(),
            options,
            contract,
            handler,
            input_streams: Vec::new(),
            back_edges: vec![false; inputs.num_entries()],
            output_streams,
            input_side_packets: Vec::new(),
            output_side_packets,
            executor: node.executor.clone().filter(|e| !e.is_empty()),
            rank: 0,
            ancestor_sources: BTreeSet::new(),
        })
    }

    fn connect_inputs(node: &mut NodeInfo, config: &NodeConfig, tables: &mut Tables) -> Result<()> {
        let inputs = node.input_tag_map().clone();
        for info in &config.input_stream_info {
            let (tag, index) = parse_tag_index(&info.tag_index)?;
            let port = inputs.get_id(&tag, index).ok_or_else(|| {
                Error::Config(format!("input_stream_info names unknown input \"{}\"", info.tag_index))
            })?;
            node.back_edges[port] = info.back_edge;
        }

        for port in 0..inputs.num_entries() {
            let name = inputs.name(port);
            let stream_id = *tables.stream_index.get(name).ok_or_else(|| {
                Error::Config(format!("input stream \"{}\" has no producer", name))
            })?;
            let stream = &mut tables.streams[stream_id.index()];
            let consumer_type = *node.contract.inputs().by_id(port);
            if !stream.packet_type.is_compatible_with(&consumer_type) {
                return Err(Error::Config(format!(
                    "stream \"{}\" carries {} but input {} expects {}",
                    name,
                    stream.packet_type.name(),
                    inputs.label(port),
                    consumer_type.name()
                )));
            }
            stream.consumers.push(StreamConsumer {
                node: node.id,
                port,
                back_edge: node.back_edges[port],
            });
            node.input_streams.push(stream_id);
        }

        let input_sides = node.contract.input_side_packets().tag_map().clone();
        for port in 0..input_sides.num_entries() {
            let name = input_sides.name(port);
            let spec = *node.contract.input_side_packets().by_id(port);
            let side_id = match tables.side_packet_index.get(name) {
                Some(id) => *id,
                // Not produced by any node: expected from `start_run`.
                None => tables.add_side_packet(name, SidePacketProducer::Graph, spec.packet_type)?,
            };
            let side = &mut tables.side_packets[side_id.index()];
            if !side.packet_type.is_compatible_with(&spec.packet_type) {
                return Err(Error::Config(format!(
                    "side packet \"{}\" carries {} but {} expects {}",
                    name,
                    side.packet_type.name(),
                    input_sides.label(port),
                    spec.packet_type.name()
                )));
            }
            side.consumers.push((node.id, port));
            node.input_side_packets.push(side_id);
        }
        Ok(())
    }

    /// Kahn's algorithm over node-to-node edges, back edges excluded.
    fn topological_sort(nodes: &[NodeInfo], streams: &[StreamInfo]) -> Result<Vec<NodeId>> {
        let n = nodes.len();
        let mut adj = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];

        for stream in streams {
            let StreamProducer::Node { node: from, .. } = stream.producer else {
                continue;
            };
            for consumer in stream.consumers.iter().filter(|c| !c.back_edge) {
                adj[from.index()].push(consumer.node.index());
                in_degree[consumer.node.index()] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(node) = queue.pop_front() {
            order.push(NodeId(node as u32));
            for &neighbor in &adj[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<&str> = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| nodes[i].name.as_str())
                .collect();
            return Err(Error::Config(format!(
                "cycle through nodes [{}]; mark one input of the loop as a back edge",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Ancestor source sets, filled in topological order.
    fn compute_ancestors(nodes: &mut [NodeInfo], streams: &[StreamInfo], order: &[NodeId]) {
        for id in order {
            let mut ancestors = BTreeSet::new();
            let node = &nodes[id.index()];
            for (port, stream_id) in node.input_streams.iter().enumerate() {
                if node.back_edges[port] {
                    continue;
                }
                match streams[stream_id.index()].producer {
                    StreamProducer::GraphInput => {
                        ancestors.insert(SourceRef::GraphInput(*stream_id));
                    }
                    StreamProducer::Node { node: producer, .. } => {
                        let producer = &nodes[producer.index()];
                        ancestors.extend(producer.ancestor_sources.iter().copied());
                        if producer.is_source() {
                            ancestors.insert(SourceRef::Node(producer.id));
                        }
                    }
                }
            }
            nodes[id.index()].ancestor_sources = ancestors;
        }
    }
}

/// Stream and side packet tables under construction.
#[derive(Default)]
struct Tables {
    streams: Vec<StreamInfo>,
    stream_index: HashMap<String, StreamId>,
    graph_input_streams: Vec<StreamId>,
    side_packets: Vec<SidePacketInfo>,
    side_packet_index: HashMap<String, SidePacketId>,
}

impl Tables {
    fn add_graph_inputs(&mut self, graph: &GraphConfig) -> Result<()> {
        for spec in &graph.input_stream {
            let name = parse_tag_index_name(spec)?.name;
            let id = self.add_stream(&name, StreamProducer::GraphInput, PacketType::Any)?;
            self.graph_input_streams.push(id);
        }
        for spec in &graph.input_side_packet {
            let name = parse_tag_index_name(spec)?.name;
            self.add_side_packet(&name, SidePacketProducer::Graph, PacketType::Any)?;
        }
        Ok(())
    }

    fn add_stream(&mut self, name: &str, producer: StreamProducer, packet_type: PacketType) -> Result<StreamId> {
        if self.stream_index.contains_key(name) {
            return Err(Error::AlreadyExists(format!(
                "stream \"{}\" has more than one producer",
                name
            )));
        }
        let id = StreamId(self.streams.len() as u32);
        self.streams.push(StreamInfo {
            id,
            name: name.to_string(),
            producer,
            packet_type,
            consumers: Vec::new(),
        });
        self.stream_index.insert(name.to_string(), id);
        Ok(id)
    }

    fn add_side_packet(
        &mut self,
        name: &str,
        producer: SidePacketProducer,
        packet_type: PacketType,
    ) -> Result<SidePacketId> {
        if self.side_packet_index.contains_key(name) {
            return Err(Error::AlreadyExists(format!(
                "side packet \"{}\" has more than one producer",
                name
            )));
        }
        let id = SidePacketId(self.side_packets.len() as u32);
        self.side_packets.push(SidePacketInfo {
            id,
            name: name.to_string(),
            producer,
            packet_type,
            consumers: Vec::new(),
        });
        self.side_packet_index.insert(name.to_string(), id);
        Ok(id)
    }
}
