//! Run core: readiness-driven dispatch of node tasks.
//!
//! A [`Scheduler`] lives for exactly one run. Whenever a node's inputs,
//! bounds or side packets change, the scheduler re-evaluates that node and,
//! when it can make progress, marks it busy and hands one task (open,
//! process or close) to the node's executor. When the task finishes the
//! node is evaluated again. There is no global schedule; ordering comes
//! from timestamps and bounds only.
//!
//! Run-wide bookkeeping (in-flight task count, closed nodes, first error,
//! full queues, throttled sources) sits behind one mutex paired with one
//! condition variable that every waiting caller sleeps on.

use crate::error::{Error, Result, ResultExt};
use crate::pipeline::calculator::Phase;
use crate::pipeline::compiled_plan::{
    NodeInfo, SidePacketProducer, SourceRef, StreamProducer, ValidatedGraphConfig,
};
use crate::pipeline::executor::Executor;
use crate::pipeline::id::{NodeId, StreamId};
use crate::pipeline::input_handler::NodeReadiness;
use crate::pipeline::input_stream::InputStreamManager;
use crate::pipeline::node::{CalculatorNode, Lifecycle, NodeRuntime, NodeTask};
use crate::pipeline::output_stream::{Mirror, OutputStreamManager};
use crate::pipeline::packet::Packet;
use crate::pipeline::port::TaggedCollection;
use crate::pipeline::registry::CalculatorRegistry;
use crate::pipeline::resources::Resources;
use crate::pipeline::timestamp::Timestamp;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// How `add_packet` behaves when a consumer queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphInputStreamAddMode {
    /// Block until the queue has room.
    #[default]
    WaitTillNotFull,
    /// Fail with [`Error::Unavailable`] instead of blocking.
    AddIfNotFull,
}

/// Knobs taken from the graph config.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RunSettings {
    pub max_queue_size: Option<usize>,
    pub report_deadlock: bool,
}

#[derive(Default)]
struct RunState {
    /// Tasks dispatched and not yet finished.
    pending: usize,
    closed_nodes: usize,
    /// First fatal error of the run.
    error: Option<Error>,
    /// No new tasks are started.
    stopping: bool,
    finished: bool,
    /// Limited input queues at or over their limit.
    full: BTreeSet<(NodeId, usize)>,
    /// Source nodes skipped because a queue they feed is full.
    throttled_sources: BTreeSet<NodeId>,
}

pub(crate) struct Scheduler {
    plan: Arc<ValidatedGraphConfig>,
    nodes: Vec<CalculatorNode>,
    /// One manager per stream, graph inputs included.
    streams: Vec<OutputStreamManager>,
    side_packets: Vec<Mutex<Option<Packet>>>,
    executors: Vec<Arc<dyn Executor>>,
    /// Executors whose tasks run inside waiting calls.
    caller_executors: Vec<Arc<dyn Executor>>,
    resources: Arc<dyn Resources>,
    settings: RunSettings,
    state: Mutex<RunState>,
    cv: Condvar,
}

impl Scheduler {
    /// Build every node of `plan` with fresh calculators. Fails before any
    /// task runs if a calculator cannot be created or a required side
    /// packet is missing from `side_packets`.
    pub fn new(
        plan: Arc<ValidatedGraphConfig>,
        registry: &CalculatorRegistry,
        resources: Arc<dyn Resources>,
        executors: &HashMap<String, Arc<dyn Executor>>,
        side_packets: &HashMap<String, Packet>,
        settings: RunSettings,
    ) -> Result<Arc<Self>> {
        let side_slots = plan
            .side_packets
            .iter()
            .map(|side| {
                let supplied = match side.producer {
                    SidePacketProducer::Graph => side_packets
                        .get(&side.name)
                        .map(|p| p.clone().into_at(Timestamp::UNSET)),
                    SidePacketProducer::Node { .. } => None,
                };
                Mutex::new(supplied)
            })
            .collect::<Vec<_>>();

        Self::check_graph_side_packets(&plan, &side_slots)?;

        let streams = plan
            .streams
            .iter()
            .map(|stream| {
                let mirrors = stream
                    .consumers
                    .iter()
                    .map(|c| Mirror {
                        node: c.node,
                        port: c.port,
                    })
                    .collect();
                OutputStreamManager::new(stream.name.clone(), stream.packet_type, mirrors)
            })
            .collect();

        let default_executor = executors
            .get("")
            .cloned()
            .ok_or_else(|| Error::NotFound("default executor".to_string()))?;

        let mut nodes = Vec::with_capacity(plan.nodes.len());
        let mut node_executors = Vec::with_capacity(plan.nodes.len());
        for info in &plan.nodes {
            let calculator = registry
                .create(&info.calculator, &info.options)
                .with_context(|| format!("creating node \"{}\"", info.name))?;
            let input_streams = Self::input_streams(&plan, info, settings.max_queue_size);
            nodes.push(CalculatorNode::new(info, calculator, input_streams)?);

            let executor = match &info.executor {
                Some(name) => executors
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("executor \"{}\"", name)))?,
                None => default_executor.clone(),
            };
            node_executors.push(executor);
        }

        let mut caller_executors: Vec<Arc<dyn Executor>> = Vec::new();
        for executor in &node_executors {
            if executor.runs_on_caller() && !caller_executors.iter().any(|e| Arc::ptr_eq(e, executor)) {
                caller_executors.push(executor.clone());
            }
        }

        Ok(Arc::new(Self {
            plan,
            nodes,
            streams,
            side_packets: side_slots,
            executors: node_executors,
            caller_executors,
            resources,
            settings,
            state: Mutex::new(RunState::default()),
            cv: Condvar::new(),
        }))
    }

    /// Required side packets without a node producer must come from
    /// `start_run`; supplied ones must match every consumer's type.
    fn check_graph_side_packets(plan: &ValidatedGraphConfig, slots: &[Mutex<Option<Packet>>]) -> Result<()> {
        for side in &plan.side_packets {
            if side.producer != SidePacketProducer::Graph {
                continue;
            }
            let supplied = slots[side.id.index()]
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for &(node, port) in &side.consumers {
                let info = plan.node(node);
                let spec = info.contract.input_side_packets().by_id(port);
                match &supplied {
                    None if !spec.optional => {
                        return Err(Error::Config(format!(
                            "missing required side packet \"{}\" for node \"{}\"",
                            side.name, info.name
                        )));
                    }
                    None => {}
                    Some(packet) => spec.packet_type.validate(packet).map_err(|e| {
                        Error::Config(format!(
                            "side packet \"{}\" for node \"{}\": {}",
                            side.name, info.name, e
                        ))
                    })?,
                }
            }
        }
        Ok(())
    }

    /// Input queues of one node. Queues fed by graph inputs or source nodes
    /// get the configured limit.
    fn input_streams(
        plan: &ValidatedGraphConfig,
        info: &NodeInfo,
        max_queue_size: Option<usize>,
    ) -> TaggedCollection<InputStreamManager> {
        TaggedCollection::from_fn(info.input_tag_map().clone(), |port| {
            let stream = plan.stream(info.input_streams[port]);
            let mut manager = InputStreamManager::new(
                stream.name.clone(),
                *info.contract.inputs().by_id(port),
                info.back_edges[port],
            );
            let throttled_producer = match stream.producer {
                StreamProducer::GraphInput => true,
                StreamProducer::Node { node, .. } => plan.node(node).is_source(),
            };
            if throttled_producer {
                manager.set_max_queue_size(max_queue_size.filter(|&n| n > 0));
            }
            manager
        })
    }

    pub fn plan(&self) -> &Arc<ValidatedGraphConfig> {
        &self.plan
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn info(&self, id: NodeId) -> &NodeInfo {
        self.plan.node(id)
    }

    fn node(&self, id: NodeId) -> &CalculatorNode {
        &self.nodes[id.index()]
    }

    fn is_stopping(&self) -> bool {
        self.lock_state().stopping
    }

    /// Evaluate every node once; nodes with their side packets open.
    pub fn start(self: &Arc<Self>) {
        tracing::info!(
            "Starting run: {} nodes, {} graph inputs",
            self.nodes.len(),
            self.plan.graph_input_streams.len()
        );
        for id in &self.plan.topological_order {
            self.schedule_if_ready(*id);
        }
    }

    // ==================== Dispatch ====================

    fn schedule_if_ready(self: &Arc<Self>, id: NodeId) {
        if self.is_stopping() {
            return;
        }
        let node = self.node(id);
        let mut sched = node.sched();
        if sched.busy {
            return;
        }
        let task = match sched.lifecycle {
            Lifecycle::Closed => return,
            Lifecycle::NotOpened => {
                if !self.side_packets_ready(id) {
                    return;
                }
                NodeTask::Open
            }
            Lifecycle::Opened if node.is_source => {
                if self.throttle_source(id) {
                    return;
                }
                NodeTask::Process
            }
            Lifecycle::Opened => match node.inputs().get_node_readiness() {
                NodeReadiness::NotReady => return,
                NodeReadiness::ReadyForProcess(_) => NodeTask::Process,
                NodeReadiness::ReadyForClose => NodeTask::Close,
            },
        };
        sched.busy = true;
        drop(sched);
        self.dispatch(id, task);
    }

    fn dispatch(self: &Arc<Self>, id: NodeId, task: NodeTask) {
        self.lock_state().pending += 1;
        let executor = &self.executors[id.index()];
        let this = Arc::clone(self);
        executor.execute(Box::new(move || this.run_task(id, task)));
        if executor.runs_on_caller() {
            let _state = self.lock_state();
            self.cv.notify_all();
        }
    }

    fn run_task(self: &Arc<Self>, id: NodeId, task: NodeTask) {
        if !self.is_stopping() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match task {
                NodeTask::Open => self.open_node(id),
                NodeTask::Process => self.process_node(id),
                NodeTask::Close => {
                    let mut runtime = self.node(id).runtime();
                    self.close_node(id, &mut runtime)
                }
            }));
            let result = outcome.unwrap_or_else(|_| {
                Err(Error::calculator(self.info(id).name.clone(), "panicked"))
            });
            if let Err(err) = result {
                self.record_error(err.with_context(format!(
                    "node \"{}\" failed to {}",
                    self.info(id).name,
                    task.verb()
                )));
            }
        }
        self.node(id).sched().busy = false;
        self.schedule_if_ready(id);
        self.task_finished();
    }

    fn task_finished(self: &Arc<Self>) {
        let idle_with_throttled_sources = {
            let state = self.lock_state();
            state.pending == 1 && !state.stopping && !state.throttled_sources.is_empty()
        };
        // Nothing else is in flight, so throttled sources would wait forever.
        if idle_with_throttled_sources {
            self.resolve_deadlock();
        }
        let mut state = self.lock_state();
        state.pending -= 1;
        if state.pending == 0 {
            self.cv.notify_all();
        }
    }

    fn record_error(&self, err: Error) {
        let mut state = self.lock_state();
        if state.error.is_none() {
            tracing::error!("Run failed: {}", err);
            state.error = Some(err);
        } else {
            tracing::debug!("Further run error: {}", err);
        }
        state.stopping = true;
        self.cv.notify_all();
    }

    // ==================== Node lifecycle ====================

    fn side_packets_ready(&self, id: NodeId) -> bool {
        let info = self.info(id);
        let specs = info.contract.input_side_packets();
        info.input_side_packets.iter().enumerate().all(|(port, side)| {
            let present = self.side_packets[side.index()]
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some();
            present
                || (specs.by_id(port).optional
                    && self.plan.side_packets[side.index()].producer == SidePacketProducer::Graph)
        })
    }

    fn collect_side_packets(&self, info: &NodeInfo) -> Result<TaggedCollection<Packet>> {
        let specs = info.contract.input_side_packets();
        let packets = TaggedCollection::from_fn(specs.tag_map().clone(), |port| {
            self.side_packets[info.input_side_packets[port].index()]
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .unwrap_or_else(Packet::empty)
        });
        for (port, packet) in packets.iter().enumerate() {
            let spec = specs.by_id(port);
            if packet.is_empty() {
                if !spec.optional {
                    return Err(Error::Config(format!(
                        "input side packet {} is not available",
                        specs.tag_map().label(port)
                    )));
                }
            } else {
                spec.packet_type
                    .validate(packet)
                    .with_context(|| format!("input side packet {}", specs.tag_map().label(port)))?;
            }
        }
        Ok(packets)
    }

    fn deliver(self: &Arc<Self>, mirror: Mirror, packets: &[Packet], bound: Timestamp) -> Result<()> {
        let node = self.node(mirror.node);
        {
            let mut inputs = node.inputs();
            inputs
                .add_packets(mirror.port, packets)
                .with_context(|| format!("delivering to node \"{}\"", node.name))?;
            inputs.set_next_timestamp_bound(mirror.port, bound);
            if inputs.is_full(mirror.port) {
                self.lock_state().full.insert((mirror.node, mirror.port));
            }
        }
        self.schedule_if_ready(mirror.node);
        Ok(())
    }

    fn open_node(self: &Arc<Self>, id: NodeId) -> Result<()> {
        let node = self.node(id);
        let info = self.info(id);
        let mut runtime = node.runtime();
        runtime.input_side_packets = self.collect_side_packets(info)?;

        let inputs = TaggedCollection::from_fn(info.input_tag_map().clone(), |_| Packet::empty());
        let (result, mut shards) = runtime.invoke(
            &info.name,
            Phase::Open,
            Timestamp::UNSTARTED,
            &inputs,
            &self.streams,
            self.resources.as_ref(),
        );
        let stop = match result {
            Ok(()) => false,
            Err(err) if err.is_stop() => true,
            Err(err) => return Err(err),
        };
        runtime.outputs.propagate(&mut shards, Timestamp::UNSTARTED, &self.streams, |m, p, b| {
            self.deliver(m, p, b)
        })?;

        let side_consumers = self.publish_side_packets(info, &mut runtime)?;
        node.set_lifecycle(Lifecycle::Opened);
        tracing::debug!("Opened node {}", info.name);

        if stop {
            self.close_node(id, &mut runtime)?;
        }
        drop(runtime);
        for consumer in side_consumers {
            self.schedule_if_ready(consumer);
        }
        Ok(())
    }

    /// Store the output side packets set in `open`; returns the nodes
    /// waiting on them.
    fn publish_side_packets(&self, info: &NodeInfo, runtime: &mut NodeRuntime) -> Result<Vec<NodeId>> {
        let types = info.contract.output_side_packets();
        let mut consumers = Vec::new();
        for (port, side) in info.output_side_packets.iter().enumerate() {
            let label = types.tag_map().label(port);
            let packet = runtime
                .output_side_packets
                .by_id_mut(port)
                .take()
                .ok_or_else(|| Error::Config(format!("did not set output side packet {}", label)))?;
            types
                .by_id(port)
                .validate(&packet)
                .with_context(|| format!("output side packet {}", label))?;
            *self.side_packets[side.index()]
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(packet);
            consumers.extend(self.plan.side_packets[side.index()].consumers.iter().map(|c| c.0));
        }
        Ok(consumers)
    }

    fn process_node(self: &Arc<Self>, id: NodeId) -> Result<()> {
        let node = self.node(id);
        let info = self.info(id);
        let mut runtime = node.runtime();

        let (timestamp, inputs) = if node.is_source {
            let empty = TaggedCollection::from_fn(info.input_tag_map().clone(), |_| Packet::empty());
            (Timestamp::UNSTARTED, empty)
        } else {
            let mut handler = node.inputs();
            match handler.get_node_readiness() {
                NodeReadiness::NotReady => return Ok(()),
                NodeReadiness::ReadyForClose => {
                    drop(handler);
                    return self.close_node(id, &mut runtime);
                }
                NodeReadiness::ReadyForProcess(ts) => (ts, handler.fill_input_set(ts)?),
            }
        };

        tracing::trace!("Processing node {} at {}", info.name, timestamp);
        let (result, mut shards) = runtime.invoke(
            &info.name,
            Phase::Process,
            timestamp,
            &inputs,
            &self.streams,
            self.resources.as_ref(),
        );
        let stop = match result {
            Ok(()) => false,
            Err(err) if err.is_stop() => true,
            Err(err) => return Err(err),
        };
        runtime.outputs.propagate(&mut shards, timestamp, &self.streams, |m, p, b| {
            self.deliver(m, p, b)
        })?;

        if !node.is_source {
            self.finish_inputs(id, timestamp);
        }
        if stop {
            self.close_node(id, &mut runtime)?;
        }
        Ok(())
    }

    /// Release consumed inputs and unthrottle sources whose queues drained.
    fn finish_inputs(self: &Arc<Self>, id: NodeId, timestamp: Timestamp) {
        let drained = {
            let mut handler = self.node(id).inputs();
            handler.finish_propagation(timestamp);
            let mut state = self.lock_state();
            let before = state.full.len();
            state.full.retain(|&(node, port)| node != id || handler.is_full(port));
            before != state.full.len()
        };
        if drained {
            self.unthrottle();
        }
    }

    fn close_node(self: &Arc<Self>, id: NodeId, runtime: &mut NodeRuntime) -> Result<()> {
        let node = self.node(id);
        let info = self.info(id);
        node.inputs().close();

        let inputs = TaggedCollection::from_fn(info.input_tag_map().clone(), |_| {
            Packet::empty().into_at(Timestamp::DONE)
        });
        let (result, mut shards) = runtime.invoke(
            &info.name,
            Phase::Close,
            Timestamp::DONE,
            &inputs,
            &self.streams,
            self.resources.as_ref(),
        );
        let result = match result {
            Err(err) if err.is_stop() => Ok(()),
            other => other,
        };
        let result = result.and_then(|()| {
            runtime.outputs.propagate(&mut shards, Timestamp::DONE, &self.streams, |m, p, b| {
                self.deliver(m, p, b)
            })
        });
        let closed = runtime
            .outputs
            .close(&self.streams, |m, p, b| self.deliver(m, p, b));

        node.set_lifecycle(Lifecycle::Closed);
        tracing::debug!("Closed node {}", info.name);
        let released = {
            let mut state = self.lock_state();
            state.closed_nodes += 1;
            let before = state.full.len();
            state.full.retain(|&(node, _)| node != id);
            self.cv.notify_all();
            before != state.full.len()
        };
        if released {
            self.unthrottle();
        }
        result.and(closed)
    }

    // ==================== Throttling ====================

    fn source_blocked(&self, state: &RunState, source: SourceRef) -> bool {
        state
            .full
            .iter()
            .any(|(node, _)| self.info(*node).ancestor_sources.contains(&source))
    }

    /// Whether `source` must wait for a queue it feeds; records it if so.
    fn throttle_source(&self, source: NodeId) -> bool {
        let mut state = self.lock_state();
        if self.source_blocked(&state, SourceRef::Node(source)) {
            state.throttled_sources.insert(source);
            true
        } else {
            false
        }
    }

    /// Wake blocked adders and reschedule sources no longer throttled.
    fn unthrottle(self: &Arc<Self>) {
        let released: Vec<NodeId> = {
            let mut state = self.lock_state();
            self.cv.notify_all();
            let released: Vec<NodeId> = state
                .throttled_sources
                .iter()
                .copied()
                .filter(|s| !self.source_blocked(&state, SourceRef::Node(*s)))
                .collect();
            for source in &released {
                state.throttled_sources.remove(source);
            }
            released
        };
        for source in released {
            self.schedule_if_ready(source);
        }
    }

    /// The graph is idle while queues are full. Either fail the run or let
    /// every full queue grow by one.
    fn resolve_deadlock(self: &Arc<Self>) {
        let full: Vec<(NodeId, usize)> = {
            let state = self.lock_state();
            if state.stopping || state.full.is_empty() {
                return;
            }
            state.full.iter().copied().collect()
        };
        if self.settings.report_deadlock {
            let names: Vec<String> = full
                .iter()
                .map(|(node, port)| {
                    let info = self.info(*node);
                    format!("{}:{}", info.name, info.input_tag_map().label(*port))
                })
                .collect();
            self.record_error(Error::Deadlock(format!(
                "input queues full with no runnable node: {}",
                names.join(", ")
            )));
            return;
        }

        tracing::warn!("Throttling deadlock; growing {} full input queues", full.len());
        for (node, port) in full {
            let mut handler = self.node(node).inputs();
            if handler.is_full(port) {
                handler.grow_queue_limit(port);
            }
            if !handler.is_full(port) {
                self.lock_state().full.remove(&(node, port));
            }
        }
        self.unthrottle();
    }

    // ==================== Caller-facing operations ====================

    fn graph_input(&self, name: &str) -> Result<StreamId> {
        let stream = self
            .plan
            .stream_by_name(name)
            .ok_or_else(|| Error::NotFound(format!("graph input stream \"{}\"", name)))?;
        if stream.producer != StreamProducer::GraphInput {
            return Err(Error::NotFound(format!("graph input stream \"{}\"", name)));
        }
        Ok(stream.id)
    }

    fn drain_caller_executors(&self) -> bool {
        let mut ran = false;
        for executor in &self.caller_executors {
            ran |= executor.run_pending();
        }
        ran
    }

    fn caller_work_pending(&self) -> bool {
        self.caller_executors.iter().any(|e| e.has_pending())
    }

    /// Block until `done` holds, running caller-thread tasks meanwhile.
    fn wait_for(&self, done: impl Fn(&RunState) -> bool) {
        loop {
            self.drain_caller_executors();
            let state = self.lock_state();
            if done(&state) {
                return;
            }
            if self.caller_work_pending() {
                continue;
            }
            drop(self.cv.wait(state).unwrap_or_else(PoisonError::into_inner));
        }
    }

    fn run_error(&self) -> Option<Error> {
        self.lock_state().error.clone()
    }

    /// Wait until no consumer of `stream` has a full queue.
    fn wait_not_full(self: &Arc<Self>, stream: StreamId, name: &str, mode: GraphInputStreamAddMode) -> Result<()> {
        let mirrors = self.streams[stream.index()].mirrors();
        loop {
            let state = self.lock_state();
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if state.stopping {
                return Err(Error::InvalidState("graph run is stopping".to_string()));
            }
            if !mirrors.iter().any(|m| state.full.contains(&(m.node, m.port))) {
                return Ok(());
            }
            if mode == GraphInputStreamAddMode::AddIfNotFull {
                return Err(Error::Unavailable(format!(
                    "a queue fed by graph input stream \"{}\" is full",
                    name
                )));
            }
            drop(state);
            // Caller-thread tasks only run while the caller is blocked here.
            if self.drain_caller_executors() {
                continue;
            }
            let state = self.lock_state();
            if state.pending == 0 {
                drop(state);
                self.resolve_deadlock();
                continue;
            }
            drop(self.cv.wait(state).unwrap_or_else(PoisonError::into_inner));
        }
    }

    pub fn add_packet(self: &Arc<Self>, name: &str, packet: Packet, mode: GraphInputStreamAddMode) -> Result<()> {
        let stream = self.graph_input(name)?;
        if packet.is_empty() {
            return Err(Error::Contract(format!(
                "empty packet added to graph input stream \"{}\"",
                name
            )));
        }
        self.wait_not_full(stream, name, mode)?;

        let manager = &self.streams[stream.index()];
        let timestamp = packet.timestamp();
        let mut shard = manager.new_shard();
        shard.add(packet)?;
        manager.propagate(&mut shard, timestamp, None, |m, p, b| self.deliver(m, p, b))
    }

    pub fn set_input_stream_timestamp_bound(self: &Arc<Self>, name: &str, bound: Timestamp) -> Result<()> {
        let stream = self.graph_input(name)?;
        if let Some(err) = self.run_error() {
            return Err(err);
        }
        let manager = &self.streams[stream.index()];
        let mut shard = manager.new_shard();
        shard.set_next_timestamp_bound(bound);
        manager.propagate(&mut shard, Timestamp::UNSET, None, |m, p, b| self.deliver(m, p, b))
    }

    pub fn close_input_stream(self: &Arc<Self>, name: &str) -> Result<()> {
        let stream = self.graph_input(name)?;
        let manager = &self.streams[stream.index()];
        let mut shard = manager.new_shard();
        shard.close();
        tracing::debug!("Closing graph input stream {}", name);
        manager.propagate(&mut shard, Timestamp::DONE, None, |m, p, b| self.deliver(m, p, b))
    }

    pub fn close_all_input_streams(self: &Arc<Self>) -> Result<()> {
        let names: Vec<String> = self
            .plan
            .graph_input_streams
            .iter()
            .map(|id| self.plan.stream(*id).name.clone())
            .collect();
        for name in names {
            self.close_input_stream(&name)?;
        }
        Ok(())
    }

    pub fn wait_until_idle(&self) -> Result<()> {
        if self.plan.has_source_nodes() {
            return Err(Error::InvalidState(
                "wait_until_idle is not supported for graphs with source nodes".to_string(),
            ));
        }
        self.wait_for(|state| state.pending == 0);
        match self.run_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn wait_until_done(&self) -> Result<()> {
        let total = self.nodes.len();
        self.wait_for(|state| state.pending == 0 && (state.stopping || state.closed_nodes == total));
        self.finish();
        match self.run_error() {
            Some(err) => Err(err),
            None => {
                tracing::info!("Run finished");
                Ok(())
            }
        }
    }

    /// Stop dispatching, wait for in-flight tasks and tear down.
    pub fn abort(&self) {
        {
            let mut state = self.lock_state();
            if state.finished {
                return;
            }
            state.stopping = true;
            self.cv.notify_all();
        }
        self.wait_for(|state| state.pending == 0);
        self.finish();
    }

    pub fn is_finished(&self) -> bool {
        self.lock_state().finished
    }

    pub fn has_error(&self) -> bool {
        self.lock_state().error.is_some()
    }

    /// Close calculators a failed run left open, then drop every
    /// calculator so resources they hold (poller channels included) are
    /// released.
    fn finish(&self) {
        {
            let mut state = self.lock_state();
            if state.finished {
                return;
            }
            state.finished = true;
        }
        for node in &self.nodes {
            let info = self.info(node.id);
            let mut runtime = node.runtime();
            if node.lifecycle() == Lifecycle::Opened {
                let inputs = TaggedCollection::from_fn(info.input_tag_map().clone(), |_| {
                    Packet::empty().into_at(Timestamp::DONE)
                });
                let (result, _) = runtime.invoke(
                    &info.name,
                    Phase::Close,
                    Timestamp::DONE,
                    &inputs,
                    &self.streams,
                    self.resources.as_ref(),
                );
                match result {
                    Err(err) if !err.is_stop() => {
                        tracing::warn!("Closing node {} after failure: {}", info.name, err);
                    }
                    _ => {}
                }
                node.set_lifecycle(Lifecycle::Closed);
            }
            runtime.calculator = None;
        }
    }

    /// Side packet by name: node output side packets first, then the
    /// packets supplied to the run.
    pub fn side_packet(&self, name: &str) -> Option<Packet> {
        let id = self.plan.side_packet_index.get(name)?;
        self.side_packets[id.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
