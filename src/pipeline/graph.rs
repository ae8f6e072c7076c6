//! Caller-facing run control.
//!
//! ```ignore
//! let mut graph = CalculatorGraph::new(Arc::new(CalculatorRegistry::with_builtins()));
//! graph.initialize(config)?;
//! let poller = graph.add_output_stream_poller("out")?;
//! graph.start_run(HashMap::new())?;
//! graph.add_packet_to_input_stream("in", Packet::new(1i32).into_at(Timestamp::new(0)))?;
//! graph.close_all_input_streams()?;
//! graph.wait_until_done()?;
//! ```
//!
//! A graph is initialized once and may run many times. Every run gets
//! fresh calculator instances; observers, pollers and executors belong to
//! the graph and outlive its runs.

use crate::config::{ExecutorConfig, ExecutorKind, GraphConfig};
use crate::error::{Error, Result};
use crate::pipeline::compiled_plan::ValidatedGraphConfig;
use crate::pipeline::compiler::GraphCompiler;
use crate::pipeline::executor::{self, Executor};
use crate::pipeline::observer::{self, OutputObserver, OutputStreamPoller};
use crate::pipeline::packet::Packet;
use crate::pipeline::registry::CalculatorRegistry;
use crate::pipeline::resources::{FileResources, Resources};
use crate::pipeline::scheduler::{GraphInputStreamAddMode, RunSettings, Scheduler};
use crate::pipeline::timestamp::Timestamp;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CalculatorGraph {
    registry: Arc<CalculatorRegistry>,
    resources: Arc<dyn Resources>,
    plan: Option<Arc<ValidatedGraphConfig>>,
    observers: Mutex<Vec<OutputObserver>>,
    executors: Mutex<HashMap<String, Arc<dyn Executor>>>,
    run: Mutex<Option<Arc<Scheduler>>>,
    /// Side packets of the latest `start_run`, reused by `restart`.
    run_side_packets: Mutex<HashMap<String, Packet>>,
    add_mode: Mutex<GraphInputStreamAddMode>,
}

impl CalculatorGraph {
    pub fn new(registry: Arc<CalculatorRegistry>) -> Self {
        Self {
            registry,
            resources: Arc::new(FileResources::default()),
            plan: None,
            observers: Mutex::new(Vec::new()),
            executors: Mutex::new(HashMap::new()),
            run: Mutex::new(None),
            run_side_packets: Mutex::new(HashMap::new()),
            add_mode: Mutex::new(GraphInputStreamAddMode::default()),
        }
    }

    /// Build and initialize in one step.
    pub fn from_config(registry: Arc<CalculatorRegistry>, config: GraphConfig) -> Result<Self> {
        let mut graph = Self::new(registry);
        graph.initialize(config)?;
        Ok(graph)
    }

    /// Resource service handed to every calculator context.
    pub fn with_resources(mut self, resources: Arc<dyn Resources>) -> Self {
        self.resources = resources;
        self
    }

    /// Validate `config`. Nothing runs until [`CalculatorGraph::start_run`].
    pub fn initialize(&mut self, config: GraphConfig) -> Result<()> {
        if self.plan.is_some() {
            return Err(Error::InvalidState("graph is already initialized".to_string()));
        }
        let plan = GraphCompiler::compile(&config, &self.registry)?;
        tracing::info!(
            "Graph initialized: {} nodes ({} sources, {} sinks)",
            plan.stats.total_nodes,
            plan.stats.source_nodes,
            plan.stats.sink_nodes
        );
        self.plan = Some(Arc::new(plan));
        Ok(())
    }

    pub fn validated_config(&self) -> Option<&Arc<ValidatedGraphConfig>> {
        self.plan.as_ref()
    }

    fn plan(&self) -> Result<&Arc<ValidatedGraphConfig>> {
        self.plan
            .as_ref()
            .ok_or_else(|| Error::InvalidState("graph is not initialized".to_string()))
    }

    fn current_run(&self) -> Result<Arc<Scheduler>> {
        lock(&self.run)
            .clone()
            .ok_or_else(|| Error::InvalidState("no run has been started".to_string()))
    }

    fn is_running(&self) -> bool {
        lock(&self.run).as_ref().is_some_and(|run| !run.is_finished())
    }

    fn check_can_register(&self, stream: &str) -> Result<()> {
        if self.plan()?.stream_by_name(stream).is_none() {
            return Err(Error::NotFound(format!("stream \"{}\"", stream)));
        }
        if self.is_running() {
            return Err(Error::InvalidState(
                "observers must be registered before start_run".to_string(),
            ));
        }
        Ok(())
    }

    /// Call `callback` with every packet of `stream`, in timestamp order.
    pub fn observe_output_stream<F>(&self, stream: &str, callback: F) -> Result<()>
    where
        F: FnMut(&Packet) -> Result<()> + Send + 'static,
    {
        self.observe_output_stream_with_bounds(stream, false, callback)
    }

    /// Like [`CalculatorGraph::observe_output_stream`]; with
    /// `observe_bounds` the callback also sees empty packets for
    /// timestamps settled without data.
    pub fn observe_output_stream_with_bounds<F>(
        &self,
        stream: &str,
        observe_bounds: bool,
        callback: F,
    ) -> Result<()>
    where
        F: FnMut(&Packet) -> Result<()> + Send + 'static,
    {
        self.check_can_register(stream)?;
        lock(&self.observers).push(OutputObserver::callback(stream, observe_bounds, Box::new(callback)));
        Ok(())
    }

    /// Poller over `stream` for the next run.
    pub fn add_output_stream_poller(&self, stream: &str) -> Result<OutputStreamPoller> {
        self.check_can_register(stream)?;
        let (observer, poller) = OutputObserver::poller(stream);
        lock(&self.observers).push(observer);
        Ok(poller)
    }

    /// Use `executor` for nodes assigned to `name`; `""` replaces the
    /// default executor.
    pub fn set_executor(&self, name: &str, executor: Arc<dyn Executor>) -> Result<()> {
        if self.is_running() {
            return Err(Error::InvalidState(
                "executors cannot change during a run".to_string(),
            ));
        }
        lock(&self.executors).insert(name.to_string(), executor);
        Ok(())
    }

    pub fn set_graph_input_stream_add_mode(&self, mode: GraphInputStreamAddMode) {
        *lock(&self.add_mode) = mode;
    }

    /// Create missing executors from the config; existing ones are kept
    /// across runs.
    fn ensure_executors(&self, config: &GraphConfig) -> Result<HashMap<String, Arc<dyn Executor>>> {
        let mut executors = lock(&self.executors);
        for entry in &config.executors {
            if !executors.contains_key(&entry.name) {
                executors.insert(entry.name.clone(), executor::from_config(entry)?);
            }
        }
        if !executors.contains_key("") {
            let kind = match config.num_threads {
                Some(0) => ExecutorKind::ApplicationThread,
                _ => ExecutorKind::ThreadPool,
            };
            let default = executor::from_config(&ExecutorConfig {
                name: String::new(),
                kind,
                num_threads: config.num_threads,
            })?;
            executors.insert(String::new(), default);
        }
        Ok(executors.clone())
    }

    /// Start a run with `side_packets`. Fails if a run is active or a
    /// required side packet is missing.
    pub fn start_run(&self, side_packets: HashMap<String, Packet>) -> Result<()> {
        let plan = self.plan()?.clone();
        let mut run = lock(&self.run);
        if run.as_ref().is_some_and(|r| !r.is_finished()) {
            return Err(Error::InvalidState(
                "a run is active; wait_until_done must return first".to_string(),
            ));
        }

        let (run_plan, registry) = {
            let observers = lock(&self.observers);
            if observers.is_empty() {
                (plan.clone(), self.registry.clone())
            } else {
                let (config, registry) = observer::attach_observers(&plan.config, &self.registry, &observers)?;
                let run_plan = GraphCompiler::compile(&config, &registry)?;
                (Arc::new(run_plan), Arc::new(registry))
            }
        };

        let executors = self.ensure_executors(&plan.config)?;
        let settings = RunSettings {
            max_queue_size: plan.config.max_queue_size,
            report_deadlock: plan.config.report_deadlock,
        };
        let scheduler = Scheduler::new(
            run_plan,
            &registry,
            self.resources.clone(),
            &executors,
            &side_packets,
            settings,
        )?;

        *lock(&self.run_side_packets) = side_packets;
        *run = Some(scheduler.clone());
        drop(run);
        scheduler.start();
        Ok(())
    }

    /// Start a new run with the side packets of the previous one.
    pub fn restart(&self) -> Result<()> {
        let side_packets = lock(&self.run_side_packets).clone();
        self.start_run(side_packets)
    }

    /// Start a run, close every graph input and wait for it to finish.
    pub fn run(&self, side_packets: HashMap<String, Packet>) -> Result<()> {
        self.start_run(side_packets)?;
        self.close_all_input_streams()?;
        self.wait_until_done()
    }

    /// Feed `packet` to graph input stream `stream`. Blocks while a
    /// consumer queue is full unless the add mode says otherwise.
    pub fn add_packet_to_input_stream(&self, stream: &str, packet: Packet) -> Result<()> {
        let mode = *lock(&self.add_mode);
        self.current_run()?.add_packet(stream, packet, mode)
    }

    /// Promise that `stream` carries nothing below `bound`.
    pub fn set_input_stream_timestamp_bound(&self, stream: &str, bound: Timestamp) -> Result<()> {
        self.current_run()?.set_input_stream_timestamp_bound(stream, bound)
    }

    pub fn close_input_stream(&self, stream: &str) -> Result<()> {
        self.current_run()?.close_input_stream(stream)
    }

    pub fn close_all_input_streams(&self) -> Result<()> {
        self.current_run()?.close_all_input_streams()
    }

    /// Block until no task is queued or running. Not available for graphs
    /// with source nodes.
    pub fn wait_until_idle(&self) -> Result<()> {
        self.current_run()?.wait_until_idle()
    }

    /// Block until every node has closed or the run failed; returns the
    /// first error.
    pub fn wait_until_done(&self) -> Result<()> {
        self.current_run()?.wait_until_done()
    }

    /// Side packet produced by a node in the current or last run, or one
    /// supplied to `start_run`.
    pub fn get_output_side_packet(&self, name: &str) -> Result<Packet> {
        let run = self.current_run()?;
        run.side_packet(name)
            .or_else(|| lock(&self.run_side_packets).get(name).cloned())
            .ok_or_else(|| Error::NotFound(format!("side packet \"{}\"", name)))
    }

    pub fn has_error(&self) -> bool {
        lock(&self.run).as_ref().is_some_and(|run| run.has_error())
    }
}

impl Drop for CalculatorGraph {
    fn drop(&mut self) {
        let run = self
            .run
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(run) = run {
            if !run.is_finished() {
                tracing::warn!("Graph dropped during a run; stopping it");
                run.abort();
            }
        }
    }
}

impl std::fmt::Debug for CalculatorGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalculatorGraph")
            .field("initialized", &self.plan.is_some())
            .field("running", &self.is_running())
            .field("observers", &lock(&self.observers).len())
            .finish()
    }
}
