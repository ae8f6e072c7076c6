//! Per-run node wrapper.
//!
//! A [`CalculatorNode`] pairs one calculator instance with its input queues
//! and output handler for the duration of a run. State is split over three
//! locks so unrelated nodes never contend and deliveries into a node do not
//! wait for its calculator:
//!
//! - `sched`: lifecycle and the busy flag (at most one task in flight).
//! - `inputs`: the input stream handler, touched by every upstream delivery.
//! - `runtime`: calculator, side packets and outputs, held while a task runs.
//!
//! Lock order is `runtime` → `sched` → `inputs`; the scheduler's run state
//! is always taken last.

use crate::config::NodeOptions;
use crate::error::{Error, Result};
use crate::pipeline::calculator::{Calculator, CalculatorContext, Phase};
use crate::pipeline::compiled_plan::NodeInfo;
use crate::pipeline::id::NodeId;
use crate::pipeline::input_handler::InputStreamHandler;
use crate::pipeline::input_stream::InputStreamManager;
use crate::pipeline::output_handler::OutputStreamHandler;
use crate::pipeline::output_stream::{OutputShard, OutputStreamManager};
use crate::pipeline::packet::Packet;
use crate::pipeline::port::TaggedCollection;
use crate::pipeline::resources::Resources;
use crate::pipeline::timestamp::Timestamp;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where a node is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotOpened,
    Opened,
    Closed,
}

/// What a dispatched task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeTask {
    Open,
    Process,
    Close,
}

impl NodeTask {
    pub(crate) fn verb(self) -> &'static str {
        match self {
            NodeTask::Open => "open",
            NodeTask::Process => "process",
            NodeTask::Close => "close",
        }
    }
}

#[derive(Debug)]
pub(crate) struct SchedState {
    pub lifecycle: Lifecycle,
    /// A task for this node is queued or running.
    pub busy: bool,
}

/// Calculator-side state, only touched by the node's own task.
pub(crate) struct NodeRuntime {
    /// Taken when the run is torn down.
    pub calculator: Option<Box<dyn Calculator>>,
    pub options: NodeOptions,
    pub input_side_packets: TaggedCollection<Packet>,
    pub output_side_packets: TaggedCollection<Option<Packet>>,
    pub outputs: OutputStreamHandler,
}

impl NodeRuntime {
    /// Run one lifecycle call and hand back what it wrote.
    pub fn invoke(
        &mut self,
        node_name: &str,
        phase: Phase,
        input_timestamp: Timestamp,
        inputs: &TaggedCollection<Packet>,
        managers: &[OutputStreamManager],
        resources: &dyn Resources,
    ) -> (Result<()>, TaggedCollection<OutputShard>) {
        let mut shards = self.outputs.prepare_shards(managers);
        let Some(calculator) = self.calculator.as_mut() else {
            return (Ok(()), shards);
        };
        let mut offset = self.outputs.offset();
        let result = {
            let mut cc = CalculatorContext::new(
                node_name,
                phase,
                input_timestamp,
                inputs,
                &mut shards,
                &self.input_side_packets,
                &mut self.output_side_packets,
                &self.options,
                resources,
                &mut offset,
            );
            match phase {
                Phase::Open => calculator.open(&mut cc),
                Phase::Process => calculator.process(&mut cc),
                Phase::Close => calculator.close(&mut cc),
            }
        };
        self.outputs.set_offset(offset);
        (result, shards)
    }
}

pub(crate) struct CalculatorNode {
    pub id: NodeId,
    pub name: String,
    pub is_source: bool,
    sched: Mutex<SchedState>,
    inputs: Mutex<InputStreamHandler>,
    runtime: Mutex<NodeRuntime>,
}

impl CalculatorNode {
    /// Wrap a fresh calculator for `info`. `input_streams` are the node's
    /// queues, already sized and limited by the caller.
    pub fn new(
        info: &NodeInfo,
        calculator: Box<dyn Calculator>,
        input_streams: TaggedCollection<InputStreamManager>,
    ) -> Result<Self> {
        let handler = InputStreamHandler::new(
            input_streams,
            &info.handler,
            info.contract.process_timestamp_bounds(),
        )
        .map_err(|e| Error::Config(format!("node \"{}\": {}", info.name, e)))?;

        let input_side_map = info.contract.input_side_packets().tag_map().clone();
        let output_side_map = info.contract.output_side_packets().tag_map().clone();
        let runtime = NodeRuntime {
            calculator: Some(calculator),
            options: info.options.clone(),
            input_side_packets: TaggedCollection::from_fn(input_side_map, |_| Packet::empty()),
            output_side_packets: TaggedCollection::from_fn(output_side_map, |_| None),
            outputs: OutputStreamHandler::new(info.output_tag_map().clone(), info.output_streams.clone()),
        };

        Ok(Self {
            id: info.id,
            name: info.name.clone(),
            is_source: info.is_source(),
            sched: Mutex::new(SchedState {
                lifecycle: Lifecycle::NotOpened,
                busy: false,
            }),
            inputs: Mutex::new(handler),
            runtime: Mutex::new(runtime),
        })
    }

    pub fn sched(&self) -> MutexGuard<'_, SchedState> {
        self.sched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn inputs(&self) -> MutexGuard<'_, InputStreamHandler> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn runtime(&self) -> MutexGuard<'_, NodeRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.sched().lifecycle
    }

    pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.sched().lifecycle = lifecycle;
    }
}
