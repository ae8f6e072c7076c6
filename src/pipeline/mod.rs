//! Calculator graph runtime.
//!
//! Data flows as timestamped [`Packet`]s along named streams between
//! calculator nodes. The graph is validated once into a
//! [`ValidatedGraphConfig`]; each run then builds fresh nodes and a
//! `Scheduler` that dispatches node invocations to executors
//! as soon as input stream handlers report them ready.
//!
//! # Architecture
//!
//! ```text
//! GraphConfig ──► GraphCompiler ──► ValidatedGraphConfig
//!                                         │
//! CalculatorGraph::start_run ──► Scheduler (one per run)
//!                                   │  readiness from InputStreamHandler
//!                                   ▼
//!                               Executor ──► CalculatorNode::invoke
//!                                   │
//!                   OutputStreamManager::propagate ──► consumer queues
//! ```
//!
//! # Design
//!
//! - **Timestamps order everything**: a node runs at timestamp `t` only once
//!   every input is settled at `t`; no global schedule exists.
//! - **At most one task per node**: a busy flag serializes `open`,
//!   `process` and `close` of each calculator.
//! - **Locks per node**: deliveries into a node do not wait for its
//!   calculator, and unrelated nodes never contend.
//! - **Packets are shared**: cloning a [`Packet`] bumps a refcount.

pub mod calculator;
pub mod compiled_plan;
pub mod compiler;
pub mod executor;
pub mod graph;
pub mod id;
pub mod input_handler;
pub mod input_stream;
pub(crate) mod node;
pub mod nodes;
pub mod observer;
pub mod output_handler;
pub mod output_stream;
pub mod packet;
pub mod port;
pub mod registry;
pub mod resources;
pub(crate) mod scheduler;
pub mod timestamp;

pub use calculator::{Calculator, CalculatorContext, CalculatorContract, CalculatorType, Phase};
pub use compiled_plan::{NodeInfo, PlanStats, ValidatedGraphConfig};
pub use compiler::GraphCompiler;
pub use executor::{ApplicationThreadExecutor, Executor, ThreadPoolExecutor};
pub use graph::CalculatorGraph;
pub use id::{NodeId, SidePacketId, StreamId};
pub use input_handler::{HandlerSpec, NodeReadiness};
pub use node::Lifecycle;
pub use observer::OutputStreamPoller;
pub use output_stream::OutputShard;
pub use packet::{Packet, PacketType};
pub use port::{TagMap, TaggedCollection};
pub use registry::CalculatorRegistry;
pub use resources::{FileResources, Resources};
pub use scheduler::GraphInputStreamAddMode;
pub use timestamp::{Timestamp, TimestampDiff};
