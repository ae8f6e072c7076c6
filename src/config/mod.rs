//! Graph configuration for calcgraph
//!
//! A graph is described by a [`GraphConfig`]: graph-level input/output
//! streams and side packets, executor and queue settings, and a list of
//! [`NodeConfig`] entries. Configs are usually authored in TOML:
//!
//! ```toml
//! input_stream = ["in", "select"]
//! output_stream = ["out"]
//! max_queue_size = 16
//!
//! [[node]]
//! calculator = "MuxCalculator"
//! input_stream = ["INPUT:0:in", "INPUT:1:other", "SELECT:select"]
//! output_stream = ["OUTPUT:out"]
//! ```
//!
//! JSON with the same field names is accepted too. Stream references use
//! the `TAG:index:name` form described in [`crate::pipeline::port`].

pub mod options;
pub mod subgraph;

pub use options::NodeOptions;
pub use subgraph::expand_subgraphs;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the handler used when neither the node, the calculator contract
/// nor the graph picks one.
pub const DEFAULT_INPUT_STREAM_HANDLER: &str = "DefaultInputStreamHandler";

// ==================== Executors ====================

/// Kind of executor backing a named executor entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Worker threads fed from a shared queue.
    #[default]
    ThreadPool,
    /// Tasks run on the thread that calls into the graph.
    ApplicationThread,
}

/// A named executor nodes can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Executor name; an empty name replaces the graph default executor.
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: ExecutorKind,

    /// Worker count for thread pools (defaults to available parallelism).
    #[serde(default)]
    pub num_threads: Option<usize>,
}

// ==================== Node ====================

/// Per-input-stream flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputStreamInfo {
    /// `TAG:index` of the input stream this entry describes.
    pub tag_index: String,

    /// The stream closes a cycle; it is ignored when ordering nodes.
    #[serde(default)]
    pub back_edge: bool,
}

/// Input stream handler selection with its own options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputStreamHandlerConfig {
    pub handler: String,

    #[serde(default)]
    pub options: toml::Table,
}

impl InputStreamHandlerConfig {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            options: toml::Table::new(),
        }
    }
}

/// One calculator (or subgraph) instance in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Registered calculator or subgraph name.
    pub calculator: String,

    /// Display name; defaults to the calculator name.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub input_stream: Vec<String>,

    #[serde(default)]
    pub output_stream: Vec<String>,

    #[serde(default)]
    pub input_side_packet: Vec<String>,

    #[serde(default)]
    pub output_side_packet: Vec<String>,

    #[serde(default)]
    pub input_stream_info: Vec<InputStreamInfo>,

    #[serde(default)]
    pub input_stream_handler: Option<InputStreamHandlerConfig>,

    /// Named executor to run this node on.
    #[serde(default)]
    pub executor: Option<String>,

    /// Calculator-specific options.
    #[serde(default)]
    pub options: toml::Table,
}

impl NodeConfig {
    pub fn new(calculator: impl Into<String>) -> Self {
        Self {
            calculator: calculator.into(),
            name: None,
            input_stream: Vec::new(),
            output_stream: Vec::new(),
            input_side_packet: Vec::new(),
            output_side_packet: Vec::new(),
            input_stream_info: Vec::new(),
            input_stream_handler: None,
            executor: None,
            options: toml::Table::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn input(mut self, spec: impl Into<String>) -> Self {
        self.input_stream.push(spec.into());
        self
    }

    pub fn output(mut self, spec: impl Into<String>) -> Self {
        self.output_stream.push(spec.into());
        self
    }

    pub fn input_side(mut self, spec: impl Into<String>) -> Self {
        self.input_side_packet.push(spec.into());
        self
    }

    pub fn output_side(mut self, spec: impl Into<String>) -> Self {
        self.output_side_packet.push(spec.into());
        self
    }

    /// Mark the input stream at `tag_index` as a back edge.
    pub fn back_edge(mut self, tag_index: impl Into<String>) -> Self {
        self.input_stream_info.push(InputStreamInfo {
            tag_index: tag_index.into(),
            back_edge: true,
        });
        self
    }

    pub fn handler(mut self, handler: InputStreamHandlerConfig) -> Self {
        self.input_stream_handler = Some(handler);
        self
    }

    pub fn on_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = Some(executor.into());
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Name used in logs and errors.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.calculator)
    }
}

// ==================== Graph ====================

/// Complete description of a calculator graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GraphConfig {
    #[serde(default)]
    pub input_stream: Vec<String>,

    #[serde(default)]
    pub output_stream: Vec<String>,

    #[serde(default)]
    pub input_side_packet: Vec<String>,

    #[serde(default)]
    pub output_side_packet: Vec<String>,

    /// Worker count of the default executor; `0` runs on the calling thread.
    #[serde(default)]
    pub num_threads: Option<usize>,

    /// Queue limit for nodes fed by graph inputs and source nodes.
    #[serde(default)]
    pub max_queue_size: Option<usize>,

    /// Fail the run instead of growing queues when throttling deadlocks.
    #[serde(default)]
    pub report_deadlock: bool,

    /// Handler for nodes that do not pick one.
    #[serde(default)]
    pub input_stream_handler: Option<InputStreamHandlerConfig>,

    #[serde(rename = "executor", default)]
    pub executors: Vec<ExecutorConfig>,

    #[serde(rename = "node", default)]
    pub nodes: Vec<NodeConfig>,
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML graph description.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse graph: {}", e)))
    }

    /// Parse a JSON graph description.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse graph: {}", e)))
    }

    /// Load a graph file; `.json` files are parsed as JSON, everything else
    /// as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read graph file {:?}: {}", path, e))
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Save the graph as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Config(format!("Failed to create graph directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize graph: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!("Failed to write graph file {:?}: {}", path, e))
        })
    }

    pub fn input(mut self, spec: impl Into<String>) -> Self {
        self.input_stream.push(spec.into());
        self
    }

    pub fn output(mut self, spec: impl Into<String>) -> Self {
        self.output_stream.push(spec.into());
        self
    }

    pub fn input_side(mut self, spec: impl Into<String>) -> Self {
        self.input_side_packet.push(spec.into());
        self
    }

    pub fn output_side(mut self, spec: impl Into<String>) -> Self {
        self.output_side_packet.push(spec.into());
        self
    }

    pub fn node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = Some(max_queue_size);
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executors.push(executor);
        self
    }
}
