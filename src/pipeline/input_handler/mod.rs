//! Input stream handlers: per-node readiness policies.
//!
//! A handler owns the input queues of one node and answers a single
//! question for the scheduler: can the node run now, and at which
//! timestamp? The policy is chosen once per node when the graph is
//! validated ([`HandlerSpec`]) and never changes during a run.
//!
//! | Handler                        | Ready when                                      |
//! |--------------------------------|-------------------------------------------------|
//! | `DefaultInputStreamHandler`    | every stream settled at the earliest timestamp  |
//! | `RoundRobinInputStreamHandler` | any stream has a packet, earliest one first     |
//! | `ImmediateInputStreamHandler`  | any stream has a packet                         |
//! | `SyncSetInputStreamHandler`    | any configured group of streams is settled      |
//! | `FixedSizeInputStreamHandler`  | as default, with queues trimmed to a fixed size |
//! | `MuxInputStreamHandler`        | the stream picked by `SELECT` is settled        |

mod mux;
mod round_robin;
mod sync_set;

use crate::config::InputStreamHandlerConfig;
use crate::error::{Error, Result};
use crate::pipeline::input_stream::InputStreamManager;
use crate::pipeline::packet::Packet;
use crate::pipeline::port::{parse_tag_index, TagMap, TaggedCollection};
use crate::pipeline::timestamp::Timestamp;
use mux::MuxPolicy;
use round_robin::RoundRobinPolicy;
use serde::Deserialize;
use std::collections::BTreeSet;
use sync_set::{earliest_ready, SyncSet};

/// Scheduler-facing readiness of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeReadiness {
    NotReady,
    ReadyForProcess(Timestamp),
    ReadyForClose,
}

/// Resolved handler policy of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerSpec {
    Default,
    RoundRobin,
    Immediate,
    /// Port ids per sync set; together they cover every input port.
    SyncSet(Vec<Vec<usize>>),
    FixedSize {
        trigger_queue_size: usize,
        target_queue_size: usize,
    },
    Mux,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SyncSetOptions {
    #[serde(default)]
    sync_set: Vec<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FixedSizeOptions {
    #[serde(default = "default_trigger_queue_size")]
    trigger_queue_size: usize,
    #[serde(default = "default_target_queue_size")]
    target_queue_size: usize,
}

fn default_trigger_queue_size() -> usize {
    2
}

fn default_target_queue_size() -> usize {
    1
}

fn parse_options<T: for<'de> Deserialize<'de>>(config: &InputStreamHandlerConfig) -> Result<T> {
    toml::Value::Table(config.options.clone())
        .try_into::<T>()
        .map_err(|e| Error::Config(format!("{} options: {}", config.handler, e)))
}

impl HandlerSpec {
    /// Resolve a configured handler against a node's input tag map.
    pub fn resolve(config: &InputStreamHandlerConfig, inputs: &TagMap) -> Result<HandlerSpec> {
        let spec = match config.handler.as_str() {
            "DefaultInputStreamHandler" => HandlerSpec::Default,
            "RoundRobinInputStreamHandler" => HandlerSpec::RoundRobin,
            "ImmediateInputStreamHandler" => HandlerSpec::Immediate,
            "SyncSetInputStreamHandler" => {
                let options: SyncSetOptions = parse_options(config)?;
                HandlerSpec::SyncSet(Self::sync_sets(&options.sync_set, inputs)?)
            }
            "FixedSizeInputStreamHandler" => {
                let options: FixedSizeOptions = parse_options(config)?;
                if options.target_queue_size == 0
                    || options.target_queue_size > options.trigger_queue_size
                {
                    return Err(Error::Config(format!(
                        "target_queue_size {} must be in 1..={}",
                        options.target_queue_size, options.trigger_queue_size
                    )));
                }
                HandlerSpec::FixedSize {
                    trigger_queue_size: options.trigger_queue_size,
                    target_queue_size: options.target_queue_size,
                }
            }
            "MuxInputStreamHandler" => {
                if inputs.num_entries_for("SELECT") != 1 || !inputs.has_tag("INPUT") {
                    return Err(Error::Config(
                        "MuxInputStreamHandler needs one SELECT stream and INPUT streams"
                            .to_string(),
                    ));
                }
                HandlerSpec::Mux
            }
            other => {
                return Err(Error::NotFound(format!("input stream handler \"{}\"", other)));
            }
        };
        Ok(spec)
    }

    fn sync_sets(groups: &[Vec<String>], inputs: &TagMap) -> Result<Vec<Vec<usize>>> {
        let mut claimed = BTreeSet::new();
        let mut sets = Vec::new();
        for group in groups {
            let mut set = Vec::new();
            for tag_index in group {
                let (tag, index) = parse_tag_index(tag_index)?;
                let id = inputs.get_id(&tag, index).ok_or_else(|| {
                    Error::Config(format!("sync set names unknown input \"{}\"", tag_index))
                })?;
                if !claimed.insert(id) {
                    return Err(Error::Config(format!(
                        "input \"{}\" appears in more than one sync set",
                        tag_index
                    )));
                }
                set.push(id);
            }
            if !set.is_empty() {
                sets.push(set);
            }
        }
        let rest: Vec<usize> = (0..inputs.num_entries())
            .filter(|id| !claimed.contains(id))
            .collect();
        if !rest.is_empty() {
            sets.push(rest);
        }
        Ok(sets)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HandlerSpec::Default => "DefaultInputStreamHandler",
            HandlerSpec::RoundRobin => "RoundRobinInputStreamHandler",
            HandlerSpec::Immediate => "ImmediateInputStreamHandler",
            HandlerSpec::SyncSet(_) => "SyncSetInputStreamHandler",
            HandlerSpec::FixedSize { .. } => "FixedSizeInputStreamHandler",
            HandlerSpec::Mux => "MuxInputStreamHandler",
        }
    }
}

enum Policy {
    Synced {
        sets: Vec<SyncSet>,
        /// `(trigger, target)` for fixed-size queues.
        trim: Option<(usize, usize)>,
    },
    Mux(MuxPolicy),
    RoundRobin(RoundRobinPolicy),
}

/// The input side of one node: its queues plus the readiness policy.
pub struct InputStreamHandler {
    streams: TaggedCollection<InputStreamManager>,
    policy: Policy,
    process_timestamp_bounds: bool,
    /// Sync set chosen by the last readiness check.
    selected_set: Option<usize>,
}

impl InputStreamHandler {
    pub fn new(
        streams: TaggedCollection<InputStreamManager>,
        spec: &HandlerSpec,
        process_timestamp_bounds: bool,
    ) -> Result<Self> {
        let all_ports: Vec<usize> = (0..streams.len()).collect();
        let policy = match spec {
            HandlerSpec::Default => Policy::Synced {
                sets: vec![SyncSet::new(all_ports)],
                trim: None,
            },
            HandlerSpec::Immediate => Policy::Synced {
                sets: all_ports.into_iter().map(|p| SyncSet::new(vec![p])).collect(),
                trim: None,
            },
            HandlerSpec::SyncSet(groups) => Policy::Synced {
                sets: groups.iter().cloned().map(SyncSet::new).collect(),
                trim: None,
            },
            HandlerSpec::FixedSize {
                trigger_queue_size,
                target_queue_size,
            } => Policy::Synced {
                sets: vec![SyncSet::new(all_ports)],
                trim: Some((*trigger_queue_size, *target_queue_size)),
            },
            HandlerSpec::RoundRobin => Policy::RoundRobin(RoundRobinPolicy::new()),
            HandlerSpec::Mux => {
                let map = streams.tag_map();
                let control = map.get_id("SELECT", 0).ok_or_else(|| {
                    Error::Config("mux handler without a SELECT stream".to_string())
                })?;
                Policy::Mux(MuxPolicy::new(control, map.id_range("INPUT")))
            }
        };
        Ok(Self {
            streams,
            policy,
            process_timestamp_bounds,
            selected_set: None,
        })
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn stream(&self, port: usize) -> &InputStreamManager {
        self.streams.by_id(port)
    }

    pub fn stream_mut(&mut self, port: usize) -> &mut InputStreamManager {
        self.streams.by_id_mut(port)
    }

    /// Queue packets arriving on `port`. Never blocks.
    pub fn add_packets(&mut self, port: usize, packets: &[Packet]) -> Result<()> {
        self.streams.by_id_mut(port).add_packets(packets)?;
        if let Policy::Synced {
            trim: Some((trigger, target)),
            ..
        } = self.policy
        {
            self.trim_queues(port, trigger, target);
        }
        Ok(())
    }

    /// Drop the oldest packets of an overfull stream and the packets of
    /// every other stream older than what was kept, so the queues stay
    /// aligned on the same timestamps.
    fn trim_queues(&mut self, port: usize, trigger: usize, target: usize) {
        let stream = self.streams.by_id_mut(port);
        if stream.queue_size() <= trigger {
            return;
        }
        let dropped = stream.truncate_front(target);
        let Some(oldest_kept) = stream.front().map(Packet::timestamp) else {
            return;
        };
        tracing::trace!("Fixed-size queue {} dropped {} packets", stream.name(), dropped);
        for stream in self.streams.iter_mut() {
            stream.erase_packets_earlier_than(oldest_kept);
        }
    }

    pub fn set_next_timestamp_bound(&mut self, port: usize, bound: Timestamp) {
        self.streams.by_id_mut(port).set_next_timestamp_bound(bound);
    }

    /// Decide whether the node can run. May drop packets that can no longer
    /// be read, but never consumes readable input.
    pub fn get_node_readiness(&mut self) -> NodeReadiness {
        match &self.policy {
            Policy::Synced { sets, .. } => {
                let (best, all_done) =
                    earliest_ready(sets, &self.streams, self.process_timestamp_bounds);
                match best {
                    Some((set, timestamp)) => {
                        self.selected_set = Some(set);
                        NodeReadiness::ReadyForProcess(timestamp)
                    }
                    None if all_done => NodeReadiness::ReadyForClose,
                    None => NodeReadiness::NotReady,
                }
            }
            Policy::Mux(mux) => mux.readiness(&mut self.streams),
            Policy::RoundRobin(rr) => rr.readiness(&mut self.streams),
        }
    }

    /// Build the input set for an invocation at `timestamp`. Ports without
    /// a packet at `timestamp` get an empty packet carrying `timestamp`.
    pub fn fill_input_set(&mut self, timestamp: Timestamp) -> Result<TaggedCollection<Packet>> {
        let mut inputs = TaggedCollection::from_fn(self.streams.tag_map().clone(), |_| {
            Packet::empty().into_at(timestamp)
        });
        match &self.policy {
            Policy::Synced { sets, .. } => {
                let set = self
                    .selected_set
                    .and_then(|index| sets.get(index))
                    .ok_or_else(|| {
                        Error::InvalidState("input set filled before readiness".to_string())
                    })?;
                for &port in set.ports() {
                    if let Some(packet) = self.streams.by_id(port).packet_at(timestamp) {
                        *inputs.by_id_mut(port) = packet.clone();
                    }
                }
            }
            Policy::Mux(mux) => mux.fill(&self.streams, timestamp, &mut inputs)?,
            Policy::RoundRobin(rr) => rr.fill(&self.streams, timestamp, &mut inputs),
        }
        Ok(inputs)
    }

    /// Release the packets consumed by the invocation at `timestamp`.
    pub fn finish_propagation(&mut self, timestamp: Timestamp) {
        match &mut self.policy {
            Policy::Synced { sets, .. } => {
                if let Some(set) = self.selected_set.take().and_then(|i| sets.get_mut(i)) {
                    set.finish(&mut self.streams, timestamp);
                }
            }
            Policy::Mux(mux) => mux.finish(&mut self.streams, timestamp),
            Policy::RoundRobin(rr) => rr.finish(&mut self.streams, timestamp),
        }
    }

    pub fn is_full(&self, port: usize) -> bool {
        self.streams.by_id(port).is_full()
    }

    /// Ports currently at or over their queue limit.
    pub fn full_ports(&self) -> Vec<usize> {
        (0..self.streams.len())
            .filter(|&port| self.streams.by_id(port).is_full())
            .collect()
    }

    /// Let a full queue accept one more packet.
    pub fn grow_queue_limit(&mut self, port: usize) {
        let stream = self.streams.by_id_mut(port);
        let grown = stream.queue_size() + 1;
        tracing::warn!(
            "Growing queue limit of stream {} to {} to resolve throttling",
            stream.name(),
            grown
        );
        stream.set_max_queue_size(Some(grown));
    }

    /// Drop every queued packet; the node is closing.
    pub fn close(&mut self) {
        for stream in self.streams.iter_mut() {
            stream.close();
        }
    }
}
