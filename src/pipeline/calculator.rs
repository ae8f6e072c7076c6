//! The calculator contract: what a node implementation sees.
//!
//! A calculator declares its ports in [`CalculatorContract`] when the graph
//! is validated, then receives `open`, `process` and `close` calls with a
//! [`CalculatorContext`] while the graph runs. The scheduler guarantees that
//! at most one of these calls is active per node at a time.

use crate::config::{InputStreamHandlerConfig, NodeOptions};
use crate::error::{Error, Result};
use crate::pipeline::output_stream::OutputShard;
use crate::pipeline::packet::{Packet, PacketType};
use crate::pipeline::port::{TagMap, TaggedCollection};
use crate::pipeline::resources::Resources;
use crate::pipeline::timestamp::{Timestamp, TimestampDiff};
use std::sync::Arc;

/// Runtime behaviour of a node.
pub trait Calculator: Send {
    /// Called once per run before any `process`. Output side packets and the
    /// timestamp offset may only be set here.
    fn open(&mut self, _cc: &mut CalculatorContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once per ready input set. Returning [`Error::Stop`] closes
    /// the node; source nodes use it to signal the end of their data.
    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()>;

    /// Called once when all inputs are done, or after `Stop`.
    fn close(&mut self, _cc: &mut CalculatorContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Static side of a registered calculator.
pub trait CalculatorType: Calculator + Sized + 'static {
    /// Declare port types and validate options.
    fn get_contract(cc: &mut CalculatorContract) -> Result<()>;

    /// Build a fresh instance for one run.
    fn create(options: &NodeOptions) -> Result<Self>;
}

/// Declared type of an input side packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SidePacketSpec {
    pub packet_type: PacketType,
    pub optional: bool,
}

/// Port declarations of one node, filled in by `get_contract`.
#[derive(Debug, Clone)]
pub struct CalculatorContract {
    node_name: String,
    options: NodeOptions,
    inputs: TaggedCollection<PacketType>,
    outputs: TaggedCollection<PacketType>,
    input_side_packets: TaggedCollection<SidePacketSpec>,
    output_side_packets: TaggedCollection<PacketType>,
    input_stream_handler: Option<InputStreamHandlerConfig>,
    process_timestamp_bounds: bool,
}

impl CalculatorContract {
    pub fn new(
        node_name: impl Into<String>,
        options: NodeOptions,
        inputs: Arc<TagMap>,
        outputs: Arc<TagMap>,
        input_side_packets: Arc<TagMap>,
        output_side_packets: Arc<TagMap>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            options,
            inputs: TaggedCollection::from_fn(inputs, |_| PacketType::Any),
            outputs: TaggedCollection::from_fn(outputs, |_| PacketType::Any),
            input_side_packets: TaggedCollection::from_fn(input_side_packets, |_| {
                SidePacketSpec::default()
            }),
            output_side_packets: TaggedCollection::from_fn(output_side_packets, |_| PacketType::Any),
            input_stream_handler: None,
            process_timestamp_bounds: false,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn inputs(&self) -> &TaggedCollection<PacketType> {
        &self.inputs
    }

    pub fn outputs(&self) -> &TaggedCollection<PacketType> {
        &self.outputs
    }

    pub fn input_side_packets(&self) -> &TaggedCollection<SidePacketSpec> {
        &self.input_side_packets
    }

    pub fn output_side_packets(&self) -> &TaggedCollection<PacketType> {
        &self.output_side_packets
    }

    fn missing(&self, kind: &str, tag: &str, index: usize) -> Error {
        Error::Config(format!(
            "node \"{}\" has no {} {}:{}",
            self.node_name, kind, tag, index
        ))
    }

    /// Declare the type of input `tag:index`. Fails when the node config
    /// does not connect that port.
    pub fn set_input(&mut self, tag: &str, index: usize, packet_type: PacketType) -> Result<()> {
        match self.inputs.get_mut(tag, index) {
            Some(slot) => {
                *slot = packet_type;
                Ok(())
            }
            None => Err(self.missing("input stream", tag, index)),
        }
    }

    pub fn set_output(&mut self, tag: &str, index: usize, packet_type: PacketType) -> Result<()> {
        match self.outputs.get_mut(tag, index) {
            Some(slot) => {
                *slot = packet_type;
                Ok(())
            }
            None => Err(self.missing("output stream", tag, index)),
        }
    }

    /// Declare every input under `tag`.
    pub fn set_inputs(&mut self, tag: &str, packet_type: PacketType) {
        self.inputs
            .tag_mut(tag)
            .iter_mut()
            .for_each(|slot| *slot = packet_type);
    }

    /// Declare every output under `tag`.
    pub fn set_outputs(&mut self, tag: &str, packet_type: PacketType) {
        self.outputs
            .tag_mut(tag)
            .iter_mut()
            .for_each(|slot| *slot = packet_type);
    }

    /// Declare every input and output stream, whatever the tag.
    pub fn set_all_streams(&mut self, packet_type: PacketType) {
        self.inputs.iter_mut().for_each(|slot| *slot = packet_type);
        self.outputs.iter_mut().for_each(|slot| *slot = packet_type);
    }

    pub fn set_input_side_packet(
        &mut self,
        tag: &str,
        index: usize,
        packet_type: PacketType,
        optional: bool,
    ) -> Result<()> {
        match self.input_side_packets.get_mut(tag, index) {
            Some(slot) => {
                *slot = SidePacketSpec {
                    packet_type,
                    optional,
                };
                Ok(())
            }
            None => Err(self.missing("input side packet", tag, index)),
        }
    }

    pub fn set_output_side_packet(
        &mut self,
        tag: &str,
        index: usize,
        packet_type: PacketType,
    ) -> Result<()> {
        match self.output_side_packets.get_mut(tag, index) {
            Some(slot) => {
                *slot = packet_type;
                Ok(())
            }
            None => Err(self.missing("output side packet", tag, index)),
        }
    }

    /// Preferred input stream handler, used unless the node config names one.
    pub fn set_input_stream_handler(&mut self, handler: InputStreamHandlerConfig) {
        self.input_stream_handler = Some(handler);
    }

    pub fn input_stream_handler(&self) -> Option<&InputStreamHandlerConfig> {
        self.input_stream_handler.as_ref()
    }

    /// Run on timestamps that are settled but carry no packets.
    pub fn set_process_timestamp_bounds(&mut self, enabled: bool) {
        self.process_timestamp_bounds = enabled;
    }

    pub fn process_timestamp_bounds(&self) -> bool {
        self.process_timestamp_bounds
    }
}

/// Which lifecycle call a context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    Process,
    Close,
}

/// Everything a calculator can read and write during one call.
pub struct CalculatorContext<'a> {
    node_name: &'a str,
    phase: Phase,
    input_timestamp: Timestamp,
    inputs: &'a TaggedCollection<Packet>,
    outputs: &'a mut TaggedCollection<OutputShard>,
    input_side_packets: &'a TaggedCollection<Packet>,
    output_side_packets: &'a mut TaggedCollection<Option<Packet>>,
    options: &'a NodeOptions,
    resources: &'a dyn Resources,
    offset: &'a mut Option<TimestampDiff>,
}

impl<'a> CalculatorContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node_name: &'a str,
        phase: Phase,
        input_timestamp: Timestamp,
        inputs: &'a TaggedCollection<Packet>,
        outputs: &'a mut TaggedCollection<OutputShard>,
        input_side_packets: &'a TaggedCollection<Packet>,
        output_side_packets: &'a mut TaggedCollection<Option<Packet>>,
        options: &'a NodeOptions,
        resources: &'a dyn Resources,
        offset: &'a mut Option<TimestampDiff>,
    ) -> Self {
        Self {
            node_name,
            phase,
            input_timestamp,
            inputs,
            outputs,
            input_side_packets,
            output_side_packets,
            options,
            resources,
            offset,
        }
    }

    pub fn node_name(&self) -> &str {
        self.node_name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Timestamp of the current input set. `Unstarted` in `open` and for
    /// source nodes, `Done` in `close`.
    pub fn input_timestamp(&self) -> Timestamp {
        self.input_timestamp
    }

    pub fn options(&self) -> &NodeOptions {
        self.options
    }

    pub fn resources(&self) -> &dyn Resources {
        self.resources
    }

    pub fn inputs(&self) -> &TaggedCollection<Packet> {
        self.inputs
    }

    /// Input packet at `tag:index`; empty when nothing arrived at this
    /// timestamp.
    pub fn input(&self, tag: &str, index: usize) -> Result<&Packet> {
        self.inputs.get(tag, index).ok_or_else(|| {
            Error::NotFound(format!("input {}:{} of node \"{}\"", tag, index, self.node_name))
        })
    }

    pub fn outputs(&mut self) -> &mut TaggedCollection<OutputShard> {
        self.outputs
    }

    pub fn output(&mut self, tag: &str, index: usize) -> Result<&mut OutputShard> {
        let node_name = self.node_name;
        self.outputs.get_mut(tag, index).ok_or_else(|| {
            Error::NotFound(format!("output {}:{} of node \"{}\"", tag, index, node_name))
        })
    }

    pub fn input_side_packets(&self) -> &TaggedCollection<Packet> {
        self.input_side_packets
    }

    /// Input side packet at `tag:index`; empty when optional and not given.
    pub fn input_side_packet(&self, tag: &str, index: usize) -> Result<&Packet> {
        self.input_side_packets.get(tag, index).ok_or_else(|| {
            Error::NotFound(format!(
                "input side packet {}:{} of node \"{}\"",
                tag, index, self.node_name
            ))
        })
    }

    /// Publish an output side packet. Only valid in `open`.
    pub fn set_output_side_packet(&mut self, tag: &str, index: usize, packet: Packet) -> Result<()> {
        if self.phase != Phase::Open {
            return Err(Error::InvalidState(format!(
                "node \"{}\" set output side packet {}:{} outside open",
                self.node_name, tag, index
            )));
        }
        let node_name = self.node_name;
        let slot = self.output_side_packets.get_mut(tag, index).ok_or_else(|| {
            Error::NotFound(format!(
                "output side packet {}:{} of node \"{}\"",
                tag, index, node_name
            ))
        })?;
        if slot.is_some() {
            return Err(Error::AlreadyExists(format!(
                "output side packet {}:{} of node \"{}\"",
                tag, index, node_name
            )));
        }
        *slot = Some(packet.into_at(Timestamp::UNSET));
        Ok(())
    }

    /// Declare how far output bounds trail the input timestamp. Only valid
    /// in `open`.
    pub fn set_offset(&mut self, offset: TimestampDiff) -> Result<()> {
        if self.phase != Phase::Open {
            return Err(Error::InvalidState(format!(
                "node \"{}\" set its timestamp offset outside open",
                self.node_name
            )));
        }
        *self.offset = Some(offset);
        Ok(())
    }
}
