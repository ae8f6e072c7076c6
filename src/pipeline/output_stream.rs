//! Output side of a stream.
//!
//! During one invocation a calculator writes into an [`OutputShard`]: packets
//! plus an optional bound directive. After the invocation the shard is
//! folded into the stream's [`OutputStreamManager`], which owns the
//! externally visible bound and the list of consumer ports (mirrors) the
//! update is delivered to.

use crate::error::{Error, Result};
use crate::pipeline::id::NodeId;
use crate::pipeline::packet::{Packet, PacketType};
use crate::pipeline::timestamp::{Timestamp, TimestampDiff};
use std::sync::{Mutex, PoisonError};

/// Calculator-facing writer for one output port during one invocation.
#[derive(Debug)]
pub struct OutputShard {
    stream: String,
    packet_type: PacketType,
    packets: Vec<Packet>,
    /// Smallest timestamp the next packet may carry.
    bound: Timestamp,
    /// Explicit `set_next_timestamp_bound` request.
    requested_bound: Option<Timestamp>,
    closed: bool,
    error: Option<Error>,
}

impl OutputShard {
    pub(crate) fn new(stream: impl Into<String>, packet_type: PacketType, bound: Timestamp) -> Self {
        Self {
            stream: stream.into(),
            packet_type,
            packets: Vec::new(),
            bound,
            requested_bound: None,
            closed: bound == Timestamp::DONE,
            error: None,
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream
    }

    /// Emit a packet. Its timestamp must be at or above the stream bound
    /// and strictly after anything emitted before.
    pub fn add(&mut self, packet: Packet) -> Result<()> {
        let result = self.check(&packet);
        match result {
            Ok(()) => {
                self.bound = packet.timestamp().next_allowed_in_stream();
                self.packets.push(packet);
                Ok(())
            }
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Emit `value` at `timestamp`.
    pub fn add_value<T: std::any::Any + Send + Sync>(
        &mut self,
        value: T,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.add(Packet::new(value).into_at(timestamp))
    }

    fn check(&self, packet: &Packet) -> Result<()> {
        let timestamp = packet.timestamp();
        if self.closed {
            return Err(Error::Contract(format!(
                "packet at {} added to closed stream \"{}\"",
                timestamp, self.stream
            )));
        }
        if packet.is_empty() {
            return Err(Error::Contract(format!(
                "empty packet added to stream \"{}\"",
                self.stream
            )));
        }
        if !timestamp.is_allowed_in_stream() {
            return Err(Error::Contract(format!(
                "timestamp {} is not allowed on stream \"{}\"",
                timestamp, self.stream
            )));
        }
        if timestamp < self.bound {
            return Err(Error::Contract(format!(
                "packet at {} on stream \"{}\" is below the timestamp bound {}",
                timestamp, self.stream, self.bound
            )));
        }
        self.packet_type
            .validate(packet)
            .map_err(|e| Error::Contract(format!("output stream \"{}\": {}", self.stream, e)))
    }

    /// Promise that no packet below `bound` will follow.
    pub fn set_next_timestamp_bound(&mut self, bound: Timestamp) {
        if self.closed {
            return;
        }
        self.requested_bound = Some(self.requested_bound.map_or(bound, |b| b.max(bound)));
    }

    /// Bound implied by this invocation so far.
    pub fn next_timestamp_bound(&self) -> Timestamp {
        self.requested_bound
            .map_or(self.bound, |requested| requested.max(self.bound))
    }

    /// Close the stream; consumers see its bound move to done.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}

/// A consumer input port fed by an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mirror {
    pub node: NodeId,
    pub port: usize,
}

#[derive(Debug)]
struct OutputStreamState {
    next_timestamp_bound: Timestamp,
    closed: bool,
}

/// Shared state of one output stream for the duration of a run.
#[derive(Debug)]
pub struct OutputStreamManager {
    name: String,
    packet_type: PacketType,
    mirrors: Vec<Mirror>,
    state: Mutex<OutputStreamState>,
}

impl OutputStreamManager {
    pub fn new(name: impl Into<String>, packet_type: PacketType, mirrors: Vec<Mirror>) -> Self {
        Self {
            name: name.into(),
            packet_type,
            mirrors,
            state: Mutex::new(OutputStreamState {
                next_timestamp_bound: Timestamp::PRE_STREAM,
                closed: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mirrors(&self) -> &[Mirror] {
        &self.mirrors
    }

    pub fn next_timestamp_bound(&self) -> Timestamp {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_timestamp_bound
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    /// Fresh shard positioned at the current bound.
    pub fn new_shard(&self) -> OutputShard {
        OutputShard::new(self.name.clone(), self.packet_type, self.next_timestamp_bound())
    }

    /// Fold a finished shard into the stream and hand the resulting packets
    /// and bound to `deliver` once per mirror.
    ///
    /// The new bound is the largest of the current bound, the bound implied
    /// by the shard, and `input_timestamp + offset + 1` when an offset is
    /// set. `deliver` runs with the stream locked so concurrent writers to
    /// one graph input stream reach consumers in order.
    pub fn propagate<F>(
        &self,
        shard: &mut OutputShard,
        input_timestamp: Timestamp,
        offset: Option<TimestampDiff>,
        mut deliver: F,
    ) -> Result<()>
    where
        F: FnMut(Mirror, &[Packet], Timestamp) -> Result<()>,
    {
        if let Some(err) = shard.take_error() {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Ok(());
        }

        // A shard prepared before a concurrent update may lag behind.
        if let Some(first) = shard.packets.first() {
            if first.timestamp() < state.next_timestamp_bound {
                return Err(Error::Contract(format!(
                    "packet at {} on stream \"{}\" is below the timestamp bound {}",
                    first.timestamp(),
                    self.name,
                    state.next_timestamp_bound
                )));
            }
        }

        let mut bound = state.next_timestamp_bound.max(shard.next_timestamp_bound());
        if let Some(offset) = offset {
            if input_timestamp.is_range_value() {
                bound = bound.max((input_timestamp + offset).next_allowed_in_stream());
            }
        }
        if shard.closed {
            bound = Timestamp::DONE;
        }

        let packets = std::mem::take(&mut shard.packets);
        if packets.is_empty() && bound == state.next_timestamp_bound {
            return Ok(());
        }
        state.next_timestamp_bound = bound;
        state.closed = bound == Timestamp::DONE;

        tracing::trace!(
            "Stream {} propagating {} packets, bound {}",
            self.name,
            packets.len(),
            bound
        );
        for mirror in &self.mirrors {
            deliver(*mirror, &packets, bound)?;
        }
        Ok(())
    }
}
