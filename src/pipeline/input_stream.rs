//! Per-port input queue.
//!
//! An [`InputStreamManager`] holds the packets that have arrived on one input
//! port of a node together with the port's timestamp bound: the smallest
//! timestamp a future packet may still carry. Packets must arrive in
//! increasing timestamp order and never below the bound.

use crate::error::{Error, Result};
use crate::pipeline::packet::{Packet, PacketType};
use crate::pipeline::timestamp::Timestamp;
use std::collections::VecDeque;

pub struct InputStreamManager {
    name: String,
    packet_type: PacketType,
    back_edge: bool,
    queue: VecDeque<Packet>,
    next_timestamp_bound: Timestamp,
    /// `None` means unlimited.
    max_queue_size: Option<usize>,
    closed: bool,
}

impl InputStreamManager {
    pub fn new(name: impl Into<String>, packet_type: PacketType, back_edge: bool) -> Self {
        Self {
            name: name.into(),
            packet_type,
            back_edge,
            queue: VecDeque::new(),
            next_timestamp_bound: Timestamp::PRE_STREAM,
            max_queue_size: None,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn is_back_edge(&self) -> bool {
        self.back_edge
    }

    /// Append packets produced upstream.
    ///
    /// Every packet must be allowed in a stream, at or above the current
    /// bound, and of the declared type. Packets for a closed port are
    /// dropped.
    pub fn add_packets(&mut self, packets: &[Packet]) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for packet in packets {
            let timestamp = packet.timestamp();
            if !timestamp.is_allowed_in_stream() {
                return Err(Error::Contract(format!(
                    "packet at {} is not allowed on stream \"{}\"",
                    timestamp, self.name
                )));
            }
            if timestamp < self.next_timestamp_bound {
                return Err(Error::Contract(format!(
                    "packet at {} on stream \"{}\" is below the timestamp bound {}",
                    timestamp, self.name, self.next_timestamp_bound
                )));
            }
            if packet.is_empty() {
                return Err(Error::Contract(format!(
                    "empty packet at {} sent on stream \"{}\"",
                    timestamp, self.name
                )));
            }
            self.packet_type
                .validate(packet)
                .map_err(|e| Error::Contract(format!("stream \"{}\": {}", self.name, e)))?;

            self.queue.push_back(packet.clone());
            self.next_timestamp_bound = timestamp.next_allowed_in_stream();
        }
        Ok(())
    }

    /// Raise the bound. Lower values are ignored.
    pub fn set_next_timestamp_bound(&mut self, bound: Timestamp) {
        if self.closed {
            return;
        }
        if bound > self.next_timestamp_bound {
            tracing::trace!("Stream {} bound {} -> {}", self.name, self.next_timestamp_bound, bound);
            self.next_timestamp_bound = bound;
        }
    }

    pub fn next_timestamp_bound(&self) -> Timestamp {
        self.next_timestamp_bound
    }

    /// Timestamp of the queue head, or the bound when the queue is empty.
    /// The flag is true when the queue is empty.
    pub fn min_timestamp_or_bound(&self) -> (Timestamp, bool) {
        match self.queue.front() {
            Some(packet) => (packet.timestamp(), false),
            None => (self.next_timestamp_bound, true),
        }
    }

    pub fn front(&self) -> Option<&Packet> {
        self.queue.front()
    }

    /// Earliest queued timestamp at or after `timestamp`.
    pub fn first_timestamp_from(&self, timestamp: Timestamp) -> Option<Timestamp> {
        self.queue
            .iter()
            .map(Packet::timestamp)
            .find(|ts| *ts >= timestamp)
    }

    /// The queued packet at exactly `timestamp`, without removing it.
    pub fn packet_at(&self, timestamp: Timestamp) -> Option<&Packet> {
        self.queue
            .iter()
            .take_while(|p| p.timestamp() <= timestamp)
            .find(|p| p.timestamp() == timestamp)
    }

    /// Remove every packet up to and including `timestamp` and return the
    /// one at exactly `timestamp`, or an empty packet at `timestamp`.
    pub fn pop_packet_at(&mut self, timestamp: Timestamp) -> Packet {
        let mut found = None;
        while let Some(front) = self.queue.front() {
            if front.timestamp() > timestamp {
                break;
            }
            let packet = self.queue.pop_front();
            if let Some(packet) = packet.filter(|p| p.timestamp() == timestamp) {
                found = Some(packet);
            }
        }
        found.unwrap_or_else(|| Packet::empty().into_at(timestamp))
    }

    /// Drop packets strictly earlier than `timestamp`. Returns how many.
    pub fn erase_packets_earlier_than(&mut self, timestamp: Timestamp) -> usize {
        let mut erased = 0;
        while self
            .queue
            .front()
            .is_some_and(|p| p.timestamp() < timestamp)
        {
            self.queue.pop_front();
            erased += 1;
        }
        if erased > 0 {
            tracing::trace!("Stream {} dropped {} superseded packets", self.name, erased);
        }
        erased
    }

    /// Keep only the newest `keep` packets. Returns how many were dropped.
    pub fn truncate_front(&mut self, keep: usize) -> usize {
        let excess = self.queue.len().saturating_sub(keep);
        self.queue.drain(..excess);
        excess
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn max_queue_size(&self) -> Option<usize> {
        self.max_queue_size
    }

    pub fn set_max_queue_size(&mut self, max_queue_size: Option<usize>) {
        self.max_queue_size = max_queue_size;
    }

    pub fn is_full(&self) -> bool {
        self.max_queue_size
            .is_some_and(|max| self.queue.len() >= max)
    }

    /// No packet can arrive anymore and none is queued.
    pub fn is_done(&self) -> bool {
        self.queue.is_empty() && self.next_timestamp_bound == Timestamp::DONE
    }

    /// Called when the owning node closes. Releases queued packets.
    pub fn close(&mut self) {
        self.queue.clear();
        self.next_timestamp_bound = Timestamp::DONE;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
