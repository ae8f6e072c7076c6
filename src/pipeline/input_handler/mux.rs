//! Readiness for select-driven nodes.
//!
//! The `SELECT` stream decides which `INPUT` stream is read at each
//! timestamp, so only the selected stream has to settle. Data packets older
//! than the next selection can never be read and are dropped as soon as the
//! selection moves past them.

use crate::error::{Error, Result};
use crate::pipeline::input_handler::NodeReadiness;
use crate::pipeline::input_stream::InputStreamManager;
use crate::pipeline::packet::Packet;
use crate::pipeline::port::TaggedCollection;
use crate::pipeline::timestamp::Timestamp;
use std::ops::Range;

#[derive(Debug, Clone)]
pub(crate) struct MuxPolicy {
    control: usize,
    data: Range<usize>,
}

impl MuxPolicy {
    pub fn new(control: usize, data: Range<usize>) -> Self {
        Self { control, data }
    }

    fn selected(&self, packet: &Packet) -> Result<usize> {
        let select = match packet.get::<i32>() {
            Ok(value) => i64::from(*value),
            Err(_) => *packet
                .get::<i64>()
                .map_err(|e| Error::Contract(format!("select packet: {}", e)))?,
        };
        usize::try_from(select)
            .ok()
            .filter(|index| *index < self.data.len())
            .map(|index| self.data.start + index)
            .ok_or_else(|| {
                Error::Contract(format!(
                    "select value {} out of range for {} inputs",
                    select,
                    self.data.len()
                ))
            })
    }

    pub fn readiness(&self, streams: &mut TaggedCollection<InputStreamManager>) -> NodeReadiness {
        let (control_ts, control_empty) = streams.by_id(self.control).min_timestamp_or_bound();

        for port in self.data.clone() {
            streams.by_id_mut(port).erase_packets_earlier_than(control_ts);
        }

        if control_empty {
            return if control_ts == Timestamp::DONE {
                NodeReadiness::ReadyForClose
            } else {
                NodeReadiness::NotReady
            };
        }

        let Some(port) = streams
            .by_id(self.control)
            .front()
            .and_then(|packet| self.selected(packet).ok())
        else {
            // Let the fill step surface the bad selection as an error.
            return NodeReadiness::ReadyForProcess(control_ts);
        };

        let (data_ts, data_empty) = streams.by_id(port).min_timestamp_or_bound();
        if data_empty && data_ts <= control_ts {
            NodeReadiness::NotReady
        } else {
            NodeReadiness::ReadyForProcess(control_ts)
        }
    }

    pub fn fill(
        &self,
        streams: &TaggedCollection<InputStreamManager>,
        timestamp: Timestamp,
        inputs: &mut TaggedCollection<Packet>,
    ) -> Result<()> {
        let control = streams
            .by_id(self.control)
            .packet_at(timestamp)
            .cloned()
            .ok_or_else(|| Error::Contract(format!("no select packet at {}", timestamp)))?;
        let port = self.selected(&control)?;
        if let Some(packet) = streams.by_id(port).packet_at(timestamp) {
            *inputs.by_id_mut(port) = packet.clone();
        }
        *inputs.by_id_mut(self.control) = control;
        Ok(())
    }

    pub fn finish(&self, streams: &mut TaggedCollection<InputStreamManager>, timestamp: Timestamp) {
        streams.by_id_mut(self.control).pop_packet_at(timestamp);
        for port in self.data.clone() {
            streams.by_id_mut(port).pop_packet_at(timestamp);
        }
    }
}
