//! Readiness for nodes fed by a round-robin splitter.
//!
//! Each branch of a demux carries a disjoint subset of timestamps, so no
//! port waits for the others. The node runs as soon as any port holds a
//! packet, always at the earliest queued timestamp across ports. Packets at
//! or below the last processed timestamp arrived too late to keep the node's
//! timestamps increasing and are dropped.

use crate::pipeline::input_handler::NodeReadiness;
use crate::pipeline::input_stream::InputStreamManager;
use crate::pipeline::packet::Packet;
use crate::pipeline::port::TaggedCollection;
use crate::pipeline::timestamp::Timestamp;

#[derive(Debug, Clone)]
pub(crate) struct RoundRobinPolicy {
    last_processed: Timestamp,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            last_processed: Timestamp::UNSTARTED,
        }
    }

    pub fn readiness(&self, streams: &mut TaggedCollection<InputStreamManager>) -> NodeReadiness {
        let floor = self.last_processed.next_allowed_in_stream();
        let mut earliest: Option<Timestamp> = None;
        let mut all_done = true;
        for stream in streams.iter_mut() {
            if self.last_processed != Timestamp::UNSTARTED {
                let late = stream.erase_packets_earlier_than(floor);
                if late > 0 {
                    tracing::debug!(
                        "Stream {} dropped {} packets at or before {}",
                        stream.name(),
                        late,
                        self.last_processed
                    );
                }
            }
            if let Some(ts) = stream.front().map(Packet::timestamp) {
                earliest = Some(earliest.map_or(ts, |best| best.min(ts)));
            }
            all_done &= stream.is_done();
        }

        match earliest {
            Some(ts) => NodeReadiness::ReadyForProcess(ts),
            None if all_done => NodeReadiness::ReadyForClose,
            None => NodeReadiness::NotReady,
        }
    }

    pub fn fill(
        &self,
        streams: &TaggedCollection<InputStreamManager>,
        timestamp: Timestamp,
        inputs: &mut TaggedCollection<Packet>,
    ) {
        for port in 0..streams.len() {
            if let Some(packet) = streams.by_id(port).packet_at(timestamp) {
                *inputs.by_id_mut(port) = packet.clone();
            }
        }
    }

    pub fn finish(&mut self, streams: &mut TaggedCollection<InputStreamManager>, timestamp: Timestamp) {
        for stream in streams.iter_mut() {
            stream.pop_packet_at(timestamp);
        }
        self.last_processed = timestamp;
    }
}
