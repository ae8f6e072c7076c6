//! Output stream handler: pushes a node's invocation results downstream.

use crate::error::{Result, ResultExt};
use crate::pipeline::id::StreamId;
use crate::pipeline::output_stream::{Mirror, OutputShard, OutputStreamManager};
use crate::pipeline::packet::Packet;
use crate::pipeline::port::{TagMap, TaggedCollection};
use crate::pipeline::timestamp::{Timestamp, TimestampDiff};
use std::sync::Arc;

/// Output ports of one node, keyed to the run's stream table.
pub struct OutputStreamHandler {
    tag_map: Arc<TagMap>,
    streams: Vec<StreamId>,
    offset: Option<TimestampDiff>,
}

impl OutputStreamHandler {
    pub fn new(tag_map: Arc<TagMap>, streams: Vec<StreamId>) -> Self {
        Self {
            tag_map,
            streams,
            offset: None,
        }
    }

    pub fn offset(&self) -> Option<TimestampDiff> {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Option<TimestampDiff>) {
        self.offset = offset;
    }

    pub fn stream_ids(&self) -> &[StreamId] {
        &self.streams
    }

    /// One fresh shard per output port.
    pub fn prepare_shards(&self, managers: &[OutputStreamManager]) -> TaggedCollection<OutputShard> {
        TaggedCollection::from_fn(self.tag_map.clone(), |port| {
            managers[self.streams[port].index()].new_shard()
        })
    }

    /// Fold the shards of a finished invocation into their streams and
    /// deliver packets and bounds to every consumer.
    pub fn propagate<F>(
        &self,
        shards: &mut TaggedCollection<OutputShard>,
        input_timestamp: Timestamp,
        managers: &[OutputStreamManager],
        mut deliver: F,
    ) -> Result<()>
    where
        F: FnMut(Mirror, &[Packet], Timestamp) -> Result<()>,
    {
        for (port, stream) in self.streams.iter().enumerate() {
            let manager = &managers[stream.index()];
            manager
                .propagate(shards.by_id_mut(port), input_timestamp, self.offset, &mut deliver)
                .with_context(|| format!("propagating {}", self.tag_map.label(port)))?;
        }
        Ok(())
    }

    /// Close every output: consumers see the bound move to done.
    pub fn close<F>(&self, managers: &[OutputStreamManager], deliver: F) -> Result<()>
    where
        F: FnMut(Mirror, &[Packet], Timestamp) -> Result<()>,
    {
        let mut shards = self.prepare_shards(managers);
        for shard in shards.iter_mut() {
            shard.close();
        }
        self.propagate(&mut shards, Timestamp::DONE, managers, deliver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::NodeId;
    use crate::pipeline::packet::PacketType;

    fn setup() -> (OutputStreamHandler, Vec<OutputStreamManager>) {
        let map = Arc::new(TagMap::from_specs(&["OUT:0:a", "OUT:1:b"]).unwrap());
        let managers = vec![
            OutputStreamManager::new(
                "a",
                PacketType::Any,
                vec![Mirror {
                    node: NodeId(1),
                    port: 0,
                }],
            ),
            OutputStreamManager::new(
                "b",
                PacketType::Any,
                vec![Mirror {
                    node: NodeId(2),
                    port: 1,
                }],
            ),
        ];
        (
            OutputStreamHandler::new(map, vec![StreamId(0), StreamId(1)]),
            managers,
        )
    }

    #[test]
    fn test_offset_moves_silent_outputs() {
        let (mut handler, managers) = setup();
        handler.set_offset(Some(TimestampDiff(0)));
        let mut shards = handler.prepare_shards(&managers);
        shards
            .by_id_mut(0)
            .add_value(1u8, Timestamp::new(4))
            .unwrap();
        let mut delivered = Vec::new();
        handler
            .propagate(&mut shards, Timestamp::new(4), &managers, |mirror, packets, bound| {
                delivered.push((mirror.node, packets.len(), bound));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            delivered,
            vec![
                (NodeId(1), 1, Timestamp::new(5)),
                (NodeId(2), 0, Timestamp::new(5)),
            ]
        );
    }

    #[test]
    fn test_close_reaches_every_consumer() {
        let (handler, managers) = setup();
        let mut bounds = Vec::new();
        handler
            .close(&managers, |_, _, bound| {
                bounds.push(bound);
                Ok(())
            })
            .unwrap();
        assert_eq!(bounds, vec![Timestamp::DONE, Timestamp::DONE]);
        assert!(managers.iter().all(OutputStreamManager::is_closed));
    }

    #[test]
    fn test_delivery_error_names_port() {
        let (handler, managers) = setup();
        let mut shards = handler.prepare_shards(&managers);
        shards.by_id_mut(1).set_next_timestamp_bound(Timestamp::new(3));
        let err = handler
            .propagate(&mut shards, Timestamp::new(0), &managers, |_, _, _| {
                Err(crate::error::Error::Contract("boom".to_string()))
            })
            .unwrap_err();
        assert!(err.to_string().contains("OUT:1"));
    }
}
