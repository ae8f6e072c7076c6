//! Synchronized readiness over a group of input streams.
//!
//! A sync set is ready at timestamp `t` once every stream in the set either
//! holds a packet at `t` or has a bound above `t`, so no packet at `t` can
//! still arrive. The default handler uses one set covering all streams; the
//! immediate handler puts every stream in its own set.

use crate::pipeline::input_stream::InputStreamManager;
use crate::pipeline::port::TaggedCollection;
use crate::pipeline::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetReadiness {
    NotReady,
    Ready(Timestamp),
    Done,
}

#[derive(Debug, Clone)]
pub(crate) struct SyncSet {
    ports: Vec<usize>,
    last_processed: Timestamp,
}

impl SyncSet {
    pub fn new(ports: Vec<usize>) -> Self {
        Self {
            ports,
            last_processed: Timestamp::UNSTARTED,
        }
    }

    pub fn ports(&self) -> &[usize] {
        &self.ports
    }

    pub fn readiness(
        &self,
        streams: &TaggedCollection<InputStreamManager>,
        process_timestamp_bounds: bool,
    ) -> SetReadiness {
        let mut min_bound = Timestamp::DONE;
        let mut min_packet = Timestamp::DONE;
        for &port in &self.ports {
            let (timestamp, empty) = streams.by_id(port).min_timestamp_or_bound();
            if empty {
                min_bound = min_bound.min(timestamp);
            } else {
                min_packet = min_packet.min(timestamp);
            }
        }

        if min_bound.min(min_packet) == Timestamp::DONE {
            return SetReadiness::Done;
        }

        if !process_timestamp_bounds {
            return if min_bound > min_packet {
                SetReadiness::Ready(min_packet)
            } else {
                SetReadiness::NotReady
            };
        }

        // Settled timestamps count too: everything below the smallest
        // bound of an empty stream can no longer change.
        let input_timestamp = min_packet.min(min_bound.previous_allowed_in_stream());
        if input_timestamp > self.last_processed.max(Timestamp::UNSTARTED) {
            SetReadiness::Ready(input_timestamp)
        } else {
            SetReadiness::NotReady
        }
    }

    /// Release packets up to `timestamp` and remember it as processed.
    pub fn finish(&mut self, streams: &mut TaggedCollection<InputStreamManager>, timestamp: Timestamp) {
        for &port in &self.ports {
            streams.by_id_mut(port).pop_packet_at(timestamp);
        }
        self.last_processed = timestamp;
    }
}

/// Pick the set ready at the earliest timestamp.
///
/// Returns the set index and timestamp, or `None` along with whether every
/// set is done.
pub(crate) fn earliest_ready(
    sets: &[SyncSet],
    streams: &TaggedCollection<InputStreamManager>,
    process_timestamp_bounds: bool,
) -> (Option<(usize, Timestamp)>, bool) {
    let mut best: Option<(usize, Timestamp)> = None;
    let mut all_done = true;
    for (index, set) in sets.iter().enumerate() {
        match set.readiness(streams, process_timestamp_bounds) {
            SetReadiness::Done => {}
            SetReadiness::NotReady => all_done = false,
            SetReadiness::Ready(timestamp) => {
                all_done = false;
                if best.map_or(true, |(_, ts)| timestamp < ts) {
                    best = Some((index, timestamp));
                }
            }
        }
    }
    (best, all_done)
}
