//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod calculators;

use calcgraph::{CalculatorGraph, CalculatorRegistry, GraphConfig, Packet, Timestamp};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound for anything a test waits on.
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Built-ins plus the test calculators.
pub fn registry() -> CalculatorRegistry {
    let mut registry = CalculatorRegistry::with_builtins();
    calculators::register_all(&mut registry);
    registry
}

pub fn graph(config: GraphConfig) -> CalculatorGraph {
    CalculatorGraph::from_config(Arc::new(registry()), config).expect("graph should validate")
}

pub fn at<T: std::any::Any + Send + Sync>(value: T, t: i64) -> Packet {
    Packet::new(value).into_at(Timestamp::new(t))
}

/// Add `values` to `stream` at timestamps `0, 1, 2, ...`.
pub fn feed<T: Clone + std::any::Any + Send + Sync>(graph: &CalculatorGraph, stream: &str, values: &[T]) {
    for (t, value) in values.iter().enumerate() {
        graph
            .add_packet_to_input_stream(stream, at(value.clone(), t as i64))
            .expect("add packet");
    }
}

/// Observer that records every packet of one stream.
#[derive(Clone, Default)]
pub struct Collector {
    packets: Arc<Mutex<Vec<Packet>>>,
}

impl Collector {
    /// Observe `stream` on `graph`; `observe_bounds` also records empty
    /// bound packets.
    pub fn attach(graph: &CalculatorGraph, stream: &str, observe_bounds: bool) -> Self {
        let collector = Self::default();
        let packets = collector.packets.clone();
        graph
            .observe_output_stream_with_bounds(stream, observe_bounds, move |packet| {
                packets.lock().unwrap().push(packet.clone());
                Ok(())
            })
            .expect("observe stream");
        collector
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.packets.lock().unwrap().clone()
    }

    pub fn values<T: Clone + 'static>(&self) -> Vec<T> {
        self.packets()
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.get::<T>().expect("packet type").clone())
            .collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.packets().iter().map(|p| p.timestamp().value()).collect()
    }

    pub fn clear(&self) {
        self.packets.lock().unwrap().clear();
    }
}
