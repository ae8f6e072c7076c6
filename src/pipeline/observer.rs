//! Output observation: callbacks and pollers on graph streams.
//!
//! Each registered observer becomes an internal sink node appended to the
//! graph when a run starts. The sink runs like any other node, so
//! callbacks are invoked serially and in timestamp order. Pollers are the
//! channel flavour of the same sink: packets go into a crossbeam channel
//! and the poller sees the end of the stream once the sink closes.

use crate::config::{GraphConfig, NodeConfig, NodeOptions};
use crate::error::{Result, ResultExt};
use crate::pipeline::calculator::{Calculator, CalculatorContext, CalculatorContract};
use crate::pipeline::packet::{Packet, PacketType};
use crate::pipeline::registry::CalculatorRegistry;
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Callback receiving every packet of an observed stream.
pub type PacketCallback = Box<dyn FnMut(&Packet) -> Result<()> + Send>;

type SharedCallback = Arc<Mutex<PacketCallback>>;
type SenderSlot = Arc<Mutex<Option<Sender<Packet>>>>;

#[derive(Clone)]
enum ObserverSink {
    Callback(SharedCallback),
    /// Taken by the first run that starts after registration.
    Poller(SenderSlot),
}

/// An observer registered on a graph; outlives individual runs.
#[derive(Clone)]
pub(crate) struct OutputObserver {
    stream: String,
    observe_bounds: bool,
    sink: ObserverSink,
}

impl OutputObserver {
    pub fn callback(stream: impl Into<String>, observe_bounds: bool, callback: PacketCallback) -> Self {
        Self {
            stream: stream.into(),
            observe_bounds,
            sink: ObserverSink::Callback(Arc::new(Mutex::new(callback))),
        }
    }

    pub fn poller(stream: impl Into<String>) -> (Self, OutputStreamPoller) {
        let stream = stream.into();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let observer = Self {
            stream: stream.clone(),
            observe_bounds: false,
            sink: ObserverSink::Poller(Arc::new(Mutex::new(Some(sender)))),
        };
        (observer, OutputStreamPoller { stream, receiver })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    fn calculator(&self) -> ObserverCalculator {
        let sink = match &self.sink {
            ObserverSink::Callback(callback) => RunSink::Callback(callback.clone()),
            ObserverSink::Poller(slot) => {
                RunSink::Channel(slot.lock().unwrap_or_else(PoisonError::into_inner).take())
            }
        };
        ObserverCalculator {
            stream: self.stream.clone(),
            observe_bounds: self.observe_bounds,
            sink,
        }
    }
}

/// Extend `config` and a copy of `registry` with one sink node per
/// observer.
pub(crate) fn attach_observers(
    config: &GraphConfig,
    registry: &CalculatorRegistry,
    observers: &[OutputObserver],
) -> Result<(GraphConfig, CalculatorRegistry)> {
    let mut config = config.clone();
    let mut registry = registry.clone();

    for (index, observer) in observers.iter().enumerate() {
        let calculator = format!("__ObserverCalculator_{}", index);
        let observe_bounds = observer.observe_bounds;
        let factory_observer = observer.clone();
        registry.register_fn(
            calculator.clone(),
            move |cc: &mut CalculatorContract| {
                cc.set_inputs("", PacketType::Any);
                cc.set_process_timestamp_bounds(observe_bounds);
                Ok(())
            },
            move |_options: &NodeOptions| Ok(Box::new(factory_observer.calculator()) as Box<dyn Calculator>),
        )?;
        config.nodes.push(
            NodeConfig::new(calculator)
                .with_name(format!("__observer_{}_{}", index, observer.stream))
                .input(observer.stream.clone()),
        );
    }
    Ok((config, registry))
}

enum RunSink {
    Callback(SharedCallback),
    Channel(Option<Sender<Packet>>),
}

/// Internal sink node feeding one observer.
struct ObserverCalculator {
    stream: String,
    observe_bounds: bool,
    sink: RunSink,
}

impl Calculator for ObserverCalculator {
    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let packet = cc.input("", 0)?;
        if packet.is_empty() && !self.observe_bounds {
            return Ok(());
        }
        match &mut self.sink {
            RunSink::Callback(callback) => {
                let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
                let stream = &self.stream;
                (*callback)(packet).with_context(|| format!("observer of stream \"{}\"", stream))
            }
            RunSink::Channel(Some(sender)) => {
                // A dropped poller just stops receiving.
                let _ = sender.send(packet.clone());
                Ok(())
            }
            RunSink::Channel(None) => Ok(()),
        }
    }

    fn close(&mut self, _cc: &mut CalculatorContext<'_>) -> Result<()> {
        if let RunSink::Channel(sender) = &mut self.sink {
            sender.take();
        }
        Ok(())
    }
}

/// Blocking reader of one output stream.
///
/// Yields packets in timestamp order and returns `None` once the stream
/// has closed and every packet has been read.
pub struct OutputStreamPoller {
    stream: String,
    receiver: Receiver<Packet>,
}

impl OutputStreamPoller {
    pub fn stream_name(&self) -> &str {
        &self.stream
    }

    /// Next packet, waiting for it if necessary.
    pub fn next(&self) -> Option<Packet> {
        self.receiver.recv().ok()
    }

    pub fn try_next(&self) -> Option<Packet> {
        self.receiver.try_recv().ok()
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<Packet> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Packets received and not yet read.
    pub fn queue_size(&self) -> usize {
        self.receiver.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Packet> + '_ {
        self.receiver.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_adds_named_sink_nodes() {
        let config = GraphConfig::new()
            .input("in")
            .node(NodeConfig::new("PassThroughCalculator").input("in").output("out"));
        let observers = vec![
            OutputObserver::callback("out", false, Box::new(|_| Ok(()))),
            OutputObserver::poller("out").0,
        ];
        let (config, registry) =
            attach_observers(&config, &CalculatorRegistry::with_builtins(), &observers).unwrap();

        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.nodes[1].display_name(), "__observer_0_out");
        assert_eq!(config.nodes[2].input_stream, vec!["out"]);
        assert!(registry.contains("__ObserverCalculator_0"));
        assert!(registry.contains("__ObserverCalculator_1"));
    }

    #[test]
    fn test_poller_sender_taken_once() {
        let (observer, poller) = OutputObserver::poller("out");
        let first = observer.calculator();
        let second = observer.calculator();
        assert!(matches!(first.sink, RunSink::Channel(Some(_))));
        assert!(matches!(second.sink, RunSink::Channel(None)));

        drop(first);
        drop(observer);
        drop(second);
        assert!(poller.next().is_none());
    }
}
