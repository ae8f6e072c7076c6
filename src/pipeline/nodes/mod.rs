//! Built-in calculators.

pub mod demux;
pub mod mux;
pub mod pass_through;
pub mod side_packet_to_stream;
pub mod split_vector;

pub use demux::RoundRobinDemuxCalculator;
pub use mux::MuxCalculator;
pub use pass_through::PassThroughCalculator;
pub use side_packet_to_stream::SidePacketToStreamCalculator;
pub use split_vector::{
    SplitFloatVectorCalculator, SplitIntVectorCalculator, SplitStringVectorCalculator,
    SplitVectorCalculator,
};

use crate::pipeline::registry::CalculatorRegistry;

/// Register every built-in calculator under its conventional name.
pub fn register_builtins(registry: &mut CalculatorRegistry) {
    let results = [
        registry.register::<PassThroughCalculator>("PassThroughCalculator"),
        registry.register::<MuxCalculator>("MuxCalculator"),
        registry.register::<RoundRobinDemuxCalculator>("RoundRobinDemuxCalculator"),
        registry.register::<SplitIntVectorCalculator>("SplitIntVectorCalculator"),
        registry.register::<SplitFloatVectorCalculator>("SplitFloatVectorCalculator"),
        registry.register::<SplitStringVectorCalculator>("SplitStringVectorCalculator"),
        registry.register::<SidePacketToStreamCalculator>("SidePacketToStreamCalculator"),
    ];
    for result in results {
        if let Err(e) = result {
            tracing::warn!("Skipping built-in calculator: {}", e);
        }
    }
}
