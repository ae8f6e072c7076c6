//! PassThroughCalculator: forwards every input to the output with the same
//! tag and index, and every input side packet likewise.

use crate::config::NodeOptions;
use crate::error::{Error, Result};
use crate::pipeline::calculator::{Calculator, CalculatorContext, CalculatorContract, CalculatorType};
use crate::pipeline::packet::PacketType;
use crate::pipeline::port::TagMap;
use crate::pipeline::timestamp::TimestampDiff;

pub struct PassThroughCalculator;

/// Each port of `from` must have a twin in `to`.
fn check_matching(from: &TagMap, to: &TagMap, what: &str) -> Result<()> {
    if from.num_entries() != to.num_entries() {
        return Err(Error::Config(format!(
            "PassThroughCalculator needs as many output {} as inputs ({} vs {})",
            what,
            to.num_entries(),
            from.num_entries()
        )));
    }
    for id in 0..from.num_entries() {
        if let Some((tag, index)) = from.tag_and_index(id) {
            if to.get_id(tag, index).is_none() {
                return Err(Error::Config(format!(
                    "PassThroughCalculator has no output {} for {}",
                    what,
                    from.label(id)
                )));
            }
        }
    }
    Ok(())
}

impl CalculatorType for PassThroughCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        check_matching(cc.inputs().tag_map(), cc.outputs().tag_map(), "streams")?;
        check_matching(
            cc.input_side_packets().tag_map(),
            cc.output_side_packets().tag_map(),
            "side packets",
        )?;
        cc.set_all_streams(PacketType::Any);
        Ok(())
    }

    fn create(_options: &NodeOptions) -> Result<Self> {
        Ok(PassThroughCalculator)
    }
}

impl Calculator for PassThroughCalculator {
    fn open(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let sides = cc.input_side_packets().clone();
        let map = sides.tag_map().clone();
        for (id, packet) in sides.iter().enumerate() {
            if let Some((tag, index)) = map.tag_and_index(id) {
                if !packet.is_empty() {
                    cc.set_output_side_packet(tag, index, packet.clone())?;
                }
            }
        }
        cc.set_offset(TimestampDiff(0))
    }

    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let inputs = cc.inputs().clone();
        let map = inputs.tag_map().clone();
        for (id, packet) in inputs.iter().enumerate() {
            if packet.is_empty() {
                continue;
            }
            if let Some((tag, index)) = map.tag_and_index(id) {
                cc.output(tag, index)?.add(packet.clone())?;
            }
        }
        Ok(())
    }
}
