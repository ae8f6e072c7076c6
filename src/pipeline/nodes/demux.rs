//! RoundRobinDemuxCalculator: sends successive input packets to
//! `OUTPUT:0`, `OUTPUT:1`, ... in turn. An optional `SELECT` output
//! reports the chosen index at the same timestamp, so a downstream mux can
//! put the streams back together.

use crate::config::NodeOptions;
use crate::error::{Error, Result};
use crate::pipeline::calculator::{Calculator, CalculatorContext, CalculatorContract, CalculatorType};
use crate::pipeline::packet::PacketType;
use crate::pipeline::timestamp::TimestampDiff;

const OUTPUT: &str = "OUTPUT";
const SELECT: &str = "SELECT";

pub struct RoundRobinDemuxCalculator {
    next: usize,
}

impl CalculatorType for RoundRobinDemuxCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        if cc.inputs().len() != 1 || cc.inputs().num_entries_for("") != 1 {
            return Err(Error::Config(
                "RoundRobinDemuxCalculator needs one untagged input stream".to_string(),
            ));
        }
        if cc.outputs().num_entries_for(OUTPUT) == 0 {
            return Err(Error::Config(
                "RoundRobinDemuxCalculator needs OUTPUT streams".to_string(),
            ));
        }
        cc.set_inputs("", PacketType::Any);
        cc.set_outputs(OUTPUT, PacketType::Any);
        if cc.outputs().has_tag(SELECT) {
            cc.set_output(SELECT, 0, PacketType::of::<i32>())?;
        }
        Ok(())
    }

    fn create(_options: &NodeOptions) -> Result<Self> {
        Ok(RoundRobinDemuxCalculator { next: 0 })
    }
}

impl Calculator for RoundRobinDemuxCalculator {
    fn open(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        cc.set_offset(TimestampDiff(0))
    }

    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let packet = cc.input("", 0)?.clone();
        if packet.is_empty() {
            return Ok(());
        }
        let timestamp = cc.input_timestamp();
        let count = cc.outputs().num_entries_for(OUTPUT);
        let index = self.next;
        self.next = (self.next + 1) % count;

        cc.output(OUTPUT, index)?.add(packet)?;
        if cc.outputs().has_tag(SELECT) {
            cc.output(SELECT, 0)?.add_value(index as i32, timestamp)?;
        }
        Ok(())
    }
}
