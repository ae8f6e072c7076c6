//! SidePacketToStreamCalculator: emits each untagged input side packet
//! once on the output stream with the same index, then stops.
//!
//! The `at` option picks the timestamp: `"pre_stream"` (default),
//! `"post_stream"`, or an integer timestamp.

use crate::config::NodeOptions;
use crate::error::{Error, Result};
use crate::pipeline::calculator::{Calculator, CalculatorContext, CalculatorContract, CalculatorType};
use crate::pipeline::packet::PacketType;
use crate::pipeline::timestamp::Timestamp;

pub struct SidePacketToStreamCalculator {
    at: Timestamp,
}

fn emit_timestamp(options: &NodeOptions) -> Result<Timestamp> {
    match options.raw("at") {
        None => Ok(Timestamp::PRE_STREAM),
        Some(toml::Value::String(s)) if s == "pre_stream" => Ok(Timestamp::PRE_STREAM),
        Some(toml::Value::String(s)) if s == "post_stream" => Ok(Timestamp::POST_STREAM),
        Some(toml::Value::Integer(value)) => {
            let timestamp = Timestamp::new(*value);
            if !timestamp.is_range_value() {
                return Err(Error::Config(format!("option \"at\": {} is out of range", value)));
            }
            Ok(timestamp)
        }
        Some(other) => Err(Error::Config(format!(
            "option \"at\": expected \"pre_stream\", \"post_stream\" or an integer, got {}",
            other
        ))),
    }
}

impl CalculatorType for SidePacketToStreamCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        emit_timestamp(cc.options())?;
        let sides = cc.input_side_packets().num_entries_for("");
        if sides == 0 || sides != cc.input_side_packets().len() {
            return Err(Error::Config(
                "SidePacketToStreamCalculator needs untagged input side packets".to_string(),
            ));
        }
        if cc.outputs().num_entries_for("") != sides || cc.outputs().len() != sides {
            return Err(Error::Config(format!(
                "SidePacketToStreamCalculator has {} side packets but {} outputs",
                sides,
                cc.outputs().len()
            )));
        }
        cc.set_outputs("", PacketType::Any);
        Ok(())
    }

    fn create(options: &NodeOptions) -> Result<Self> {
        Ok(Self {
            at: emit_timestamp(options)?,
        })
    }
}

impl Calculator for SidePacketToStreamCalculator {
    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let sides = cc.input_side_packets().clone();
        for (index, packet) in sides.iter().enumerate() {
            cc.output("", index)?.add(packet.at(self.at))?;
        }
        Err(Error::Stop)
    }
}
