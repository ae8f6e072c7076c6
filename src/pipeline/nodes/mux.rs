//! MuxCalculator: forwards one of `INPUT:0..n` to `OUTPUT`.
//!
//! The choice comes from a `SELECT` stream, re-read at every timestamp,
//! or from a `SELECT` side packet fixed for the whole run. With a stream
//! selector the node uses the mux input stream handler, so unselected
//! inputs never hold it back. Selectors may be `i32` or `i64`.

use crate::config::{InputStreamHandlerConfig, NodeOptions};
use crate::error::{Error, Result};
use crate::pipeline::calculator::{Calculator, CalculatorContext, CalculatorContract, CalculatorType};
use crate::pipeline::packet::{Packet, PacketType};
use crate::pipeline::timestamp::TimestampDiff;

const INPUT: &str = "INPUT";
const OUTPUT: &str = "OUTPUT";
const SELECT: &str = "SELECT";

pub struct MuxCalculator {
    /// Selection from the side packet, if that is the selector.
    fixed: Option<usize>,
}

impl MuxCalculator {
    fn selector(packet: &Packet) -> Result<i64> {
        match packet.get::<i32>() {
            Ok(value) => Ok(i64::from(*value)),
            Err(_) => packet.get::<i64>().copied(),
        }
    }

    fn select(cc: &CalculatorContext<'_>, selector: i64) -> Result<usize> {
        let count = cc.inputs().num_entries_for(INPUT);
        usize::try_from(selector)
            .ok()
            .filter(|&index| index < count)
            .ok_or_else(|| {
                Error::calculator(
                    cc.node_name(),
                    format!("selector {} out of range for {} inputs", selector, count),
                )
            })
    }
}

impl CalculatorType for MuxCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        if cc.inputs().num_entries_for(INPUT) == 0 {
            return Err(Error::Config("MuxCalculator needs INPUT streams".to_string()));
        }
        if cc.outputs().num_entries_for(OUTPUT) != 1 || cc.outputs().len() != 1 {
            return Err(Error::Config("MuxCalculator needs exactly one OUTPUT stream".to_string()));
        }
        let stream_select = cc.inputs().has_tag(SELECT);
        let side_select = cc.input_side_packets().has_tag(SELECT);
        match (stream_select, side_select) {
            (true, false) => {
                cc.set_input(SELECT, 0, PacketType::Any)?;
                cc.set_input_stream_handler(InputStreamHandlerConfig::new("MuxInputStreamHandler"));
            }
            (false, true) => cc.set_input_side_packet(SELECT, 0, PacketType::Any, false)?,
            _ => {
                return Err(Error::Config(
                    "MuxCalculator needs a SELECT stream or a SELECT side packet".to_string(),
                ))
            }
        }
        cc.set_inputs(INPUT, PacketType::Any);
        cc.set_outputs(OUTPUT, PacketType::Any);
        Ok(())
    }

    fn create(_options: &NodeOptions) -> Result<Self> {
        Ok(MuxCalculator { fixed: None })
    }
}

impl Calculator for MuxCalculator {
    fn open(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        if cc.input_side_packets().has_tag(SELECT) {
            let selector = Self::selector(cc.input_side_packet(SELECT, 0)?)?;
            self.fixed = Some(Self::select(cc, selector)?);
        }
        cc.set_offset(TimestampDiff(0))
    }

    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let index = match self.fixed {
            Some(index) => index,
            None => {
                let select = cc.input(SELECT, 0)?;
                if select.is_empty() {
                    return Ok(());
                }
                let selector = Self::selector(select)?;
                Self::select(cc, selector)?
            }
        };
        let packet = cc.input(INPUT, index)?.clone();
        if packet.is_empty() {
            return Ok(());
        }
        cc.output(OUTPUT, 0)?.add(packet)
    }
}
