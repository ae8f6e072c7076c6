//! Split a vector packet into one output per configured range.
//!
//! Options:
//!
//! ```toml
//! ranges = [[0, 1], [1, 4]]   # half-open [begin, end) per output
//! element_only = false        # true: each range has one element, emitted unwrapped
//! ```
//!
//! Registered for `Vec<i32>`, `Vec<f32>` and `Vec<String>`.

use crate::config::NodeOptions;
use crate::error::{Error, Result};
use crate::pipeline::calculator::{Calculator, CalculatorContext, CalculatorContract, CalculatorType};
use crate::pipeline::packet::PacketType;
use crate::pipeline::timestamp::TimestampDiff;
use serde::Deserialize;
use std::marker::PhantomData;
use std::ops::Range;

pub type SplitIntVectorCalculator = SplitVectorCalculator<i32>;
pub type SplitFloatVectorCalculator = SplitVectorCalculator<f32>;
pub type SplitStringVectorCalculator = SplitVectorCalculator<String>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SplitOptions {
    ranges: Vec<[usize; 2]>,
    #[serde(default)]
    element_only: bool,
}

fn parse_options(options: &NodeOptions) -> Result<(Vec<Range<usize>>, bool)> {
    let options: SplitOptions = options.parse()?;
    if options.ranges.is_empty() {
        return Err(Error::Config("split needs at least one range".to_string()));
    }
    let mut ranges = Vec::with_capacity(options.ranges.len());
    for [begin, end] in options.ranges {
        if begin >= end {
            return Err(Error::Config(format!("split range [{}, {}) is empty", begin, end)));
        }
        if options.element_only && end - begin != 1 {
            return Err(Error::Config(format!(
                "element_only needs single-element ranges, got [{}, {})",
                begin, end
            )));
        }
        ranges.push(begin..end);
    }
    Ok((ranges, options.element_only))
}

pub struct SplitVectorCalculator<T> {
    ranges: Vec<Range<usize>>,
    element_only: bool,
    _element: PhantomData<fn() -> T>,
}

impl<T> CalculatorType for SplitVectorCalculator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        let (ranges, element_only) = parse_options(cc.options())?;
        if cc.inputs().len() != 1 || cc.inputs().num_entries_for("") != 1 {
            return Err(Error::Config("split needs one untagged input stream".to_string()));
        }
        if cc.outputs().num_entries_for("") != ranges.len() || cc.outputs().len() != ranges.len() {
            return Err(Error::Config(format!(
                "split has {} ranges but {} outputs",
                ranges.len(),
                cc.outputs().len()
            )));
        }
        cc.set_input("", 0, PacketType::of::<Vec<T>>())?;
        let output = if element_only {
            PacketType::of::<T>()
        } else {
            PacketType::of::<Vec<T>>()
        };
        cc.set_outputs("", output);
        Ok(())
    }

    fn create(options: &NodeOptions) -> Result<Self> {
        let (ranges, element_only) = parse_options(options)?;
        Ok(Self {
            ranges,
            element_only,
            _element: PhantomData,
        })
    }
}

impl<T> Calculator for SplitVectorCalculator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn open(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        cc.set_offset(TimestampDiff(0))
    }

    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let packet = cc.input("", 0)?.clone();
        if packet.is_empty() {
            return Ok(());
        }
        let values = packet.get::<Vec<T>>()?;
        let timestamp = cc.input_timestamp();
        for (index, range) in self.ranges.iter().enumerate() {
            if range.end > values.len() {
                return Err(Error::calculator(
                    cc.node_name(),
                    format!(
                        "range [{}, {}) exceeds vector of {} elements",
                        range.start,
                        range.end,
                        values.len()
                    ),
                ));
            }
            let output = cc.output("", index)?;
            if self.element_only {
                output.add_value(values[range.start].clone(), timestamp)?;
            } else {
                output.add_value(values[range.clone()].to_vec(), timestamp)?;
            }
        }
        Ok(())
    }
}
