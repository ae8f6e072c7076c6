//! Calculators used only by the integration tests

use calcgraph::{
    Calculator, CalculatorContext, CalculatorContract, CalculatorRegistry, CalculatorType, Error,
    NodeOptions, PacketType, Result, Timestamp, TimestampDiff,
};

pub fn register_all(registry: &mut CalculatorRegistry) {
    registry.register::<IntSourceCalculator>("IntSourceCalculator").unwrap();
    registry.register::<FailOnCalculator>("FailOnCalculator").unwrap();
    registry.register::<DropAllCalculator>("DropAllCalculator").unwrap();
    registry.register::<IntToStringCalculator>("IntToStringCalculator").unwrap();
    registry.register::<BoundSettledCalculator>("BoundSettledCalculator").unwrap();
    registry.register::<AddOffsetCalculator>("AddOffsetCalculator").unwrap();
}

/// Source emitting `0..count` as i64 at timestamps `0..count`.
/// Options: `count` (default 10).
pub struct IntSourceCalculator {
    next: i64,
    count: i64,
}

impl CalculatorType for IntSourceCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        cc.set_outputs("", PacketType::of::<i64>());
        Ok(())
    }

    fn create(options: &NodeOptions) -> Result<Self> {
        Ok(Self {
            next: 0,
            count: options.get_or("count", 10)?,
        })
    }
}

impl Calculator for IntSourceCalculator {
    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        if self.next >= self.count {
            return Err(Error::Stop);
        }
        let value = self.next;
        cc.output("", 0)?.add_value(value, Timestamp::new(value))?;
        self.next += 1;
        Ok(())
    }
}

/// Forwards i64 packets; fails on the value given as option `fail_on`.
pub struct FailOnCalculator {
    fail_on: i64,
}

impl CalculatorType for FailOnCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        cc.set_all_streams(PacketType::of::<i64>());
        Ok(())
    }

    fn create(options: &NodeOptions) -> Result<Self> {
        Ok(Self {
            fail_on: options.get_or("fail_on", -1)?,
        })
    }
}

impl Calculator for FailOnCalculator {
    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let value = *cc.input("", 0)?.get::<i64>()?;
        if value == self.fail_on {
            return Err(Error::calculator(cc.node_name(), format!("refusing {}", value)));
        }
        let timestamp = cc.input_timestamp();
        cc.output("", 0)?.add_value(value, timestamp)
    }
}

/// Consumes everything and emits nothing, but keeps its output bound in
/// step with its input.
pub struct DropAllCalculator;

impl CalculatorType for DropAllCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        cc.set_all_streams(PacketType::Any);
        Ok(())
    }

    fn create(_options: &NodeOptions) -> Result<Self> {
        Ok(DropAllCalculator)
    }
}

impl Calculator for DropAllCalculator {
    fn open(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        cc.set_offset(TimestampDiff(0))
    }

    fn process(&mut self, _cc: &mut CalculatorContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Typed converter: i64 in, String out.
pub struct IntToStringCalculator;

impl CalculatorType for IntToStringCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        cc.set_input("", 0, PacketType::of::<i64>())?;
        cc.set_output("", 0, PacketType::of::<String>())
    }

    fn create(_options: &NodeOptions) -> Result<Self> {
        Ok(IntToStringCalculator)
    }
}

impl Calculator for IntToStringCalculator {
    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let value = *cc.input("", 0)?.get::<i64>()?;
        let timestamp = cc.input_timestamp();
        cc.output("", 0)?.add_value(value.to_string(), timestamp)
    }
}

/// Runs on settled timestamps even without packets and reports each one
/// as an i64 timestamp value on its output.
pub struct BoundSettledCalculator;

impl CalculatorType for BoundSettledCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        cc.set_inputs("", PacketType::Any);
        cc.set_outputs("", PacketType::of::<i64>());
        cc.set_process_timestamp_bounds(true);
        Ok(())
    }

    fn create(_options: &NodeOptions) -> Result<Self> {
        Ok(BoundSettledCalculator)
    }
}

impl Calculator for BoundSettledCalculator {
    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let timestamp = cc.input_timestamp();
        if !timestamp.is_range_value() {
            return Ok(());
        }
        cc.output("", 0)?.add_value(timestamp.value(), timestamp)
    }
}

/// Emits each i64 input at `timestamp + offset` (option `offset`, default
/// 1) and declares that offset in `open`.
pub struct AddOffsetCalculator {
    offset: i64,
}

impl CalculatorType for AddOffsetCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        cc.set_all_streams(PacketType::of::<i64>());
        Ok(())
    }

    fn create(options: &NodeOptions) -> Result<Self> {
        Ok(Self {
            offset: options.get_or("offset", 1)?,
        })
    }
}

impl Calculator for AddOffsetCalculator {
    fn open(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        cc.set_offset(TimestampDiff(self.offset))
    }

    fn process(&mut self, cc: &mut CalculatorContext<'_>) -> Result<()> {
        let value = *cc.input("", 0)?.get::<i64>()?;
        let timestamp = cc.input_timestamp() + TimestampDiff(self.offset);
        cc.output("", 0)?.add_value(value, timestamp)
    }
}
