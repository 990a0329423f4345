use alloc::string::String;

use embassy_time::Instant;
use serde_json::{Map, Value};

use super::{OutputChannel, OutputType, write_common_status};
use crate::error::{ConfigError, HardwareError};
use crate::layout::BufferRegion;

/// Placeholder driver of an unused slot. Needs no buffer and sends nothing.
#[derive(Debug, Clone)]
pub struct DisabledDriver {
    slot: usize,
    region: BufferRegion,
}

impl DisabledDriver {
    pub const fn new(slot: usize) -> Self {
        Self {
            slot,
            region: BufferRegion::EMPTY,
        }
    }
}

impl OutputChannel for DisabledDriver {
    fn output_type(&self) -> OutputType {
        OutputType::Disabled
    }

    fn begin(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn set_config(&mut self, _config: &Map<String, Value>) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_config(&self, out: &mut Map<String, Value>) {
        use alloc::string::ToString;
        out.insert("type".to_string(), Value::from(OutputType::Disabled.as_str()));
    }

    fn get_status(&self, out: &mut Map<String, Value>) {
        write_common_status(out, OutputType::Disabled, self.slot, self.region);
    }

    fn channels_needed(&self) -> usize {
        0
    }

    fn set_buffer_region(&mut self, region: BufferRegion) {
        self.region = region;
    }

    fn buffer_region(&self) -> BufferRegion {
        self.region
    }

    fn render(&mut self, _now: Instant, _frame: &[u8]) {}

    fn pause(&mut self, _paused: bool) {}
}
