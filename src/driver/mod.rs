//! Output channel drivers with compile-time known protocol variants.
//!
//! Every slot owns exactly one [`OutputDriver`]. The enum keeps all drivers
//! in place without heap allocation; each variant implements
//! [`OutputChannel`].

mod clockless;
mod disabled;
mod gece;
mod pixel;
mod relay;
mod serial;
mod servo;
mod spi;

use core::fmt;

use embassy_time::Instant;
use serde_json::{Map, Value};

pub use clockless::{ClocklessDriver, ClocklessProtocol, ClocklessTransport, PULSE_CLOCK_DIVIDER};
pub use disabled::DisabledDriver;
pub use gece::{GeceConfig, GeceDriver, GeceSource};
pub use pixel::{ColorOrder, PixelConfig, PixelSource};
pub use relay::{RelayChannelConfig, RelayConfig, RelayDriver};
pub use serial::{SerialDriver, SerialOutputConfig, SerialProtocol, SerialSource};
pub use servo::{ServoChannelConfig, ServoConfig, ServoDriver};
pub use spi::{SPI_CLOCK_HZ, SpiChip, SpiPixelDriver};

use crate::board::{Board, SlotDefinition, SlotPeripheral};
use crate::engine::{PixelEncodingEngine, SerialEncodingEngine};
use crate::error::{ConfigError, HardwareError};
use crate::layout::BufferRegion;
use crate::peripheral::InterruptEvent;

const OUTPUT_NAME_WS2811: &str = "WS2811";
const OUTPUT_NAME_GECE: &str = "GECE";
const OUTPUT_NAME_DMX: &str = "DMX";
const OUTPUT_NAME_RENARD: &str = "Renard";
const OUTPUT_NAME_SERIAL: &str = "Serial";
const OUTPUT_NAME_RELAY: &str = "Relay";
const OUTPUT_NAME_SERVO_PCA9685: &str = "Servo_PCA9685";
const OUTPUT_NAME_DISABLED: &str = "Disabled";
const OUTPUT_NAME_UCS1903: &str = "UCS1903";
const OUTPUT_NAME_TM1814: &str = "TM1814";
const OUTPUT_NAME_WS2801: &str = "WS2801";
const OUTPUT_NAME_APA102: &str = "APA102";

const OUTPUT_CODE_WS2811: u8 = 0;
const OUTPUT_CODE_GECE: u8 = 1;
const OUTPUT_CODE_DMX: u8 = 2;
const OUTPUT_CODE_RENARD: u8 = 3;
const OUTPUT_CODE_SERIAL: u8 = 4;
const OUTPUT_CODE_RELAY: u8 = 5;
const OUTPUT_CODE_SERVO_PCA9685: u8 = 6;
const OUTPUT_CODE_DISABLED: u8 = 7;
const OUTPUT_CODE_UCS1903: u8 = 8;
const OUTPUT_CODE_TM1814: u8 = 9;
const OUTPUT_CODE_WS2801: u8 = 10;
const OUTPUT_CODE_APA102: u8 = 11;

/// Protocol selected for a slot, as persisted in configuration documents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputType {
    Ws2811 = OUTPUT_CODE_WS2811,
    Gece = OUTPUT_CODE_GECE,
    Dmx = OUTPUT_CODE_DMX,
    Renard = OUTPUT_CODE_RENARD,
    Serial = OUTPUT_CODE_SERIAL,
    Relay = OUTPUT_CODE_RELAY,
    ServoPca9685 = OUTPUT_CODE_SERVO_PCA9685,
    Disabled = OUTPUT_CODE_DISABLED,
    Ucs1903 = OUTPUT_CODE_UCS1903,
    Tm1814 = OUTPUT_CODE_TM1814,
    Ws2801 = OUTPUT_CODE_WS2801,
    Apa102 = OUTPUT_CODE_APA102,
}

impl OutputType {
    pub const ALL: [Self; 12] = [
        Self::Ws2811,
        Self::Gece,
        Self::Dmx,
        Self::Renard,
        Self::Serial,
        Self::Relay,
        Self::ServoPca9685,
        Self::Disabled,
        Self::Ucs1903,
        Self::Tm1814,
        Self::Ws2801,
        Self::Apa102,
    ];

    pub fn from_raw(value: u8) -> Option<Self> {
        Some(match value {
            OUTPUT_CODE_WS2811 => Self::Ws2811,
            OUTPUT_CODE_GECE => Self::Gece,
            OUTPUT_CODE_DMX => Self::Dmx,
            OUTPUT_CODE_RENARD => Self::Renard,
            OUTPUT_CODE_SERIAL => Self::Serial,
            OUTPUT_CODE_RELAY => Self::Relay,
            OUTPUT_CODE_SERVO_PCA9685 => Self::ServoPca9685,
            OUTPUT_CODE_DISABLED => Self::Disabled,
            OUTPUT_CODE_UCS1903 => Self::Ucs1903,
            OUTPUT_CODE_TM1814 => Self::Tm1814,
            OUTPUT_CODE_WS2801 => Self::Ws2801,
            OUTPUT_CODE_APA102 => Self::Apa102,
            _ => return None,
        })
    }

    /// Parse a document code, rejecting anything that is not a known type.
    pub fn from_code(code: u64) -> Result<Self, ConfigError> {
        u8::try_from(code)
            .ok()
            .and_then(Self::from_raw)
            .ok_or(ConfigError::UnknownType(code))
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ws2811 => OUTPUT_NAME_WS2811,
            Self::Gece => OUTPUT_NAME_GECE,
            Self::Dmx => OUTPUT_NAME_DMX,
            Self::Renard => OUTPUT_NAME_RENARD,
            Self::Serial => OUTPUT_NAME_SERIAL,
            Self::Relay => OUTPUT_NAME_RELAY,
            Self::ServoPca9685 => OUTPUT_NAME_SERVO_PCA9685,
            Self::Disabled => OUTPUT_NAME_DISABLED,
            Self::Ucs1903 => OUTPUT_NAME_UCS1903,
            Self::Tm1814 => OUTPUT_NAME_TM1814,
            Self::Ws2801 => OUTPUT_NAME_WS2801,
            Self::Apa102 => OUTPUT_NAME_APA102,
        }
    }

    pub fn parse_from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|output_type| output_type.as_str() == s)
    }

    /// Whether a slot with `peripheral` can drive this protocol.
    pub const fn supported_on(self, peripheral: SlotPeripheral) -> bool {
        match self {
            Self::Disabled => true,
            Self::Ws2811 | Self::Ucs1903 | Self::Tm1814 => matches!(
                peripheral,
                SlotPeripheral::PulseTrain(_) | SlotPeripheral::Serial(_)
            ),
            Self::Gece | Self::Dmx | Self::Renard | Self::Serial => {
                matches!(peripheral, SlotPeripheral::Serial(_))
            }
            Self::Relay | Self::ServoPca9685 => matches!(peripheral, SlotPeripheral::Relay),
            Self::Ws2801 | Self::Apa102 => matches!(peripheral, SlotPeripheral::Spi),
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform contract of every slot driver.
pub trait OutputChannel {
    fn output_type(&self) -> OutputType;

    /// Acquire and configure the peripheral.
    ///
    /// On error the driver stays in a failed state where `render` does
    /// nothing and the status reports the failure.
    fn begin(&mut self) -> Result<(), HardwareError>;

    /// Merge a protocol settings object into the current settings.
    ///
    /// Invalid settings leave the previous ones in place.
    fn set_config(&mut self, config: &Map<alloc::string::String, Value>) -> Result<(), ConfigError>;

    fn get_config(&self, out: &mut Map<alloc::string::String, Value>);

    fn get_status(&self, out: &mut Map<alloc::string::String, Value>);

    /// Buffer bytes this driver wants per frame
    fn channels_needed(&self) -> usize;

    fn set_buffer_region(&mut self, region: BufferRegion);

    fn buffer_region(&self) -> BufferRegion;

    /// Start a frame from the slot's buffer region if the driver is ready.
    fn render(&mut self, now: Instant, frame: &[u8]);

    /// Interrupt-context entry for the slot's peripheral.
    fn on_interrupt(&mut self, _event: InterruptEvent, _frame: &[u8]) {}

    /// Main-loop check for transfers that completed without an interrupt.
    fn poll(&mut self, _now: Instant) {}

    fn pause(&mut self, paused: bool);

    /// No frame in flight
    fn is_idle(&self) -> bool {
        true
    }
}

/// Driver slot - enum containing all possible protocol drivers
pub enum OutputDriver<B: Board> {
    Disabled(DisabledDriver),
    Dmx(SerialDriver<B::Serial>),
    Renard(SerialDriver<B::Serial>),
    GenericSerial(SerialDriver<B::Serial>),
    Gece(GeceDriver<B::Serial>),
    Relay(RelayDriver<B::RelayPin>),
    ServoPca9685(ServoDriver<B::I2c>),
    Ws2811Pulse(ClocklessDriver<PixelEncodingEngine<B::PulseTrain>>),
    Ws2811Serial(ClocklessDriver<SerialEncodingEngine<B::Serial>>),
    Ucs1903Pulse(ClocklessDriver<PixelEncodingEngine<B::PulseTrain>>),
    Ucs1903Serial(ClocklessDriver<SerialEncodingEngine<B::Serial>>),
    Tm1814Pulse(ClocklessDriver<PixelEncodingEngine<B::PulseTrain>>),
    Tm1814Serial(ClocklessDriver<SerialEncodingEngine<B::Serial>>),
    Ws2801Spi(SpiPixelDriver<B::Spi>),
    Apa102Spi(SpiPixelDriver<B::Spi>),
}

macro_rules! dispatch {
    ($driver:expr, $inner:ident => $body:expr) => {
        match $driver {
            OutputDriver::Disabled($inner) => $body,
            OutputDriver::Dmx($inner) => $body,
            OutputDriver::Renard($inner) => $body,
            OutputDriver::GenericSerial($inner) => $body,
            OutputDriver::Gece($inner) => $body,
            OutputDriver::Relay($inner) => $body,
            OutputDriver::ServoPca9685($inner) => $body,
            OutputDriver::Ws2811Pulse($inner) => $body,
            OutputDriver::Ws2811Serial($inner) => $body,
            OutputDriver::Ucs1903Pulse($inner) => $body,
            OutputDriver::Ucs1903Serial($inner) => $body,
            OutputDriver::Tm1814Pulse($inner) => $body,
            OutputDriver::Tm1814Serial($inner) => $body,
            OutputDriver::Ws2801Spi($inner) => $body,
            OutputDriver::Apa102Spi($inner) => $body,
        }
    };
}

impl<B: Board> OutputDriver<B> {
    pub fn disabled(slot: usize) -> Self {
        Self::Disabled(DisabledDriver::new(slot))
    }

    /// Construct the driver for `output_type` on a slot.
    ///
    /// Fails only when the slot cannot carry the protocol. A peripheral that
    /// cannot be acquired yields a driver in the failed state instead.
    pub fn build(
        output_type: OutputType,
        slot: usize,
        definition: &SlotDefinition,
        board: &mut B,
    ) -> Result<Self, ConfigError> {
        Self::assemble(output_type, slot, definition, Some(board))
    }

    /// Settings a fresh driver of `output_type` reports on this slot.
    ///
    /// No peripheral is acquired.
    pub fn default_settings(
        output_type: OutputType,
        slot: usize,
        definition: &SlotDefinition,
    ) -> Option<Map<alloc::string::String, Value>> {
        let driver = Self::assemble(output_type, slot, definition, None).ok()?;
        let mut settings = Map::new();
        driver.get_config(&mut settings);
        Some(settings)
    }

    fn assemble(
        output_type: OutputType,
        slot: usize,
        definition: &SlotDefinition,
        mut board: Option<&mut B>,
    ) -> Result<Self, ConfigError> {
        let illegal = ConfigError::IllegalSlot { slot, output_type };
        let pin = definition.pin;

        // Without a board every peripheral is reported missing
        macro_rules! acquire {
            ($method:ident($($arg:expr),*)) => {
                match board.as_deref_mut() {
                    Some(board) => board.$method($($arg),*),
                    None => Err(HardwareError::NoPeripheral),
                }
            };
        }

        let driver = match (output_type, definition.peripheral) {
            (OutputType::Disabled, _) => Self::disabled(slot),
            (
                OutputType::Ws2811 | OutputType::Ucs1903 | OutputType::Tm1814,
                SlotPeripheral::PulseTrain(unit),
            ) => {
                let protocol = ClocklessProtocol::for_type(output_type).ok_or(illegal)?;
                let engine = PixelEncodingEngine::new(acquire!(pulse_train(unit, pin)));
                let driver = ClocklessDriver::new(slot, protocol, engine);
                match output_type {
                    OutputType::Ws2811 => Self::Ws2811Pulse(driver),
                    OutputType::Ucs1903 => Self::Ucs1903Pulse(driver),
                    _ => Self::Tm1814Pulse(driver),
                }
            }
            (
                OutputType::Ws2811 | OutputType::Ucs1903 | OutputType::Tm1814,
                SlotPeripheral::Serial(unit),
            ) => {
                let protocol = ClocklessProtocol::for_type(output_type).ok_or(illegal)?;
                let engine = SerialEncodingEngine::new(acquire!(serial_port(unit, pin)));
                let driver = ClocklessDriver::new(slot, protocol, engine);
                match output_type {
                    OutputType::Ws2811 => Self::Ws2811Serial(driver),
                    OutputType::Ucs1903 => Self::Ucs1903Serial(driver),
                    _ => Self::Tm1814Serial(driver),
                }
            }
            (OutputType::Gece, SlotPeripheral::Serial(unit)) => {
                Self::Gece(GeceDriver::new(slot, acquire!(serial_port(unit, pin))))
            }
            (OutputType::Dmx, SlotPeripheral::Serial(unit)) => Self::Dmx(SerialDriver::new(
                slot,
                SerialProtocol::Dmx,
                acquire!(serial_port(unit, pin)),
            )),
            (OutputType::Renard, SlotPeripheral::Serial(unit)) => Self::Renard(SerialDriver::new(
                slot,
                SerialProtocol::Renard,
                acquire!(serial_port(unit, pin)),
            )),
            (OutputType::Serial, SlotPeripheral::Serial(unit)) => {
                Self::GenericSerial(SerialDriver::new(
                    slot,
                    SerialProtocol::Generic,
                    acquire!(serial_port(unit, pin)),
                ))
            }
            (OutputType::Relay, SlotPeripheral::Relay) => {
                Self::Relay(RelayDriver::new(slot, acquire!(relay_pins(slot))))
            }
            (OutputType::ServoPca9685, SlotPeripheral::Relay) => {
                Self::ServoPca9685(ServoDriver::new(slot, acquire!(i2c_bus(slot))))
            }
            (OutputType::Ws2801, SlotPeripheral::Spi) => Self::Ws2801Spi(SpiPixelDriver::new(
                slot,
                SpiChip::Ws2801,
                acquire!(spi_bus(slot)),
            )),
            (OutputType::Apa102, SlotPeripheral::Spi) => Self::Apa102Spi(SpiPixelDriver::new(
                slot,
                SpiChip::Apa102,
                acquire!(spi_bus(slot)),
            )),
            _ => return Err(illegal),
        };
        Ok(driver)
    }
}

impl<B: Board> OutputChannel for OutputDriver<B> {
    fn output_type(&self) -> OutputType {
        dispatch!(self, driver => driver.output_type())
    }

    fn begin(&mut self) -> Result<(), HardwareError> {
        dispatch!(self, driver => driver.begin())
    }

    fn set_config(&mut self, config: &Map<alloc::string::String, Value>) -> Result<(), ConfigError> {
        dispatch!(self, driver => driver.set_config(config))
    }

    fn get_config(&self, out: &mut Map<alloc::string::String, Value>) {
        dispatch!(self, driver => driver.get_config(out));
    }

    fn get_status(&self, out: &mut Map<alloc::string::String, Value>) {
        dispatch!(self, driver => driver.get_status(out));
    }

    fn channels_needed(&self) -> usize {
        dispatch!(self, driver => driver.channels_needed())
    }

    fn set_buffer_region(&mut self, region: BufferRegion) {
        dispatch!(self, driver => driver.set_buffer_region(region));
    }

    fn buffer_region(&self) -> BufferRegion {
        dispatch!(self, driver => driver.buffer_region())
    }

    fn render(&mut self, now: Instant, frame: &[u8]) {
        dispatch!(self, driver => driver.render(now, frame));
    }

    fn on_interrupt(&mut self, event: InterruptEvent, frame: &[u8]) {
        dispatch!(self, driver => driver.on_interrupt(event, frame));
    }

    fn poll(&mut self, now: Instant) {
        dispatch!(self, driver => driver.poll(now));
    }

    fn pause(&mut self, paused: bool) {
        dispatch!(self, driver => driver.pause(paused));
    }

    fn is_idle(&self) -> bool {
        dispatch!(self, driver => driver.is_idle())
    }
}

/// Status fields every driver reports.
pub(crate) fn write_common_status(
    out: &mut Map<alloc::string::String, Value>,
    output_type: OutputType,
    slot: usize,
    region: BufferRegion,
) {
    use alloc::string::ToString;

    out.insert("type".to_string(), Value::from(output_type.as_str()));
    out.insert("slot".to_string(), Value::from(slot));
    out.insert("offset".to_string(), Value::from(region.offset));
    out.insert("length".to_string(), Value::from(region.len));
}

/// Hardware failure recorded in a status document.
pub(crate) fn write_failure(out: &mut Map<alloc::string::String, Value>, failure: Option<HardwareError>) {
    use alloc::string::ToString;

    if let Some(error) = failure {
        out.insert("hardware_error".to_string(), Value::from(error.to_string()));
    }
}
