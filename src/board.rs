//! Board description and peripheral provisioning.
//!
//! What each slot can drive is data: a table of [`SlotDefinition`]s handed to
//! the manager. The [`Board`] trait hands out peripheral handles when a driver
//! is constructed; a handle is released again by dropping the driver.

use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use embedded_hal::pwm::SetDutyCycle;
use embedded_hal::spi::SpiBus;
use heapless::Vec;

use crate::error::HardwareError;
use crate::peripheral::{PulseTrain, SerialPort};

/// Most relays a single relay slot switches.
pub const RELAY_COUNT: usize = 8;

/// Peripheral wired to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPeripheral {
    /// Pulse-train unit with the given index
    PulseTrain(u8),
    /// Serial unit with the given index
    Serial(u8),
    /// Clock + data SPI bus
    Spi,
    /// Relay bank; also carries the I2C bus for servo boards
    Relay,
    /// Nothing attached
    None,
}

/// One physical output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDefinition {
    pub pin: Option<u8>,
    pub peripheral: SlotPeripheral,
}

impl SlotDefinition {
    pub const fn pulse_train(pin: u8, unit: u8) -> Self {
        Self {
            pin: Some(pin),
            peripheral: SlotPeripheral::PulseTrain(unit),
        }
    }

    pub const fn serial(pin: u8, unit: u8) -> Self {
        Self {
            pin: Some(pin),
            peripheral: SlotPeripheral::Serial(unit),
        }
    }

    pub const fn spi(pin: u8) -> Self {
        Self {
            pin: Some(pin),
            peripheral: SlotPeripheral::Spi,
        }
    }

    pub const fn relay() -> Self {
        Self {
            pin: None,
            peripheral: SlotPeripheral::Relay,
        }
    }

    pub const fn unused() -> Self {
        Self {
            pin: None,
            peripheral: SlotPeripheral::None,
        }
    }
}

/// Peripheral provider of a concrete board.
pub trait Board {
    type PulseTrain: PulseTrain;
    type Serial: SerialPort;
    type Spi: SpiBus<u8>;
    type I2c: I2c;
    type RelayPin: OutputPin + SetDutyCycle;

    fn pulse_train(&mut self, unit: u8, pin: Option<u8>)
    -> Result<Self::PulseTrain, HardwareError>;

    fn serial_port(&mut self, unit: u8, pin: Option<u8>) -> Result<Self::Serial, HardwareError>;

    fn spi_bus(&mut self, slot: usize) -> Result<Self::Spi, HardwareError>;

    fn i2c_bus(&mut self, slot: usize) -> Result<Self::I2c, HardwareError>;

    /// Output pins of the relay bank on `slot`, relay 0 first
    fn relay_pins(&mut self, slot: usize) -> Result<Vec<Self::RelayPin, RELAY_COUNT>, HardwareError>;
}
