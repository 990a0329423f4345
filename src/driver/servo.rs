//! PCA9685 servo controller driver.
//!
//! Sixteen 50 Hz PWM channels over I2C. Each enabled channel maps its
//! buffer value linearly onto a pulse width between `min` and `max`
//! microseconds.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use embassy_time::{Duration, Instant};
use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{OutputChannel, OutputType, write_common_status, write_failure};
use crate::config::{merge, write_fields};
use crate::engine::EngineStats;
use crate::error::{ConfigError, HardwareError};
use crate::layout::BufferRegion;
use crate::timing::FrameTimer;

pub const SERVO_CHANNELS: usize = 16;
pub const PCA9685_ADDRESS: u8 = 0x40;

const REG_MODE1: u8 = 0x00;
const REG_MODE2: u8 = 0x01;
const REG_LED0_ON_L: u8 = 0x06;
const REG_PRESCALE: u8 = 0xFE;

const MODE1_SLEEP: u8 = 0x10;
const MODE1_AUTO_INCREMENT: u8 = 0x20;
const MODE2_TOTEM_POLE: u8 = 0x04;

const OSCILLATOR_HZ: u32 = 25_000_000;
const PWM_STEPS: u32 = 4096;
const SERVO_FREQUENCY_HZ: u32 = 50;
const SERVO_PERIOD_US: u32 = 1_000_000 / SERVO_FREQUENCY_HZ;

const DEFAULT_MIN_US: u16 = 650;
const DEFAULT_MAX_US: u16 = 2350;

/// Prescaler for the servo frequency, rounded to nearest.
pub const fn prescale() -> u8 {
    let divisor = PWM_STEPS * SERVO_FREQUENCY_HZ;
    ((OSCILLATOR_HZ + divisor / 2) / divisor - 1) as u8
}

/// PWM off-count for a pulse width in microseconds.
pub const fn pulse_ticks(us: u32) -> u16 {
    (us * PWM_STEPS / SERVO_PERIOD_US) as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoChannelConfig {
    pub en: bool,
    /// Pulse width at value 0, microseconds
    pub min: u16,
    /// Pulse width at full value, microseconds
    pub max: u16,
    pub inv: bool,
    /// Read two big-endian buffer bytes instead of one
    pub is16bit: bool,
}

impl Default for ServoChannelConfig {
    fn default() -> Self {
        Self {
            en: true,
            min: DEFAULT_MIN_US,
            max: DEFAULT_MAX_US,
            inv: false,
            is16bit: false,
        }
    }
}

impl ServoChannelConfig {
    const fn width(&self) -> usize {
        if self.is16bit { 2 } else { 1 }
    }

    /// Pulse width for a raw buffer value.
    pub fn pulse_us(&self, value: u32) -> u32 {
        let full: u32 = if self.is16bit { 0xFFFF } else { 0xFF };
        let value = value.min(full);
        let value = if self.inv { full - value } else { value };
        let span = u32::from(self.max.saturating_sub(self.min));
        u32::from(self.min) + span * value / full
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoConfig {
    /// Milliseconds between register updates
    pub updateinterval: u32,
    pub channels: Vec<ServoChannelConfig>,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            updateinterval: SERVO_PERIOD_US / 1000,
            channels: Vec::from([ServoChannelConfig::default(); SERVO_CHANNELS]),
        }
    }
}

pub struct ServoDriver<I> {
    slot: usize,
    bus: Option<I>,
    failure: Option<HardwareError>,
    config: ServoConfig,
    timer: FrameTimer,
    ticks: [Option<u16>; SERVO_CHANNELS],
    paused: bool,
    stats: EngineStats,
    region: BufferRegion,
}

impl<I: I2c> ServoDriver<I> {
    pub fn new(slot: usize, bus: Result<I, HardwareError>) -> Self {
        let (bus, failure) = match bus {
            Ok(bus) => (Some(bus), None),
            Err(error) => (None, Some(error)),
        };
        let config = ServoConfig::default();
        Self {
            slot,
            bus,
            failure,
            timer: FrameTimer::new(Duration::from_millis(u64::from(config.updateinterval))),
            config,
            ticks: [None; SERVO_CHANNELS],
            paused: false,
            stats: EngineStats::default(),
            region: BufferRegion::EMPTY,
        }
    }

    pub fn bus(&self) -> Option<&I> {
        self.bus.as_ref()
    }

    fn write_register(bus: &mut I, register: u8, value: u8) -> Result<(), HardwareError> {
        bus.write(PCA9685_ADDRESS, &[register, value])
            .map_err(|_| HardwareError::Bus)
    }

    fn configure(bus: &mut I) -> Result<(), HardwareError> {
        // Prescale can only be written while the oscillator sleeps
        Self::write_register(bus, REG_MODE1, MODE1_SLEEP)?;
        Self::write_register(bus, REG_PRESCALE, prescale())?;
        Self::write_register(bus, REG_MODE1, MODE1_AUTO_INCREMENT)?;
        Self::write_register(bus, REG_MODE2, MODE2_TOTEM_POLE)
    }
}

impl<I: I2c> OutputChannel for ServoDriver<I> {
    fn output_type(&self) -> OutputType {
        OutputType::ServoPca9685
    }

    fn begin(&mut self) -> Result<(), HardwareError> {
        let Some(bus) = self.bus.as_mut() else {
            return Err(self.failure.unwrap_or(HardwareError::NoPeripheral));
        };
        if let Err(error) = Self::configure(bus) {
            self.failure = Some(error);
            return Err(error);
        }
        self.failure = None;
        self.ticks = [None; SERVO_CHANNELS];
        Ok(())
    }

    fn set_config(&mut self, patch: &Map<String, Value>) -> Result<(), ConfigError> {
        let mut config = merge(&self.config, patch)?;
        if config.updateinterval == 0 {
            return Err(ConfigError::OutOfRange("updateinterval"));
        }
        config
            .channels
            .resize(SERVO_CHANNELS, ServoChannelConfig::default());
        if config.channels.iter().any(|channel| channel.min > channel.max) {
            return Err(ConfigError::OutOfRange("min"));
        }
        if config
            .channels
            .iter()
            .any(|channel| u32::from(channel.max) > SERVO_PERIOD_US)
        {
            return Err(ConfigError::OutOfRange("max"));
        }

        self.timer
            .set_min_duration(Duration::from_millis(u64::from(config.updateinterval)));
        self.config = config;
        self.ticks = [None; SERVO_CHANNELS];
        Ok(())
    }

    fn get_config(&self, out: &mut Map<String, Value>) {
        out.insert(
            "type".to_string(),
            Value::from(OutputType::ServoPca9685.as_str()),
        );
        write_fields(&self.config, out);
    }

    fn get_status(&self, out: &mut Map<String, Value>) {
        write_common_status(out, OutputType::ServoPca9685, self.slot, self.region);
        self.stats.write_status(out);
        write_failure(out, self.failure);
    }

    fn channels_needed(&self) -> usize {
        self.config.channels.iter().map(ServoChannelConfig::width).sum()
    }

    fn set_buffer_region(&mut self, region: BufferRegion) {
        self.region = region;
    }

    fn buffer_region(&self) -> BufferRegion {
        self.region
    }

    fn render(&mut self, now: Instant, frame: &[u8]) {
        if self.failure.is_some() || self.paused {
            return;
        }
        if !self.timer.can_start(now) {
            self.stats.dropped_frames += 1;
            return;
        }
        let Some(bus) = self.bus.as_mut() else {
            return;
        };
        self.timer.mark_start(now);
        self.stats.frames += 1;

        let byte = |index: usize| u32::from(frame.get(index).copied().unwrap_or(0));
        let mut offset = 0;
        for (index, channel) in self.config.channels.iter().enumerate() {
            let value = if channel.is16bit {
                (byte(offset) << 8) | byte(offset + 1)
            } else {
                byte(offset)
            };
            offset += channel.width();
            if !channel.en {
                continue;
            }

            let ticks = pulse_ticks(channel.pulse_us(value));
            if self.ticks[index] == Some(ticks) {
                continue;
            }
            let [off_low, off_high] = ticks.to_le_bytes();
            let register = REG_LED0_ON_L + 4 * index as u8;
            match bus.write(PCA9685_ADDRESS, &[register, 0, 0, off_low, off_high]) {
                Ok(()) => self.ticks[index] = Some(ticks),
                Err(_) => self.stats.hardware_errors += 1,
            }
        }
    }

    fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }
}
