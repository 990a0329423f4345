//! Relay bank driver.
//!
//! One buffer byte per relay. Digital relays switch on at or above their
//! trigger level; PWM relays follow the value as a duty cycle. Pins are only
//! written when their level changes.

use alloc::string::{String, ToString};
use alloc::vec::Vec as AllocVec;

use embassy_time::{Duration, Instant};
use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{OutputChannel, OutputType, write_common_status, write_failure};
use crate::board::RELAY_COUNT;
use crate::config::{merge, write_fields};
use crate::engine::EngineStats;
use crate::error::{ConfigError, HardwareError};
use crate::layout::BufferRegion;
use crate::timing::FrameTimer;

const DEFAULT_UPDATE_INTERVAL_MS: u32 = 25;
const DEFAULT_TRIGGER: u8 = 128;
const FULL: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayChannelConfig {
    pub en: bool,
    /// Active-low relay
    pub inv: bool,
    pub pwm: bool,
    /// On/off threshold for digital relays
    pub trig: u8,
}

impl Default for RelayChannelConfig {
    fn default() -> Self {
        Self {
            en: true,
            inv: false,
            pwm: false,
            trig: DEFAULT_TRIGGER,
        }
    }
}

impl RelayChannelConfig {
    /// Output level for a buffer value, before polarity.
    fn level(&self, value: u8) -> u8 {
        let level = if self.pwm {
            value
        } else if value >= self.trig {
            FULL
        } else {
            0
        };
        if self.inv { FULL - level } else { level }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Milliseconds between pin updates
    pub updateinterval: u32,
    pub channels: AllocVec<RelayChannelConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            updateinterval: DEFAULT_UPDATE_INTERVAL_MS,
            channels: AllocVec::from([RelayChannelConfig::default(); RELAY_COUNT]),
        }
    }
}

pub struct RelayDriver<P> {
    slot: usize,
    pins: Vec<P, RELAY_COUNT>,
    failure: Option<HardwareError>,
    config: RelayConfig,
    timer: FrameTimer,
    levels: [Option<u8>; RELAY_COUNT],
    paused: bool,
    stats: EngineStats,
    region: BufferRegion,
}

impl<P: OutputPin + SetDutyCycle> RelayDriver<P> {
    pub fn new(slot: usize, pins: Result<Vec<P, RELAY_COUNT>, HardwareError>) -> Self {
        let (pins, failure) = match pins {
            Ok(pins) => (pins, None),
            Err(error) => (Vec::new(), Some(error)),
        };
        let config = RelayConfig::default();
        Self {
            slot,
            pins,
            failure,
            timer: FrameTimer::new(Duration::from_millis(u64::from(config.updateinterval))),
            config,
            levels: [None; RELAY_COUNT],
            paused: false,
            stats: EngineStats::default(),
            region: BufferRegion::EMPTY,
        }
    }

    pub fn pins(&self) -> &[P] {
        &self.pins
    }

    fn write_level(pin: &mut P, channel: &RelayChannelConfig, level: u8) -> Result<(), HardwareError> {
        if channel.pwm {
            pin.set_duty_cycle_fraction(u16::from(level), u16::from(FULL))
                .map_err(|_| HardwareError::Bus)
        } else if level == FULL {
            pin.set_high().map_err(|_| HardwareError::Bus)
        } else {
            pin.set_low().map_err(|_| HardwareError::Bus)
        }
    }
}

impl<P: OutputPin + SetDutyCycle> OutputChannel for RelayDriver<P> {
    fn output_type(&self) -> OutputType {
        OutputType::Relay
    }

    fn begin(&mut self) -> Result<(), HardwareError> {
        if let Some(error) = self.failure {
            return Err(error);
        }
        self.levels = [None; RELAY_COUNT];
        for (index, pin) in self.pins.iter_mut().enumerate() {
            let channel = self.config.channels.get(index).copied().unwrap_or_default();
            let off = channel.level(0);
            if let Err(error) = Self::write_level(pin, &channel, off) {
                self.failure = Some(error);
                return Err(error);
            }
            self.levels[index] = Some(off);
        }
        Ok(())
    }

    fn set_config(&mut self, patch: &Map<String, Value>) -> Result<(), ConfigError> {
        let mut config = merge(&self.config, patch)?;
        if config.updateinterval == 0 {
            return Err(ConfigError::OutOfRange("updateinterval"));
        }
        config.channels.resize(RELAY_COUNT, RelayChannelConfig::default());

        self.timer
            .set_min_duration(Duration::from_millis(u64::from(config.updateinterval)));
        self.config = config;
        // Force a rewrite with the new polarity and mode
        self.levels = [None; RELAY_COUNT];
        Ok(())
    }

    fn get_config(&self, out: &mut Map<String, Value>) {
        out.insert("type".to_string(), Value::from(OutputType::Relay.as_str()));
        write_fields(&self.config, out);
    }

    fn get_status(&self, out: &mut Map<String, Value>) {
        write_common_status(out, OutputType::Relay, self.slot, self.region);
        self.stats.write_status(out);
        write_failure(out, self.failure);
    }

    fn channels_needed(&self) -> usize {
        self.pins.len()
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
        self.timer.mark_start(now);
        self.stats.frames += 1;

        for (index, pin) in self.pins.iter_mut().enumerate() {
            let Some(channel) = self.config.channels.get(index) else {
                break;
            };
            if !channel.en {
                continue;
            }
            let level = channel.level(frame.get(index).copied().unwrap_or(0));
            if self.levels[index] == Some(level) {
                continue;
            }
            match Self::write_level(pin, channel, level) {
                Ok(()) => self.levels[index] = Some(level),
                Err(_) => self.stats.hardware_errors += 1,
            }
        }
    }

    fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }
}
