//! GECE string driver over a serial unit.
//!
//! Every bulb receives a 26-bit packet: 6-bit address, 8-bit brightness and
//! 4 bits each of blue, green and red. Each packet bit becomes one 7N1
//! character; packets are separated by a break.

use alloc::string::{String, ToString};

use embassy_time::{Duration, Instant};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smart_leds::RGB8;

use super::{OutputChannel, OutputType, write_common_status};
use crate::config::{merge, write_fields};
use crate::engine::{
    EncodingEngine, FrameFraming, IntensitySource, LineRate, PixelFraming, SerialEncodingEngine,
    SerialEngineConfig, SerialTranslation,
};
use crate::error::{ConfigError, HardwareError};
use crate::layout::BufferRegion;
use crate::peripheral::{BreakTiming, InterruptEvent, SerialFrameFormat, SerialPort};
use crate::timing::transmission_time;
use crate::translation::GECE_SERIAL_TABLE;

pub const GECE_MAX_PIXELS: u8 = 63;

const PACKET_BITS: u8 = 26;
const BIT_PERIOD_NS: u32 = 30_000;
const MAX_BRIGHTNESS: u32 = 0xCC;
const PACKET_BREAK: BreakTiming = BreakTiming {
    break_bits: 10,
    mark_bits: 3,
};
const FRAME_GAP_US: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeceConfig {
    pub pixel_count: u8,
    /// Percent
    pub brightness: u8,
}

impl Default for GeceConfig {
    fn default() -> Self {
        Self {
            pixel_count: GECE_MAX_PIXELS,
            brightness: 100,
        }
    }
}

/// Yields the packet bits of every bulb, one value (0 or 1) per bit.
#[derive(Debug, Clone)]
pub struct GeceSource {
    pixel_count: usize,
    brightness: u8,
    pixel: usize,
    bit: u8,
    packet: u32,
}

impl GeceSource {
    pub fn new(config: &GeceConfig) -> Self {
        let brightness = MAX_BRIGHTNESS * u32::from(config.brightness.min(100)) / 100;
        Self {
            pixel_count: usize::from(config.pixel_count.min(GECE_MAX_PIXELS)),
            brightness: brightness as u8,
            pixel: 0,
            bit: 0,
            packet: 0,
        }
    }

    /// Packet for bulb `address`.
    pub fn packet(address: usize, brightness: u8, color: RGB8) -> u32 {
        ((address as u32 & 0x3F) << 20)
            | (u32::from(brightness) << 12)
            | (u32::from(color.b >> 4) << 8)
            | (u32::from(color.g >> 4) << 4)
            | u32::from(color.r >> 4)
    }
}

impl IntensitySource for GeceSource {
    fn start_frame(&mut self) {
        self.pixel = 0;
        self.bit = 0;
    }

    fn next_intensity(&mut self, frame: &[u8]) -> Option<u8> {
        if self.bit == 0 {
            if self.pixel >= self.pixel_count {
                return None;
            }
            let base = self.pixel * 3;
            let channel = |offset: usize| frame.get(base + offset).copied().unwrap_or(0);
            let color = RGB8::new(channel(0), channel(1), channel(2));
            self.packet = Self::packet(self.pixel, self.brightness, color);
        }

        let value = (self.packet >> (PACKET_BITS - 1 - self.bit)) & 1;
        self.bit += 1;
        if self.bit == PACKET_BITS {
            self.bit = 0;
            self.pixel += 1;
        }
        Some(value as u8)
    }
}

pub struct GeceDriver<S: SerialPort> {
    slot: usize,
    engine: SerialEncodingEngine<S>,
    config: GeceConfig,
    source: GeceSource,
    region: BufferRegion,
}

impl<S: SerialPort> GeceDriver<S> {
    pub fn new(slot: usize, port: Result<S, HardwareError>) -> Self {
        let config = GeceConfig::default();
        Self {
            slot,
            engine: SerialEncodingEngine::new(port),
            source: GeceSource::new(&config),
            config,
            region: BufferRegion::EMPTY,
        }
    }

    pub fn engine(&self) -> &SerialEncodingEngine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SerialEncodingEngine<S> {
        &mut self.engine
    }

    fn min_frame_duration(&self) -> Duration {
        let line_bit_ns = u64::from(BIT_PERIOD_NS / SerialFrameFormat::SevenN1.frame_bits());
        let break_bits = u64::from(PACKET_BREAK.break_bits + PACKET_BREAK.mark_bits);
        let character_bits = u64::from(SerialFrameFormat::SevenN1.frame_bits());
        let bits_per_pixel = u64::from(PACKET_BITS) * character_bits + break_bits;
        transmission_time(
            u64::from(self.config.pixel_count) * bits_per_pixel,
            line_bit_ns,
            FRAME_GAP_US,
        )
    }
}

impl<S: SerialPort> OutputChannel for GeceDriver<S> {
    fn output_type(&self) -> OutputType {
        OutputType::Gece
    }

    fn begin(&mut self) -> Result<(), HardwareError> {
        let pixel = PixelFraming {
            intensities_per_pixel: u16::from(PACKET_BITS),
            break_before: Some(PACKET_BREAK),
            prepend: Vec::new(),
            append: Vec::new(),
        };
        let min_frame_duration = self.min_frame_duration();
        self.engine.begin(SerialEngineConfig {
            translation: SerialTranslation::OneBit(GECE_SERIAL_TABLE),
            format: SerialFrameFormat::SevenN1,
            line_rate: LineRate::IntensityBitPeriod(BIT_PERIOD_NS),
            invert: false,
            intensity_width: 1,
            frame: FrameFraming::default(),
            pixel: Some(pixel),
            min_frame_duration,
        })
    }

    fn set_config(&mut self, patch: &Map<String, Value>) -> Result<(), ConfigError> {
        let config = merge(&self.config, patch)?;
        if config.pixel_count > GECE_MAX_PIXELS {
            return Err(ConfigError::OutOfRange("pixel_count"));
        }
        if config.brightness > 100 {
            return Err(ConfigError::OutOfRange("brightness"));
        }
        self.source = GeceSource::new(&config);
        self.config = config;
        let min_frame_duration = self.min_frame_duration();
        self.engine.set_min_frame_duration(min_frame_duration);
        Ok(())
    }

    fn get_config(&self, out: &mut Map<String, Value>) {
        out.insert("type".to_string(), Value::from(OutputType::Gece.as_str()));
        write_fields(&self.config, out);
    }

    fn get_status(&self, out: &mut Map<String, Value>) {
        write_common_status(out, OutputType::Gece, self.slot, self.region);
        self.engine.write_status(out);
    }

    fn channels_needed(&self) -> usize {
        usize::from(self.config.pixel_count) * 3
    }

    fn set_buffer_region(&mut self, region: BufferRegion) {
        self.region = region;
    }

    fn buffer_region(&self) -> BufferRegion {
        self.region
    }

    fn render(&mut self, now: Instant, frame: &[u8]) {
        self.engine.render(now, &mut self.source, frame);
    }

    fn on_interrupt(&mut self, event: InterruptEvent, frame: &[u8]) {
        self.engine.on_interrupt(event, &mut self.source, frame);
    }

    fn poll(&mut self, now: Instant) {
        self.engine.poll(now);
    }

    fn pause(&mut self, paused: bool) {
        self.engine.pause(paused);
    }

    fn is_idle(&self) -> bool {
        !self.engine.state().is_busy()
    }
}
