//! Clockless (self-clocked) pixel strings: WS2811, UCS1903 and TM1814.
//!
//! The same driver runs on a pulse-train unit or on a serial unit; the
//! transport only decides how the engine is configured.

use alloc::string::{String, ToString};

use embassy_time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::pixel::{ColorOrder, PixelConfig, PixelSource};
use super::{OutputChannel, OutputType, write_common_status};
use crate::config::{merge, write_fields};
use crate::engine::{
    EncodingEngine, FrameFraming, LineRate, PixelEncodingEngine, PulseEngineConfig,
    SerialEncodingEngine, SerialEngineConfig, SerialTranslation,
};
use crate::error::{ConfigError, HardwareError};
use crate::layout::BufferRegion;
use crate::peripheral::{InterruptEvent, PulseTrain, SerialFrameFormat, SerialPort};
use crate::timing::transmission_time;
use crate::translation::{BitTiming, CLOCKLESS_SERIAL_TABLE, PulseTable};

/// Pulse-train clock divider used by every clockless protocol (25 ns ticks).
pub const PULSE_CLOCK_DIVIDER: u8 = 2;
const PULSE_TICK_NS: u32 = 25;

const DEFAULT_CURRENT_LIMIT: u8 = 50;
const MAX_CURRENT_LIMIT: u8 = 63;

/// Waveform and pixel layout of a clockless chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClocklessProtocol {
    pub output_type: OutputType,
    pub timing: BitTiming,
    pub color_order: ColorOrder,
    /// Active level is low, the line idles high
    pub inverted: bool,
    /// Frames start with a constant-current header
    pub current_limit: bool,
}

impl ClocklessProtocol {
    pub const WS2811: Self = Self {
        output_type: OutputType::Ws2811,
        timing: BitTiming {
            period_ns: 1250,
            t0h_ns: 250,
            t1h_ns: 600,
            reset_ns: 300_000,
        },
        color_order: ColorOrder::RGB,
        inverted: false,
        current_limit: false,
    };

    pub const UCS1903: Self = Self {
        output_type: OutputType::Ucs1903,
        timing: BitTiming {
            period_ns: 1250,
            t0h_ns: 250,
            t1h_ns: 1000,
            reset_ns: 24_000,
        },
        color_order: ColorOrder::RGB,
        inverted: false,
        current_limit: false,
    };

    pub const TM1814: Self = Self {
        output_type: OutputType::Tm1814,
        timing: BitTiming {
            period_ns: 1250,
            t0h_ns: 360,
            t1h_ns: 720,
            reset_ns: 200_000,
        },
        color_order: ColorOrder::WRGB,
        inverted: true,
        current_limit: true,
    };

    pub const fn for_type(output_type: OutputType) -> Option<Self> {
        match output_type {
            OutputType::Ws2811 => Some(Self::WS2811),
            OutputType::Ucs1903 => Some(Self::UCS1903),
            OutputType::Tm1814 => Some(Self::TM1814),
            _ => None,
        }
    }

    /// Reset time in microseconds
    pub const fn reset_us(&self) -> u32 {
        self.timing.reset_ns / 1000
    }
}

/// Engine that can carry a clockless waveform.
pub trait ClocklessTransport: EncodingEngine {
    fn begin_protocol(
        &mut self,
        protocol: &ClocklessProtocol,
        min_frame_duration: Duration,
    ) -> Result<(), HardwareError>;
}

impl<P: PulseTrain> ClocklessTransport for PixelEncodingEngine<P> {
    fn begin_protocol(
        &mut self,
        protocol: &ClocklessProtocol,
        min_frame_duration: Duration,
    ) -> Result<(), HardwareError> {
        let table = PulseTable::clockless(&protocol.timing, protocol.inverted, PULSE_TICK_NS);
        self.begin(PulseEngineConfig {
            table,
            clock_divider: PULSE_CLOCK_DIVIDER,
            idle_level: protocol.inverted,
            inter_frame_slots: table.gap_slots(&protocol.timing, PULSE_TICK_NS),
            frame_stop_slots: 1,
            intensity_width: 8,
            min_frame_duration,
        })
    }
}

impl<S: SerialPort> ClocklessTransport for SerialEncodingEngine<S> {
    fn begin_protocol(
        &mut self,
        protocol: &ClocklessProtocol,
        min_frame_duration: Duration,
    ) -> Result<(), HardwareError> {
        // Active-low chips get the same characters on a plain line
        self.begin(SerialEngineConfig {
            translation: SerialTranslation::TwoBit(CLOCKLESS_SERIAL_TABLE),
            format: SerialFrameFormat::SixN1,
            line_rate: LineRate::IntensityBitPeriod(protocol.timing.period_ns),
            invert: !protocol.inverted,
            intensity_width: 8,
            frame: FrameFraming::default(),
            pixel: None,
            min_frame_duration,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CurrentLimit {
    currentlimit: u8,
}

/// Pixel string driver for one clockless chip family.
pub struct ClocklessDriver<E> {
    slot: usize,
    protocol: ClocklessProtocol,
    engine: E,
    config: PixelConfig,
    current_limit: u8,
    source: PixelSource,
    region: BufferRegion,
}

impl<E: ClocklessTransport> ClocklessDriver<E> {
    pub fn new(slot: usize, protocol: ClocklessProtocol, engine: E) -> Self {
        let config = PixelConfig::new(protocol.color_order, protocol.reset_us());
        let header = frame_header(&protocol, DEFAULT_CURRENT_LIMIT);
        Self {
            slot,
            protocol,
            engine,
            source: PixelSource::new(&config, &header),
            config,
            current_limit: DEFAULT_CURRENT_LIMIT,
            region: BufferRegion::EMPTY,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn config(&self) -> &PixelConfig {
        &self.config
    }

    /// Shortest interval between frame starts.
    pub fn min_frame_duration(&self) -> Duration {
        let bits = self.source.intensities_per_frame() as u64 * 8;
        transmission_time(
            bits,
            u64::from(self.protocol.timing.period_ns),
            u64::from(self.config.interframetime),
        )
    }
}

/// Constant-current header: one byte per channel followed by the complements.
fn frame_header(protocol: &ClocklessProtocol, current_limit: u8) -> heapless::Vec<u8, 8> {
    let mut header = heapless::Vec::new();
    if protocol.current_limit {
        let channels = protocol.color_order.channels();
        for _ in 0..channels {
            let _ = header.push(current_limit);
        }
        for _ in 0..channels {
            let _ = header.push(!current_limit);
        }
    }
    header
}

impl<E: ClocklessTransport> OutputChannel for ClocklessDriver<E> {
    fn output_type(&self) -> OutputType {
        self.protocol.output_type
    }

    fn begin(&mut self) -> Result<(), HardwareError> {
        let min_frame_duration = self.min_frame_duration();
        self.engine.begin_protocol(&self.protocol, min_frame_duration)
    }

    fn set_config(&mut self, patch: &Map<String, Value>) -> Result<(), ConfigError> {
        let config = merge(&self.config, patch)?;
        config.validate(self.protocol.color_order.channels())?;

        let mut current_limit = self.current_limit;
        if self.protocol.current_limit {
            current_limit = merge(
                &CurrentLimit {
                    currentlimit: current_limit,
                },
                patch,
            )?
            .currentlimit;
            if !(1..=MAX_CURRENT_LIMIT).contains(&current_limit) {
                return Err(ConfigError::OutOfRange("currentlimit"));
            }
        }

        let header = frame_header(&self.protocol, current_limit);
        self.source = PixelSource::new(&config, &header);
        self.config = config;
        self.current_limit = current_limit;

        let min_frame_duration = self.min_frame_duration();
        self.engine.set_min_frame_duration(min_frame_duration);
        Ok(())
    }

    fn get_config(&self, out: &mut Map<String, Value>) {
        out.insert("type".to_string(), Value::from(self.protocol.output_type.as_str()));
        write_fields(&self.config, out);
        if self.protocol.current_limit {
            out.insert("currentlimit".to_string(), Value::from(self.current_limit));
        }
    }

    fn get_status(&self, out: &mut Map<String, Value>) {
        write_common_status(out, self.protocol.output_type, self.slot, self.region);
        out.insert("pixel_count".to_string(), Value::from(self.config.pixel_count));
        self.engine.write_status(out);
    }

    fn channels_needed(&self) -> usize {
        self.config.channels_needed()
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
