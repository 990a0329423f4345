//! Byte-oriented serial outputs: DMX512, Renard and generic serial.
//!
//! Buffer values go out unchanged apart from Renard escaping; the protocols
//! differ only in line speed and the bytes framing each frame.

use alloc::string::{String, ToString};

use embassy_time::{Duration, Instant};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{OutputChannel, OutputType, write_common_status};
use crate::config::{merge, write_fields};
use crate::engine::{
    EncodingEngine, FRAME_FRAMING_CAPACITY, FrameFraming, IntensitySource, LineRate,
    SerialEncodingEngine, SerialEngineConfig, SerialTranslation,
};
use crate::error::{ConfigError, HardwareError};
use crate::layout::BufferRegion;
use crate::peripheral::{BreakTiming, InterruptEvent, SerialFrameFormat, SerialPort};
use crate::timing::transmission_time;

pub const DMX_MAX_CHANNELS: u16 = 512;
const DMX_BAUD_RATE: u32 = 250_000;
const DMX_START_CODE: u8 = 0x00;
const DMX_BREAK: BreakTiming = BreakTiming {
    break_bits: 23,
    mark_bits: 3,
};

const RENARD_SYNC: u8 = 0x7E;
const RENARD_COMMAND: u8 = 0x80;
const RENARD_ESCAPE: u8 = 0x7F;
const RENARD_ESCAPE_OFFSET: u8 = 0x4E;

const DEFAULT_BAUD_RATE: u32 = 57_600;
const DEFAULT_CHANNELS: u16 = 64;

/// Framing family of a serial output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialProtocol {
    Dmx,
    Renard,
    Generic,
}

impl SerialProtocol {
    pub const fn output_type(self) -> OutputType {
        match self {
            Self::Dmx => OutputType::Dmx,
            Self::Renard => OutputType::Renard,
            Self::Generic => OutputType::Serial,
        }
    }

    const fn format(self) -> SerialFrameFormat {
        match self {
            Self::Dmx => SerialFrameFormat::EightN2,
            Self::Renard | Self::Generic => SerialFrameFormat::EightN1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialOutputConfig {
    pub num_chan: u16,
    pub baudrate: u32,
    /// Sent before every frame (generic serial only)
    pub gen_ser_hdr: String,
    /// Sent after every frame (generic serial only)
    pub gen_ser_ftr: String,
}

impl SerialOutputConfig {
    fn new(protocol: SerialProtocol) -> Self {
        let (num_chan, baudrate) = match protocol {
            SerialProtocol::Dmx => (DMX_MAX_CHANNELS, DMX_BAUD_RATE),
            SerialProtocol::Renard | SerialProtocol::Generic => (DEFAULT_CHANNELS, DEFAULT_BAUD_RATE),
        };
        Self {
            num_chan,
            baudrate,
            gen_ser_hdr: String::new(),
            gen_ser_ftr: String::new(),
        }
    }
}

/// Buffer cursor with optional Renard escaping.
#[derive(Debug, Clone)]
pub struct SerialSource {
    escape: bool,
    count: usize,
    position: usize,
    pending: Option<u8>,
}

impl SerialSource {
    pub const fn new(count: usize, escape: bool) -> Self {
        Self {
            escape,
            count,
            position: 0,
            pending: None,
        }
    }
}

impl IntensitySource for SerialSource {
    fn start_frame(&mut self) {
        self.position = 0;
        self.pending = None;
    }

    fn next_intensity(&mut self, frame: &[u8]) -> Option<u8> {
        if let Some(value) = self.pending.take() {
            return Some(value);
        }
        if self.position >= self.count {
            return None;
        }
        let value = frame.get(self.position).copied().unwrap_or(0);
        self.position += 1;

        // 0x7D..=0x7F are reserved on a Renard line
        if self.escape && (0x7D..=RENARD_ESCAPE).contains(&value) {
            self.pending = Some(value - RENARD_ESCAPE_OFFSET);
            return Some(RENARD_ESCAPE);
        }
        Some(value)
    }
}

pub struct SerialDriver<S: SerialPort> {
    slot: usize,
    protocol: SerialProtocol,
    engine: SerialEncodingEngine<S>,
    config: SerialOutputConfig,
    source: SerialSource,
    region: BufferRegion,
}

impl<S: SerialPort> SerialDriver<S> {
    pub fn new(slot: usize, protocol: SerialProtocol, port: Result<S, HardwareError>) -> Self {
        let config = SerialOutputConfig::new(protocol);
        Self {
            slot,
            protocol,
            engine: SerialEncodingEngine::new(port),
            source: SerialSource::new(
                usize::from(config.num_chan),
                protocol == SerialProtocol::Renard,
            ),
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

    fn framing(&self) -> Result<FrameFraming, ConfigError> {
        let mut framing = FrameFraming::default();
        match self.protocol {
            SerialProtocol::Dmx => {
                framing.frame_break = Some(DMX_BREAK);
                let _ = framing.prepend.push(DMX_START_CODE);
            }
            SerialProtocol::Renard => {
                let _ = framing.prepend.extend_from_slice(&[RENARD_SYNC, RENARD_COMMAND]);
            }
            SerialProtocol::Generic => {
                framing.prepend = framing_bytes(&self.config.gen_ser_hdr, "gen_ser_hdr")?;
                framing.append = framing_bytes(&self.config.gen_ser_ftr, "gen_ser_ftr")?;
            }
        }
        Ok(framing)
    }

    fn min_frame_duration(&self, framing: &FrameFraming) -> Duration {
        let bytes = framing.prepend.len() + usize::from(self.config.num_chan) + framing.append.len();
        let mut bits = bytes as u64 * u64::from(self.protocol.format().frame_bits());
        if let Some(timing) = framing.frame_break {
            bits += u64::from(timing.break_bits + timing.mark_bits);
        }
        let bit_ns = 1_000_000_000 / u64::from(self.config.baudrate.max(1));
        transmission_time(bits, bit_ns, 0)
    }
}

fn framing_bytes(
    text: &str,
    key: &'static str,
) -> Result<Vec<u8, FRAME_FRAMING_CAPACITY>, ConfigError> {
    Vec::from_slice(text.as_bytes()).map_err(|()| ConfigError::OutOfRange(key))
}

impl<S: SerialPort> OutputChannel for SerialDriver<S> {
    fn output_type(&self) -> OutputType {
        self.protocol.output_type()
    }

    fn begin(&mut self) -> Result<(), HardwareError> {
        let Ok(framing) = self.framing() else {
            return Err(HardwareError::ConfigurationRejected);
        };
        let min_frame_duration = self.min_frame_duration(&framing);
        self.engine.begin(SerialEngineConfig {
            translation: SerialTranslation::Raw,
            format: self.protocol.format(),
            line_rate: LineRate::Baud(self.config.baudrate),
            invert: false,
            intensity_width: 8,
            frame: framing,
            pixel: None,
            min_frame_duration,
        })
    }

    fn set_config(&mut self, patch: &Map<String, Value>) -> Result<(), ConfigError> {
        let mut config = merge(&self.config, patch)?;
        match self.protocol {
            SerialProtocol::Dmx => {
                if config.num_chan > DMX_MAX_CHANNELS {
                    return Err(ConfigError::OutOfRange("num_chan"));
                }
                config.baudrate = DMX_BAUD_RATE;
            }
            SerialProtocol::Renard | SerialProtocol::Generic => {
                if config.baudrate == 0 {
                    return Err(ConfigError::OutOfRange("baudrate"));
                }
            }
        }
        if self.protocol != SerialProtocol::Generic {
            config.gen_ser_hdr.clear();
            config.gen_ser_ftr.clear();
        }
        framing_bytes(&config.gen_ser_hdr, "gen_ser_hdr")?;
        framing_bytes(&config.gen_ser_ftr, "gen_ser_ftr")?;

        let framing_changed = config.baudrate != self.config.baudrate
            || config.gen_ser_hdr != self.config.gen_ser_hdr
            || config.gen_ser_ftr != self.config.gen_ser_ftr;
        self.source = SerialSource::new(
            usize::from(config.num_chan),
            self.protocol == SerialProtocol::Renard,
        );
        self.config = config;

        // Line speed and framing live in the engine configuration
        if framing_changed && self.engine.config().is_some() {
            if let Err(error) = self.begin() {
                output_log!("slot {}: serial reconfiguration failed: {}", self.slot, error);
            }
        } else if let Ok(framing) = self.framing() {
            let min_frame_duration = self.min_frame_duration(&framing);
            self.engine.set_min_frame_duration(min_frame_duration);
        }
        Ok(())
    }

    fn get_config(&self, out: &mut Map<String, Value>) {
        out.insert(
            "type".to_string(),
            Value::from(self.protocol.output_type().as_str()),
        );
        write_fields(&self.config, out);
    }

    fn get_status(&self, out: &mut Map<String, Value>) {
        write_common_status(out, self.protocol.output_type(), self.slot, self.region);
        out.insert("baudrate".to_string(), Value::from(self.config.baudrate));
        self.engine.write_status(out);
    }

    fn channels_needed(&self) -> usize {
        usize::from(self.config.num_chan)
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
