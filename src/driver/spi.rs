//! Clocked pixel strings on an SPI bus: WS2801 and APA102.
//!
//! The whole frame is staged in a buffer sized at configuration time and
//! handed to the bus in one write; `render` does not wait for it to drain.
//! The transfer is complete on a `TransmitEnd` interrupt from the board, or
//! once its wire time at [`SPI_CLOCK_HZ`] has passed.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use embassy_time::{Duration, Instant};
use embedded_hal::spi::SpiBus;
use serde_json::{Map, Value};

use super::pixel::{ColorOrder, PixelConfig, PixelSource};
use super::{OutputChannel, OutputType, write_common_status, write_failure};
use crate::config::{merge, write_fields};
use crate::engine::{EngineStats, IntensitySource, TransmissionState};
use crate::error::{ConfigError, HardwareError};
use crate::gamma::GammaTable;
use crate::layout::BufferRegion;
use crate::peripheral::InterruptEvent;
use crate::timing::{FrameTimer, transmission_time};

const APA102_START_FRAME: [u8; 4] = [0x00; 4];
const APA102_PIXEL_MARKER: u8 = 0xE0;
const APA102_MAX_BRIGHTNESS: u32 = 0x1F;
const WS2801_LATCH_US: u32 = 500;

/// Bus clock assumed when estimating how long a transfer takes.
pub const SPI_CLOCK_HZ: u64 = 1_000_000;

/// SPI pixel chip family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiChip {
    Ws2801,
    Apa102,
}

impl SpiChip {
    pub const fn output_type(self) -> OutputType {
        match self {
            Self::Ws2801 => OutputType::Ws2801,
            Self::Apa102 => OutputType::Apa102,
        }
    }

    const fn default_order(self) -> ColorOrder {
        match self {
            Self::Ws2801 => ColorOrder::RGB,
            Self::Apa102 => ColorOrder::BGR,
        }
    }

    const fn default_interframe_us(self) -> u32 {
        match self {
            Self::Ws2801 => WS2801_LATCH_US,
            Self::Apa102 => 0,
        }
    }
}

pub struct SpiPixelDriver<S> {
    slot: usize,
    chip: SpiChip,
    bus: Option<S>,
    failure: Option<HardwareError>,
    config: PixelConfig,
    source: PixelSource,
    staging: Vec<u8>,
    timer: FrameTimer,
    state: TransmissionState,
    transfer_end: Instant,
    stats: EngineStats,
    paused: bool,
    region: BufferRegion,
}

impl<S: SpiBus<u8>> SpiPixelDriver<S> {
    pub fn new(slot: usize, chip: SpiChip, bus: Result<S, HardwareError>) -> Self {
        let (bus, failure) = match bus {
            Ok(bus) => (Some(bus), None),
            Err(error) => (None, Some(error)),
        };
        let config = PixelConfig::new(chip.default_order(), chip.default_interframe_us());
        let mut driver = Self {
            slot,
            chip,
            bus,
            failure,
            source: PixelSource::new(&config, &[]),
            config,
            staging: Vec::new(),
            timer: FrameTimer::default(),
            state: TransmissionState::Idle,
            transfer_end: Instant::from_ticks(0),
            stats: EngineStats::default(),
            paused: false,
            region: BufferRegion::EMPTY,
        };
        driver.apply_config();
        driver
    }

    pub fn bus(&self) -> Option<&S> {
        self.bus.as_ref()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn state(&self) -> TransmissionState {
        self.state
    }

    /// Rebuild the cursor and staging buffer from the current settings.
    fn apply_config(&mut self) {
        self.source = match self.chip {
            SpiChip::Ws2801 => PixelSource::new(&self.config, &[]),
            // Brightness goes into the per-pixel global field instead
            SpiChip::Apa102 => PixelSource::with_gamma(
                &self.config,
                &[],
                GammaTable::new(self.config.gamma, 100),
            ),
        };
        self.timer.set_min_duration(Duration::from_micros(u64::from(
            self.config.interframetime,
        )));
        let expected = self.frame_len();
        self.staging.clear();
        self.staging.reserve(expected);
    }

    fn pixels(&self) -> usize {
        self.source.intensities_per_frame() / self.source.channels()
    }

    /// Bytes of one staged frame.
    fn frame_len(&self) -> usize {
        let data = self.source.intensities_per_frame();
        match self.chip {
            SpiChip::Ws2801 => data,
            SpiChip::Apa102 => {
                APA102_START_FRAME.len() + data + self.pixels() + self.pixels().div_ceil(16)
            }
        }
    }

    /// Wire time of the staged frame.
    fn transfer_time(&self) -> Duration {
        let bits = self.staging.len() as u64 * 8;
        transmission_time(bits, 1_000_000_000 / SPI_CLOCK_HZ, 0)
    }

    fn stage(&mut self, frame: &[u8]) {
        self.staging.clear();
        self.source.start_frame();
        let channels = self.source.channels();
        match self.chip {
            SpiChip::Ws2801 => {
                while let Some(value) = self.source.next_intensity(frame) {
                    self.staging.push(value);
                }
            }
            SpiChip::Apa102 => {
                let brightness = APA102_MAX_BRIGHTNESS * u32::from(self.config.brightness) / 100;
                let marker = APA102_PIXEL_MARKER | brightness as u8;
                self.staging.extend_from_slice(&APA102_START_FRAME);
                let mut index = 0;
                while let Some(value) = self.source.next_intensity(frame) {
                    if index % channels == 0 {
                        self.staging.push(marker);
                    }
                    self.staging.push(value);
                    index += 1;
                }
                // One clock edge per pixel pushes the data through
                let end_frame = self.pixels().div_ceil(16);
                self.staging.resize(self.staging.len() + end_frame, 0xFF);
            }
        }
    }
}

impl<S: SpiBus<u8>> OutputChannel for SpiPixelDriver<S> {
    fn output_type(&self) -> OutputType {
        self.chip.output_type()
    }

    fn begin(&mut self) -> Result<(), HardwareError> {
        match (&self.bus, self.failure) {
            (Some(_), _) => Ok(()),
            (None, failure) => Err(failure.unwrap_or(HardwareError::NoPeripheral)),
        }
    }

    fn set_config(&mut self, patch: &Map<String, Value>) -> Result<(), ConfigError> {
        let config = merge(&self.config, patch)?;
        config.validate(3)?;
        self.config = config;
        self.apply_config();
        Ok(())
    }

    fn get_config(&self, out: &mut Map<String, Value>) {
        out.insert("type".to_string(), Value::from(self.chip.output_type().as_str()));
        write_fields(&self.config, out);
    }

    fn get_status(&self, out: &mut Map<String, Value>) {
        write_common_status(out, self.chip.output_type(), self.slot, self.region);
        out.insert("pixel_count".to_string(), Value::from(self.config.pixel_count));
        self.stats.write_status(out);
        out.insert("state".to_string(), Value::from(self.state.as_str()));
        write_failure(out, self.failure);
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
        self.poll(now);
        if self.failure.is_some() || self.bus.is_none() || self.paused {
            return;
        }
        if self.state.is_busy() || !self.timer.can_start(now) {
            self.stats.dropped_frames += 1;
            return;
        }
        self.state = TransmissionState::Filling;
        self.timer.mark_start(now);
        self.stage(frame);
        self.stats.frames += 1;

        let Some(bus) = self.bus.as_mut() else {
            return;
        };
        match bus.write(&self.staging) {
            Ok(()) => {
                self.stats.intensities_last_frame = self.source.intensities_per_frame() as u32;
                self.transfer_end = now + self.transfer_time();
                self.state = TransmissionState::Draining;
            }
            Err(_) => {
                self.stats.hardware_errors += 1;
                self.state = TransmissionState::Idle;
            }
        }
    }

    fn on_interrupt(&mut self, event: InterruptEvent, _frame: &[u8]) {
        match event {
            InterruptEvent::TransmitEnd if self.state == TransmissionState::Draining => {
                self.state = TransmissionState::FrameComplete;
            }
            InterruptEvent::Error => self.stats.hardware_errors += 1,
            _ => {}
        }
    }

    fn poll(&mut self, now: Instant) {
        if self.state == TransmissionState::Draining && now >= self.transfer_end {
            self.state = TransmissionState::FrameComplete;
        }
        if self.state == TransmissionState::FrameComplete && self.timer.can_start(now) {
            self.state = TransmissionState::Idle;
        }
    }

    fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn is_idle(&self) -> bool {
        !self.state.is_busy()
    }
}
