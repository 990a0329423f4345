//! Serial encoding engine.
//!
//! Reuses a UART as a bit shaper: every intensity group becomes one
//! character whose start bit, data bits and stop bit together draw the LED
//! waveform. Byte-oriented protocols (DMX, Renard) pass values through raw.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use super::{EncodingEngine, EngineStats, IntensitySource, TransmissionState};
use crate::error::HardwareError;
use crate::peripheral::{BreakTiming, InterruptEvent, SerialConfig, SerialFrameFormat, SerialPort};
use crate::timing::FrameTimer;
use crate::translation::{BitGroups, TranslationTable};

/// Maximum length of a per-frame header or footer.
pub const FRAME_FRAMING_CAPACITY: usize = 32;
/// Maximum length of a per-pixel header or footer.
pub const PIXEL_FRAMING_CAPACITY: usize = 8;

/// How intensity values become serial characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialTranslation {
    /// Values are written unchanged
    Raw,
    /// One intensity bit per character
    OneBit(TranslationTable<u8, 2>),
    /// Two intensity bits per character
    TwoBit(TranslationTable<u8, 4>),
}

impl SerialTranslation {
    pub const fn group_bits(&self) -> u8 {
        match self {
            Self::Raw => 8,
            Self::OneBit(table) => table.group_bits(),
            Self::TwoBit(table) => table.group_bits(),
        }
    }

    fn lookup(&self, group: u8) -> u8 {
        match self {
            Self::Raw => group,
            Self::OneBit(table) => table.lookup(group),
            Self::TwoBit(table) => table.lookup(group),
        }
    }
}

/// Line speed, either fixed or derived from the protocol bit period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRate {
    Baud(u32),
    /// Duration of one intensity bit in nanoseconds
    IntensityBitPeriod(u32),
}

/// Bytes and breaks around a whole frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameFraming {
    /// Break and mark sent before anything else
    pub frame_break: Option<BreakTiming>,
    pub prepend: Vec<u8, FRAME_FRAMING_CAPACITY>,
    pub append: Vec<u8, FRAME_FRAMING_CAPACITY>,
}

/// Bytes and breaks around every pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFraming {
    pub intensities_per_pixel: u16,
    pub break_before: Option<BreakTiming>,
    pub prepend: Vec<u8, PIXEL_FRAMING_CAPACITY>,
    pub append: Vec<u8, PIXEL_FRAMING_CAPACITY>,
}

/// Protocol variation points, fixed at `begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialEngineConfig {
    pub translation: SerialTranslation,
    pub format: SerialFrameFormat,
    pub line_rate: LineRate,
    pub invert: bool,
    /// Bits used per intensity value (1-8)
    pub intensity_width: u8,
    pub frame: FrameFraming,
    pub pixel: Option<PixelFraming>,
    pub min_frame_duration: Duration,
}

impl SerialEngineConfig {
    /// Line baud rate for this configuration.
    ///
    /// For a derived rate the characters needed for one intensity bit must
    /// last exactly one bit period.
    pub fn baud_rate(&self) -> u32 {
        match self.line_rate {
            LineRate::Baud(baud) => baud,
            LineRate::IntensityBitPeriod(period_ns) => {
                let frame_bits = u64::from(self.format.frame_bits());
                let group_bits = u64::from(self.translation.group_bits());
                let divisor = group_bits * u64::from(period_ns.max(1));
                (frame_bits * 1_000_000_000 / divisor) as u32
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillPhase {
    FrameBreak,
    FramePrepend(usize),
    NextValue,
    PixelBreak,
    PixelPrepend(usize),
    Groups,
    PixelAppend(usize),
    FrameAppend(usize),
    Done,
}

enum Item {
    Byte(u8),
    Break(BreakTiming),
}

/// Frame cursor, owned by the interrupt path while draining.
#[derive(Debug)]
struct Cursor {
    phase: FillPhase,
    groups: BitGroups,
    value_in_pixel: u16,
    intensities: u32,
}

impl Cursor {
    const fn new() -> Self {
        Self {
            phase: FillPhase::Done,
            groups: BitGroups::new(0, 0, 1),
            value_in_pixel: 0,
            intensities: 0,
        }
    }

    fn rewind(&mut self) {
        *self = Self::new();
        self.phase = FillPhase::FrameBreak;
    }

    fn is_done(&self) -> bool {
        self.phase == FillPhase::Done
    }

    fn next_item<S: IntensitySource>(
        &mut self,
        config: &SerialEngineConfig,
        source: &mut S,
        frame: &[u8],
    ) -> Option<Item> {
        loop {
            match self.phase {
                FillPhase::FrameBreak => {
                    self.phase = FillPhase::FramePrepend(0);
                    if let Some(timing) = config.frame.frame_break {
                        return Some(Item::Break(timing));
                    }
                }
                FillPhase::FramePrepend(index) => {
                    if let Some(&byte) = config.frame.prepend.get(index) {
                        self.phase = FillPhase::FramePrepend(index + 1);
                        return Some(Item::Byte(byte));
                    }
                    self.phase = FillPhase::NextValue;
                }
                FillPhase::NextValue => match source.next_intensity(frame) {
                    Some(value) => {
                        self.intensities += 1;
                        self.groups = BitGroups::new(
                            value,
                            config.intensity_width,
                            config.translation.group_bits(),
                        );
                        self.phase = if config.pixel.is_some() && self.value_in_pixel == 0 {
                            FillPhase::PixelBreak
                        } else {
                            FillPhase::Groups
                        };
                    }
                    None => self.phase = FillPhase::FrameAppend(0),
                },
                FillPhase::PixelBreak => {
                    self.phase = FillPhase::PixelPrepend(0);
                    if let Some(timing) = config.pixel.as_ref().and_then(|p| p.break_before) {
                        return Some(Item::Break(timing));
                    }
                }
                FillPhase::PixelPrepend(index) => {
                    let byte = config.pixel.as_ref().and_then(|p| p.prepend.get(index));
                    if let Some(&byte) = byte {
                        self.phase = FillPhase::PixelPrepend(index + 1);
                        return Some(Item::Byte(byte));
                    }
                    self.phase = FillPhase::Groups;
                }
                FillPhase::Groups => {
                    if let Some(group) = self.groups.next() {
                        return Some(Item::Byte(config.translation.lookup(group)));
                    }
                    self.phase = FillPhase::NextValue;
                    if let Some(pixel) = config.pixel.as_ref() {
                        self.value_in_pixel += 1;
                        if self.value_in_pixel >= pixel.intensities_per_pixel.max(1) {
                            self.value_in_pixel = 0;
                            self.phase = FillPhase::PixelAppend(0);
                        }
                    }
                }
                FillPhase::PixelAppend(index) => {
                    let byte = config.pixel.as_ref().and_then(|p| p.append.get(index));
                    if let Some(&byte) = byte {
                        self.phase = FillPhase::PixelAppend(index + 1);
                        return Some(Item::Byte(byte));
                    }
                    self.phase = FillPhase::NextValue;
                }
                FillPhase::FrameAppend(index) => {
                    if let Some(&byte) = config.frame.append.get(index) {
                        self.phase = FillPhase::FrameAppend(index + 1);
                        return Some(Item::Byte(byte));
                    }
                    self.phase = FillPhase::Done;
                }
                FillPhase::Done => return None,
            }
        }
    }
}

/// Drives one serial unit.
pub struct SerialEncodingEngine<S: SerialPort> {
    port: Option<S>,
    config: Option<SerialEngineConfig>,
    failure: Option<HardwareError>,
    state: TransmissionState,
    paused: bool,
    timer: FrameTimer,
    stats: EngineStats,
    cursor: Cursor,
}

impl<S: SerialPort> SerialEncodingEngine<S> {
    /// Wrap a port handle, or record why none could be acquired.
    pub fn new(port: Result<S, HardwareError>) -> Self {
        let (port, failure) = match port {
            Ok(port) => (Some(port), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            port,
            config: None,
            failure,
            state: TransmissionState::Idle,
            paused: false,
            timer: FrameTimer::default(),
            stats: EngineStats::default(),
            cursor: Cursor::new(),
        }
    }

    /// Configure the port for a protocol.
    pub fn begin(&mut self, config: SerialEngineConfig) -> Result<(), HardwareError> {
        let Some(port) = self.port.as_mut() else {
            return Err(self.failure.unwrap_or(HardwareError::NoPeripheral));
        };

        let baud_rate = config.baud_rate();
        if baud_rate == 0 {
            self.failure = Some(HardwareError::ConfigurationRejected);
            return Err(HardwareError::ConfigurationRejected);
        }

        port.set_interrupts(false, false);
        let fifo_threshold = (port.fifo_len() * 3 / 4).max(1);
        let result = port.configure(&SerialConfig {
            baud_rate,
            format: config.format,
            invert: config.invert,
            fifo_threshold,
        });
        if let Err(error) = result {
            self.failure = Some(error);
            self.config = None;
            return Err(error);
        }

        output_log!("serial engine: {} baud, {:?}", baud_rate, config.format);
        self.failure = None;
        self.timer.set_min_duration(config.min_frame_duration);
        self.config = Some(config);
        self.state = TransmissionState::Idle;
        self.cursor = Cursor::new();
        Ok(())
    }

    pub fn port(&self) -> Option<&S> {
        self.port.as_ref()
    }

    pub fn port_mut(&mut self) -> Option<&mut S> {
        self.port.as_mut()
    }

    pub fn config(&self) -> Option<&SerialEngineConfig> {
        self.config.as_ref()
    }

    /// Move items into the FIFO until it is full or the frame is exhausted.
    fn fill<I: IntensitySource>(&mut self, source: &mut I, frame: &[u8]) {
        let (Some(port), Some(config)) = (self.port.as_mut(), self.config.as_ref()) else {
            return;
        };
        while port.fifo_free() > 0 {
            match self.cursor.next_item(config, source, frame) {
                Some(Item::Byte(byte)) => port.write_byte(byte),
                Some(Item::Break(timing)) => port.queue_break(timing),
                None => break,
            }
        }
    }

    fn update_interrupts(&mut self) {
        let more_to_send = !self.cursor.is_done();
        if let Some(port) = self.port.as_mut() {
            port.set_interrupts(more_to_send, true);
        }
    }
}

impl<S: SerialPort> EncodingEngine for SerialEncodingEngine<S> {
    fn render<I: IntensitySource>(&mut self, now: Instant, source: &mut I, frame: &[u8]) -> bool {
        self.poll(now);
        if self.failure.is_some() || self.config.is_none() || self.paused {
            return false;
        }
        if self.state.is_busy() || !self.timer.can_start(now) {
            self.stats.dropped_frames += 1;
            return false;
        }

        self.state = TransmissionState::Filling;
        self.timer.mark_start(now);
        source.start_frame();
        self.cursor.rewind();

        self.fill(source, frame);

        self.state = TransmissionState::Draining;
        self.stats.frames += 1;
        self.update_interrupts();
        true
    }

    fn on_interrupt<I: IntensitySource>(
        &mut self,
        event: InterruptEvent,
        source: &mut I,
        frame: &[u8],
    ) {
        match event {
            InterruptEvent::BufferLow => {
                if self.state != TransmissionState::Draining {
                    return;
                }
                self.fill(source, frame);
                self.update_interrupts();
            }
            InterruptEvent::TransmitEnd => {
                if self.state != TransmissionState::Draining {
                    return;
                }
                if !self.cursor.is_done() {
                    // FIFO ran dry mid-frame; keep going
                    self.stats.incomplete_frames += 1;
                    self.fill(source, frame);
                    self.update_interrupts();
                    return;
                }
                if let Some(port) = self.port.as_mut() {
                    port.set_interrupts(false, false);
                }
                self.stats.intensities_last_frame = self.cursor.intensities;
                self.state = TransmissionState::FrameComplete;
            }
            InterruptEvent::Error => {
                self.stats.hardware_errors += 1;
            }
        }
    }

    fn poll(&mut self, now: Instant) {
        if self.state == TransmissionState::FrameComplete && self.timer.can_start(now) {
            self.state = TransmissionState::Idle;
        }
    }

    fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn state(&self) -> TransmissionState {
        self.state
    }

    fn set_min_frame_duration(&mut self, duration: Duration) {
        self.timer.set_min_duration(duration);
        if let Some(config) = self.config.as_mut() {
            config.min_frame_duration = duration;
        }
    }

    fn min_frame_duration(&self) -> Duration {
        self.timer.min_duration()
    }

    fn stats(&self) -> &EngineStats {
        &self.stats
    }

    fn failure(&self) -> Option<HardwareError> {
        self.failure
    }
}
