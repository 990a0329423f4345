//! Peripheral seams.
//!
//! The board layer implements these traits for the real pulse-train
//! (RMT-class) and asynchronous-serial (UART-class) units. Engines only ever
//! talk to hardware through them, which keeps the encoding logic testable on
//! the host.

use crate::error::HardwareError;

/// Source clock of the pulse-train unit.
pub const PULSE_TRAIN_SOURCE_CLOCK_HZ: u32 = 80_000_000;

/// Largest length a single half of a pulse code can hold.
pub const PULSE_CODE_MAX_LENGTH: u16 = 0x7FFF;

/// One hardware ring entry: two timed output levels.
///
/// Packs into a 32-bit word with the same layout as the ESP32 RMT memory.
/// A code with both lengths zero terminates the transmission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseCode {
    /// Output level in the first interval
    pub level1: bool,
    /// Length of the first interval in ticks
    pub length1: u16,
    /// Output level in the second interval
    pub level2: bool,
    /// Length of the second interval in ticks
    pub length2: u16,
}

impl PulseCode {
    /// End-of-transmission marker.
    pub const END: Self = Self {
        level1: false,
        length1: 0,
        level2: false,
        length2: 0,
    };

    pub const fn new(level1: bool, length1: u16, level2: bool, length2: u16) -> Self {
        Self {
            level1,
            length1,
            level2,
            length2,
        }
    }

    /// Build a code from nanosecond durations at the given tick length.
    pub const fn from_nanos(level1: bool, ns1: u32, level2: bool, ns2: u32, tick_ns: u32) -> Self {
        Self::new(
            level1,
            clamp_ticks(ns1 / tick_ns),
            level2,
            clamp_ticks(ns2 / tick_ns),
        )
    }

    /// Both halves held at one level.
    pub const fn idle(level: bool, half_ticks: u16) -> Self {
        Self::new(level, half_ticks, level, half_ticks)
    }

    pub const fn is_end(self) -> bool {
        self.length1 == 0 || self.length2 == 0
    }
}

const fn clamp_ticks(ticks: u32) -> u16 {
    if ticks > PULSE_CODE_MAX_LENGTH as u32 {
        PULSE_CODE_MAX_LENGTH
    } else {
        ticks as u16
    }
}

impl From<PulseCode> for u32 {
    fn from(code: PulseCode) -> u32 {
        let mut entry = u32::from(code.length1 & PULSE_CODE_MAX_LENGTH);
        entry |= u32::from(code.length2 & PULSE_CODE_MAX_LENGTH) << 16;
        if code.level1 {
            entry |= 1 << 15;
        }
        if code.level2 {
            entry |= 1 << 31;
        }
        entry
    }
}

impl From<u32> for PulseCode {
    fn from(value: u32) -> Self {
        Self {
            level1: value & (1 << 15) != 0,
            length1: (value & 0x7FFF) as u16,
            level2: value & (1 << 31) != 0,
            length2: ((value >> 16) & 0x7FFF) as u16,
        }
    }
}

/// Interrupt causes an engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptEvent {
    /// Ring/FIFO drained below the refill threshold
    BufferLow,
    /// The peripheral went idle after the last queued item
    TransmitEnd,
    /// The peripheral flagged an error
    Error,
}

/// Pulse-train unit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTrainConfig {
    /// Source clock divider
    pub clock_divider: u8,
    /// Output level while idle
    pub idle_level: bool,
    /// Slots transmitted between two `BufferLow` events
    pub refill_threshold: usize,
}

impl PulseTrainConfig {
    /// Length of one tick in nanoseconds.
    pub const fn tick_ns(&self) -> u32 {
        1_000_000_000 / (PULSE_TRAIN_SOURCE_CLOCK_HZ / self.clock_divider as u32)
    }
}

/// Pulse-train peripheral with a small ring of pulse codes.
///
/// Transmission starts at ring index 0 and wraps. The unit raises
/// `BufferLow` every `refill_threshold` transmitted slots and
/// `TransmitEnd` once it reaches [`PulseCode::END`].
pub trait PulseTrain {
    fn configure(&mut self, config: &PulseTrainConfig) -> Result<(), HardwareError>;

    /// Number of slots in the hardware ring
    fn ring_len(&self) -> usize;

    fn write_slot(&mut self, index: usize, code: PulseCode);

    /// Begin transmitting from ring index 0
    fn start(&mut self);

    fn set_interrupts(&mut self, buffer_low: bool, transmit_end: bool);
}

/// Serial character framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialFrameFormat {
    /// 6 data bits, no parity, 1 stop bit
    SixN1,
    /// 7 data bits, no parity, 1 stop bit
    SevenN1,
    /// 8 data bits, no parity, 1 stop bit
    EightN1,
    /// 8 data bits, no parity, 2 stop bits
    EightN2,
}

impl SerialFrameFormat {
    /// Bit times on the line per character, start and stop bits included.
    pub const fn frame_bits(self) -> u32 {
        match self {
            Self::SixN1 => 8,
            Self::SevenN1 => 9,
            Self::EightN1 => 10,
            Self::EightN2 => 11,
        }
    }
}

/// Line break followed by a mark, both in bit times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakTiming {
    pub break_bits: u16,
    pub mark_bits: u16,
}

/// Serial unit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub format: SerialFrameFormat,
    /// Invert the TX line
    pub invert: bool,
    /// Free FIFO bytes that trigger `BufferLow`
    pub fifo_threshold: usize,
}

/// Asynchronous-serial peripheral with a transmit FIFO.
pub trait SerialPort {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), HardwareError>;

    /// Free bytes in the transmit FIFO
    fn fifo_free(&self) -> usize;

    /// Total FIFO size
    fn fifo_len(&self) -> usize;

    fn write_byte(&mut self, byte: u8);

    /// Queue a break and mark behind the bytes already in the FIFO
    fn queue_break(&mut self, timing: BreakTiming);

    fn set_interrupts(&mut self, fifo_low: bool, transmit_done: bool);
}
