//! Intensity translation tables.
//!
//! A table maps every N-bit group of an intensity value onto the native unit
//! of a peripheral: a [`PulseCode`] for the pulse-train unit or a character
//! for the serial unit. Values are split MSB first.

use crate::peripheral::PulseCode;

/// Immutable group-to-pattern lookup with `N` entries (`N` = 2^bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationTable<T: Copy, const N: usize> {
    entries: [T; N],
}

impl<T: Copy, const N: usize> TranslationTable<T, N> {
    /// Create a table; entry `i` is the pattern for group value `i`.
    pub const fn new(entries: [T; N]) -> Self {
        assert!(N.is_power_of_two() && N >= 2 && N <= 256);
        Self { entries }
    }

    /// Bits of intensity consumed per lookup.
    pub const fn group_bits(&self) -> u8 {
        N.trailing_zeros() as u8
    }

    pub fn lookup(&self, group: u8) -> T {
        self.entries[group as usize & (N - 1)]
    }

    /// Translate the low `width` bits of `value`, MSB group first.
    pub fn translate(&self, value: u8, width: u8) -> impl Iterator<Item = T> + '_ {
        BitGroups::new(value, width, self.group_bits()).map(|group| self.lookup(group))
    }
}

/// Splits the low `width` bits of a value into groups, MSB first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitGroups {
    value: u8,
    remaining: u8,
    group_bits: u8,
}

impl BitGroups {
    pub const fn new(value: u8, width: u8, group_bits: u8) -> Self {
        Self {
            value,
            remaining: width,
            group_bits,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}

impl Iterator for BitGroups {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        let bits = self.group_bits.min(self.remaining);
        self.remaining -= bits;
        let mask = ((1u16 << bits) - 1) as u8;
        Some((u16::from(self.value) >> self.remaining) as u8 & mask)
    }
}

/// Pulse-train translation for one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTable {
    /// One code per data bit value
    pub data: TranslationTable<PulseCode, 2>,
    /// Idle code emitted between frames
    pub inter_frame_gap: PulseCode,
    /// Optional code emitted ahead of the first data bit
    pub frame_start: Option<PulseCode>,
    /// Idle code emitted after the last data bit
    pub frame_stop: PulseCode,
    /// Optional code emitted after every intensity value
    pub inter_intensity: Option<PulseCode>,
}

/// Bit shapes of a clockless (self-clocked) LED protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    pub period_ns: u32,
    pub t0h_ns: u32,
    pub t1h_ns: u32,
    /// Line must stay idle this long to latch a frame
    pub reset_ns: u32,
}

impl PulseTable {
    /// Build the table for a clockless protocol.
    ///
    /// With `inverted` the active level is low and the line idles high.
    pub const fn clockless(timing: &BitTiming, inverted: bool, tick_ns: u32) -> Self {
        let active = !inverted;
        let zero = PulseCode::from_nanos(
            active,
            timing.t0h_ns,
            !active,
            timing.period_ns - timing.t0h_ns,
            tick_ns,
        );
        let one = PulseCode::from_nanos(
            active,
            timing.t1h_ns,
            !active,
            timing.period_ns - timing.t1h_ns,
            tick_ns,
        );
        let reset_ticks = timing.reset_ns / tick_ns;
        let half = reset_ticks.div_ceil(2);
        let half = if half > crate::peripheral::PULSE_CODE_MAX_LENGTH as u32 {
            crate::peripheral::PULSE_CODE_MAX_LENGTH
        } else {
            half as u16
        };
        let stop_half = (timing.period_ns / tick_ns) as u16;
        Self {
            data: TranslationTable::new([zero, one]),
            inter_frame_gap: PulseCode::idle(!active, half),
            frame_start: None,
            frame_stop: PulseCode::idle(!active, stop_half),
            inter_intensity: None,
        }
    }

    /// Gap codes needed to cover the protocol reset time.
    pub const fn gap_slots(&self, timing: &BitTiming, tick_ns: u32) -> u8 {
        let per_code = 2 * self.inter_frame_gap.length1 as u32;
        if per_code == 0 {
            return 1;
        }
        let slots = (timing.reset_ns / tick_ns).div_ceil(per_code);
        if slots == 0 { 1 } else { slots as u8 }
    }
}

/// 6N1 serial patterns, two intensity bits per character.
///
/// Each intensity bit takes four line bit times; start and stop bits are
/// part of the pattern. Shown as line levels `(start) d0..d5 (stop)` on an
/// inverted TX line, which gives the active-high waveform. The same
/// characters on a plain line give the mirrored, active-low waveform.
pub const CLOCKLESS_SERIAL_TABLE: TranslationTable<u8, 4> = TranslationTable::new([
    0b0011_0111, // 00 - (1)000 100(0)
    0b0000_0111, // 01 - (1)000 111(0)
    0b0011_0100, // 10 - (1)110 100(0)
    0b0000_0100, // 11 - (1)110 111(0)
]);

/// 7N1 serial patterns, one GECE bit per character.
///
/// Three line bit times per 10 us GECE segment.
pub const GECE_SERIAL_TABLE: TranslationTable<u8, 2> = TranslationTable::new([
    0b0111_1100, // 0 - (0)00 111 11(1)
    0b0110_0000, // 1 - (0)00 000 11(1)
]);
