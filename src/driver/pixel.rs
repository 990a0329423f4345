//! Shared pixel settings and the intensity cursor of pixel strings.
//!
//! The shared buffer holds one RGB or RGBW tuple per logical pixel. The
//! cursor walks the physical string, applying grouping, zig-zag wiring,
//! colour order, gamma and the null pixels around the data.

use alloc::string::String;

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::engine::IntensitySource;
use crate::error::ConfigError;
use crate::gamma::GammaTable;

/// Longest protocol header sent ahead of the pixels.
pub const PIXEL_HEADER_CAPACITY: usize = 8;

const DEFAULT_PIXEL_COUNT: u16 = 100;
const DEFAULT_GAMMA: f64 = 2.2;

/// Output position to buffer channel mapping, e.g. `"grb"` or `"wrgb"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColorOrder {
    map: [u8; 4],
    len: u8,
}

impl ColorOrder {
    pub const RGB: Self = Self {
        map: [0, 1, 2, 3],
        len: 3,
    };
    pub const GRB: Self = Self {
        map: [1, 0, 2, 3],
        len: 3,
    };
    pub const BGR: Self = Self {
        map: [2, 1, 0, 3],
        len: 3,
    };
    pub const WRGB: Self = Self {
        map: [3, 0, 1, 2],
        len: 4,
    };

    /// Parse an order name made of the letters `r`, `g`, `b` and
    /// optionally `w`, each at most once.
    pub fn parse(name: &str) -> Option<Self> {
        let mut map = [0u8; 4];
        let mut seen = 0u8;
        let mut len = 0usize;
        for letter in name.bytes() {
            let channel = match letter.to_ascii_lowercase() {
                b'r' => 0,
                b'g' => 1,
                b'b' => 2,
                b'w' => 3,
                _ => return None,
            };
            if len == 4 || seen & (1 << channel) != 0 {
                return None;
            }
            seen |= 1 << channel;
            map[len] = channel;
            len += 1;
        }
        // rgb triplet, with or without white
        if seen & 0b0111 != 0b0111 {
            return None;
        }
        Some(Self {
            map,
            len: len as u8,
        })
    }

    /// Colour channels per pixel.
    pub const fn channels(&self) -> usize {
        self.len as usize
    }

    /// Buffer channel sent at output position `position`.
    pub const fn source_channel(&self, position: usize) -> usize {
        self.map[position] as usize
    }
}

impl TryFrom<String> for ColorOrder {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or("unknown colour order")
    }
}

impl From<ColorOrder> for String {
    fn from(order: ColorOrder) -> Self {
        const LETTERS: [char; 4] = ['r', 'g', 'b', 'w'];
        order.map[..order.channels()]
            .iter()
            .map(|&channel| LETTERS[channel as usize])
            .collect()
    }
}

/// Settings common to all pixel strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelConfig {
    pub pixel_count: u16,
    /// Physical pixels sharing one buffer tuple
    pub group_size: u16,
    /// Pixels per row of a zig-zag wired matrix, 0 for a straight string
    pub zig_size: u16,
    pub color_order: ColorOrder,
    pub gamma: f64,
    /// Percent
    pub brightness: u8,
    /// Minimum idle time between frames, microseconds
    pub interframetime: u32,
    pub prependnullcount: u16,
    pub appendnullcount: u16,
}

impl PixelConfig {
    pub const fn new(color_order: ColorOrder, interframetime: u32) -> Self {
        Self {
            pixel_count: DEFAULT_PIXEL_COUNT,
            group_size: 1,
            zig_size: 0,
            color_order,
            gamma: DEFAULT_GAMMA,
            brightness: 100,
            interframetime,
            prependnullcount: 0,
            appendnullcount: 0,
        }
    }

    /// Reject settings the cursor cannot honour.
    pub fn validate(&self, channels: usize) -> Result<(), ConfigError> {
        if self.color_order.channels() != channels {
            return Err(ConfigError::OutOfRange("color_order"));
        }
        if self.group_size == 0 {
            return Err(ConfigError::OutOfRange("group_size"));
        }
        if self.brightness > 100 {
            return Err(ConfigError::OutOfRange("brightness"));
        }
        if !(self.gamma > 0.0 && self.gamma <= 10.0) {
            return Err(ConfigError::OutOfRange("gamma"));
        }
        Ok(())
    }

    /// Buffer bytes one frame reads.
    pub fn channels_needed(&self) -> usize {
        usize::from(self.pixel_count).div_ceil(usize::from(self.group_size.max(1)))
            * self.color_order.channels()
    }
}

/// Intensity cursor over a pixel string.
#[derive(Debug, Clone)]
pub struct PixelSource {
    order: ColorOrder,
    pixel_count: usize,
    group_size: usize,
    zig_size: usize,
    prepend_nulls: usize,
    append_nulls: usize,
    header: Vec<u8, PIXEL_HEADER_CAPACITY>,
    gamma: GammaTable,
    position: usize,
}

impl PixelSource {
    /// Cursor with the brightness folded into the gamma curve.
    pub fn new(config: &PixelConfig, header: &[u8]) -> Self {
        Self::with_gamma(config, header, GammaTable::new(config.gamma, config.brightness))
    }

    pub fn with_gamma(config: &PixelConfig, header: &[u8], gamma: GammaTable) -> Self {
        let mut stored = Vec::new();
        for &byte in header.iter().take(PIXEL_HEADER_CAPACITY) {
            let _ = stored.push(byte);
        }
        Self {
            order: config.color_order,
            pixel_count: usize::from(config.pixel_count),
            group_size: usize::from(config.group_size.max(1)),
            zig_size: usize::from(config.zig_size),
            prepend_nulls: usize::from(config.prependnullcount),
            append_nulls: usize::from(config.appendnullcount),
            header: stored,
            gamma,
            position: 0,
        }
    }

    pub const fn channels(&self) -> usize {
        self.order.channels()
    }

    /// Values sent per frame, header and null pixels included.
    pub fn intensities_per_frame(&self) -> usize {
        self.header.len()
            + (self.prepend_nulls + self.pixel_count + self.append_nulls) * self.channels()
    }

    /// Buffer index holding `channel` of physical pixel `pixel`.
    fn source_index(&self, pixel: usize, position: usize) -> usize {
        let mut index = pixel;
        if self.zig_size > 1 {
            let row = index / self.zig_size;
            if row % 2 == 1 {
                index = row * self.zig_size + (self.zig_size - 1 - index % self.zig_size);
            }
        }
        (index / self.group_size) * self.channels() + self.order.source_channel(position)
    }
}

impl IntensitySource for PixelSource {
    fn start_frame(&mut self) {
        self.position = 0;
    }

    fn next_intensity(&mut self, frame: &[u8]) -> Option<u8> {
        let index = self.position;
        if index >= self.intensities_per_frame() {
            return None;
        }
        self.position += 1;

        if let Some(&byte) = self.header.get(index) {
            return Some(byte);
        }
        let index = index - self.header.len();
        let pixel = index / self.channels();
        if pixel < self.prepend_nulls || pixel >= self.prepend_nulls + self.pixel_count {
            return Some(0);
        }

        // Bytes past a truncated region read as zero
        let source = self.source_index(pixel - self.prepend_nulls, index % self.channels());
        let value = frame.get(source).copied().unwrap_or(0);
        Some(self.gamma.apply(value))
    }
}
