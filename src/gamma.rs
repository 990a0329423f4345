//! Gamma and brightness lookup for pixel intensities.

/// Precomputed 8-bit intensity curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GammaTable {
    lut: [u8; 256],
}

impl GammaTable {
    /// Linear curve at full brightness.
    pub const fn identity() -> Self {
        let mut lut = [0u8; 256];
        let mut i = 0;
        while i < 256 {
            lut[i] = i as u8;
            i += 1;
        }
        Self { lut }
    }

    /// Build a curve for `gamma` scaled by `brightness` percent (0-100).
    pub fn new(gamma: f64, brightness: u8) -> Self {
        let scale = f64::from(brightness.min(100)) / 100.0;
        if libm::fabs(gamma - 1.0) < f64::EPSILON && brightness >= 100 {
            return Self::identity();
        }

        let mut lut = [0u8; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            let normalized = i as f64 / 255.0;
            let value = libm::pow(normalized, gamma) * 255.0 * scale;
            *entry = libm::round(value).clamp(0.0, 255.0) as u8;
        }
        Self { lut }
    }

    #[inline]
    pub fn apply(&self, value: u8) -> u8 {
        self.lut[value as usize]
    }
}

impl Default for GammaTable {
    fn default() -> Self {
        Self::identity()
    }
}
