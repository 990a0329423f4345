//! Hardware-paced encoding engines.
//!
//! An engine owns one peripheral handle and turns intensity values pulled
//! from an [`IntensitySource`] into native peripheral items. The main loop
//! starts frames through [`EncodingEngine::render`]; the interrupt handler
//! keeps the hardware fed through [`EncodingEngine::on_interrupt`].
//!
//! Once a frame is `Draining` only the interrupt path touches the cursor.
//! `render` merely inspects the state and declines.

mod pulse;
mod serial;

use alloc::string::ToString;

use embassy_time::{Duration, Instant};
use serde_json::{Map, Value};

pub use pulse::{PixelEncodingEngine, PulseEngineConfig};
pub use serial::{
    FRAME_FRAMING_CAPACITY, FrameFraming, LineRate, PIXEL_FRAMING_CAPACITY, PixelFraming,
    SerialEncodingEngine, SerialEngineConfig, SerialTranslation,
};

use crate::error::HardwareError;
use crate::peripheral::InterruptEvent;

/// Per-engine transmission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmissionState {
    /// No frame has been started, or the last one has been retired
    #[default]
    Idle,
    /// `render` is staging the first batch of a frame
    Filling,
    /// The interrupt handler owns the frame
    Draining,
    /// Hardware finished; waiting out the minimum frame duration
    FrameComplete,
}

impl TransmissionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Filling => "filling",
            Self::Draining => "draining",
            Self::FrameComplete => "complete",
        }
    }

    /// A frame is in flight.
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Filling | Self::Draining)
    }
}

/// Pull-based provider of one frame's intensity values.
pub trait IntensitySource {
    /// Rewind to the first value of a new frame
    fn start_frame(&mut self);

    /// Next value to send, or `None` when the frame's data is exhausted
    fn next_intensity(&mut self, frame: &[u8]) -> Option<u8>;
}

/// Counters reported through the status document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Frames started
    pub frames: u32,
    /// Render requests declined by pacing or an in-flight frame
    pub dropped_frames: u32,
    /// Error interrupts
    pub hardware_errors: u32,
    /// Refill events arriving with no room to account for
    pub overruns: u32,
    /// Frames that ended before all data was queued
    pub incomplete_frames: u32,
    /// Intensity values queued in the last completed frame
    pub intensities_last_frame: u32,
}

impl EngineStats {
    pub(crate) fn write_status(&self, out: &mut Map<alloc::string::String, Value>) {
        out.insert("frames".to_string(), Value::from(self.frames));
        out.insert("dropped".to_string(), Value::from(self.dropped_frames));
        out.insert("errors".to_string(), Value::from(self.hardware_errors));
        out.insert("overruns".to_string(), Value::from(self.overruns));
        out.insert(
            "incomplete_frames".to_string(),
            Value::from(self.incomplete_frames),
        );
        out.insert(
            "intensities_last_frame".to_string(),
            Value::from(self.intensities_last_frame),
        );
    }
}

/// Uniform contract of both engine kinds.
pub trait EncodingEngine {
    /// Start a frame unless one is in flight or pacing forbids it.
    ///
    /// Returns whether a frame was started. Never waits for hardware.
    fn render<S: IntensitySource>(&mut self, now: Instant, source: &mut S, frame: &[u8]) -> bool;

    /// Interrupt-context entry. Must not allocate or block.
    fn on_interrupt<S: IntensitySource>(
        &mut self,
        event: InterruptEvent,
        source: &mut S,
        frame: &[u8],
    );

    /// Retire a completed frame once its minimum duration has passed.
    fn poll(&mut self, now: Instant);

    /// Stop accepting new frames; an in-flight frame still completes
    fn pause(&mut self, paused: bool);

    fn state(&self) -> TransmissionState;

    fn set_min_frame_duration(&mut self, duration: Duration);

    fn min_frame_duration(&self) -> Duration;

    fn stats(&self) -> &EngineStats;

    /// Peripheral failure that made `render` a permanent no-op
    fn failure(&self) -> Option<HardwareError>;

    fn write_status(&self, out: &mut Map<alloc::string::String, Value>) {
        self.stats().write_status(out);
        out.insert("state".to_string(), Value::from(self.state().as_str()));
        out.insert(
            "min_frame_us".to_string(),
            Value::from(self.min_frame_duration().as_micros()),
        );
        if let Some(error) = self.failure() {
            out.insert("hardware_error".to_string(), Value::from(error.to_string()));
        }
    }
}
