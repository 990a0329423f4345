#![no_std]

extern crate alloc;

#[macro_use]
mod log;

pub mod board;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod engine;
pub mod error;
pub mod gamma;
pub mod layout;
pub mod manager;
pub mod peripheral;
pub mod shared;
pub mod timing;
pub mod translation;

pub use board::{Board, SlotDefinition, SlotPeripheral};
pub use config::{ConfigStore, CURRENT_CONFIG_VERSION};
pub use diagnostics::{Diagnostic, DiagnosticLog};
pub use driver::{OutputChannel, OutputDriver, OutputType};
pub use engine::{
    EncodingEngine, EngineStats, IntensitySource, PixelEncodingEngine, SerialEncodingEngine,
    TransmissionState,
};
pub use error::{ConfigError, HardwareError, StoreError};
pub use layout::{BufferLayout, BufferRegion, CapacityListener};
pub use manager::OutputManager;
pub use peripheral::{InterruptEvent, PulseCode, PulseTrain, SerialFrameFormat, SerialPort};
pub use shared::SharedOutputs;
pub use translation::TranslationTable;

pub use embassy_time::{Duration, Instant};
pub use smart_leds::RGB8 as Rgb;
