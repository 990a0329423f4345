//! Error types shared by drivers, engines and the output manager.
//!
//! None of these ever escape the manager: configuration errors fall back to
//! the disabled driver, hardware errors park the driver in a failed state.

use alloc::string::String;

use thiserror::Error;

use crate::driver::OutputType;

/// Failure reported by a peripheral handle or the board layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HardwareError {
    /// The requested peripheral unit does not exist or is already taken
    #[error("peripheral unit {0} is not available")]
    Unavailable(u8),
    /// The slot has no peripheral of the kind the protocol needs
    #[error("slot has no suitable peripheral")]
    NoPeripheral,
    /// The peripheral refused the requested timing/framing
    #[error("peripheral rejected configuration")]
    ConfigurationRejected,
    /// A bus transaction failed
    #[error("bus transaction failed")]
    Bus,
}

/// Problem found while applying a configuration document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A required section is missing or is not an object
    #[error("missing section `{0}`")]
    MissingSection(&'static str),
    /// A field had the wrong JSON type
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// A field parsed but is outside the accepted range
    #[error("`{0}` is out of range")]
    OutOfRange(&'static str),
    /// The protocol code does not name a known output type
    #[error("unknown output type code {0}")]
    UnknownType(u64),
    /// The output type exists but the slot cannot drive it
    #[error("{output_type} is not supported on slot {slot}")]
    IllegalSlot { slot: usize, output_type: OutputType },
}

/// Failure reported by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Nothing has been stored yet
    #[error("no stored configuration")]
    NotFound,
    /// The stored document could not be read back
    #[error("stored configuration is unreadable")]
    Corrupt,
    /// Writing the document failed
    #[error("failed to write configuration")]
    WriteFailed,
}
