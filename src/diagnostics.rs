//! Bounded diagnostics log.

use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;

use heapless::Deque;
use serde_json::Value;

use crate::error::{ConfigError, HardwareError, StoreError};

/// Entries kept before the oldest one is dropped.
pub const DIAGNOSTIC_CAPACITY: usize = 16;

/// Something the manager recovered from.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Stored document was written by another config version
    ConfigVersion { found: u64, expected: u32 },
    /// The document could not be used at all
    ConfigDocument(ConfigError),
    /// A slot fell back to Disabled or kept its previous settings
    SlotConfig { slot: usize, error: ConfigError },
    /// A driver could not acquire or configure its peripheral
    Hardware { slot: usize, error: HardwareError },
    /// A slot received less buffer than it needs
    BufferExhausted {
        slot: usize,
        requested: usize,
        granted: usize,
    },
    /// Loading or saving the configuration failed
    Store(StoreError),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigVersion { found, expected } => {
                write!(f, "config version {found} does not match {expected}")
            }
            Self::ConfigDocument(error) => write!(f, "config rejected: {error}"),
            Self::SlotConfig { slot, error } => write!(f, "slot {slot}: {error}"),
            Self::Hardware { slot, error } => write!(f, "slot {slot}: {error}"),
            Self::BufferExhausted {
                slot,
                requested,
                granted,
            } => write!(
                f,
                "slot {slot}: buffer exhausted, {granted} of {requested} channels granted"
            ),
            Self::Store(error) => write!(f, "config store: {error}"),
        }
    }
}

/// Ring of recent diagnostics; also echoed to the console.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Deque<Diagnostic, DIAGNOSTIC_CAPACITY>,
}

impl DiagnosticLog {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        output_log!("output: {}", diagnostic);
        if self.entries.is_full() {
            self.entries.pop_front();
        }
        let _ = self.entries.push_back(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn to_json(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .map(|entry| Value::from(entry.to_string()))
                .collect::<Vec<_>>(),
        )
    }
}
