//! Output manager: slot arena, configuration and buffer arbitration.
//!
//! The manager owns one driver per slot and the shared frame buffer. All
//! configuration problems are recovered here: a slot that cannot be set up
//! as requested falls back to [`DisabledDriver`](crate::driver::DisabledDriver)
//! and the reason lands in the diagnostics log.
//!
//! Writers fill `buffer`. Drivers only ever read `frame`, a copy of their
//! region taken when they start a frame, so a frame in flight never mixes
//! old and new data.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use embassy_time::Instant;
use serde_json::{Map, Value};

use crate::board::{Board, SlotDefinition};
use crate::config::{
    self, CHANNELS_KEY, CURRENT_CONFIG_VERSION, ConfigStore, TYPE_KEY, VERSION_KEY,
};
use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::driver::{OutputChannel, OutputDriver, OutputType};
use crate::error::{ConfigError, StoreError};
use crate::layout::{BufferLayout, CapacityListener, MAX_SLOTS};
use crate::peripheral::InterruptEvent;

/// Owner of every output slot.
pub struct OutputManager<B, L, const SLOTS: usize, const BUFFER_SIZE: usize>
where
    B: Board,
    L: CapacityListener,
{
    board: B,
    listener: L,
    slots: [SlotDefinition; SLOTS],
    drivers: [OutputDriver<B>; SLOTS],
    buffer: [u8; BUFFER_SIZE],
    /// Snapshot the drivers transmit from
    frame: [u8; BUFFER_SIZE],
    layout: BufferLayout,
    /// Channel entries of the last applied document
    channels: Map<String, Value>,
    pending: Option<Value>,
    paused: bool,
    reload_paused: bool,
    initialized: bool,
    diagnostics: DiagnosticLog,
}

impl<B, L, const SLOTS: usize, const BUFFER_SIZE: usize> OutputManager<B, L, SLOTS, BUFFER_SIZE>
where
    B: Board,
    L: CapacityListener,
{
    pub fn new(board: B, slots: [SlotDefinition; SLOTS], listener: L) -> Self {
        const { assert!(SLOTS <= MAX_SLOTS) };
        Self {
            board,
            listener,
            slots,
            drivers: core::array::from_fn(OutputDriver::disabled),
            buffer: [0; BUFFER_SIZE],
            frame: [0; BUFFER_SIZE],
            layout: BufferLayout::default(),
            channels: Map::new(),
            pending: None,
            paused: false,
            reload_paused: false,
            initialized: false,
            diagnostics: DiagnosticLog::new(),
        }
    }

    /// Bind every slot and apply the stored configuration.
    ///
    /// Without a usable stored document the all-disabled default is applied
    /// and persisted. Calling it again does nothing.
    pub fn begin<S: ConfigStore>(&mut self, store: &mut S) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        for (slot, driver) in self.drivers.iter_mut().enumerate() {
            *driver = OutputDriver::disabled(slot);
        }

        let loaded = match store.load() {
            Ok(document) => match self.process_config(&document) {
                Ok(()) => true,
                Err(error) => {
                    self.diagnostics.record(Diagnostic::ConfigDocument(error));
                    false
                }
            },
            Err(error) => {
                if error != StoreError::NotFound {
                    self.diagnostics.record(Diagnostic::Store(error));
                }
                false
            }
        };

        if !loaded {
            let document = self.create_default_config();
            if let Err(error) = store.save(&document) {
                self.diagnostics.record(Diagnostic::Store(error));
            }
            if let Err(error) = self.process_config(&document) {
                self.diagnostics.record(Diagnostic::ConfigDocument(error));
            }
        }
        output_log!("outputs: {} slots, {} channels used", SLOTS, self.layout.used());
    }

    /// Persist a new document and schedule it for the next `render`.
    ///
    /// A document without an `output_config.channels` table is replaced by
    /// the default one. The document is applied even when persisting fails;
    /// the store error is returned and logged.
    pub fn set_config<S: ConfigStore>(
        &mut self,
        document: Value,
        store: &mut S,
    ) -> Result<(), StoreError> {
        let checked = config::document_sections(&document).map(|_| ());
        let document = match checked {
            Ok(()) => document,
            Err(error) => {
                self.diagnostics.record(Diagnostic::ConfigDocument(error));
                self.create_default_config()
            }
        };
        let saved = store.save(&document);
        if let Err(error) = saved {
            self.diagnostics.record(Diagnostic::Store(error));
        }
        self.pending = Some(document);
        saved
    }

    /// Current configuration document, every slot's settings included.
    pub fn get_config(&self) -> Value {
        let mut channels = self.channels.clone();
        for (slot, driver) in self.drivers.iter().enumerate() {
            let entry = channels
                .entry(slot.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Some(entry) = entry.as_object_mut() {
                let output_type = driver.output_type();
                let mut settings = Map::new();
                driver.get_config(&mut settings);
                entry.insert(TYPE_KEY.to_string(), Value::from(output_type.code()));
                entry.insert(output_type.code().to_string(), Value::Object(settings));
            }
        }
        config::output_config(BUFFER_SIZE, channels)
    }

    /// Status of every slot plus recent diagnostics.
    pub fn get_status(&self) -> Value {
        let outputs = self
            .drivers
            .iter()
            .map(|driver| {
                let mut status = Map::new();
                driver.get_status(&mut status);
                Value::Object(status)
            })
            .collect::<Vec<_>>();

        let mut root = Map::new();
        root.insert("output".to_string(), Value::Array(outputs));
        root.insert("used".to_string(), Value::from(self.layout.used()));
        root.insert("paused".to_string(), Value::from(self.paused));
        root.insert("diagnostics".to_string(), self.diagnostics.to_json());
        Value::Object(root)
    }

    /// Main-loop tick: apply a pending reload, then start frames.
    ///
    /// A reload first pauses every driver and waits, across calls, until no
    /// frame is in flight.
    pub fn render(&mut self, now: Instant) {
        for driver in &mut self.drivers {
            driver.poll(now);
        }

        if let Some(document) = self.pending.take() {
            if !self.reload_paused {
                self.reload_paused = true;
                for driver in &mut self.drivers {
                    driver.pause(true);
                }
            }
            if !self.drivers.iter().all(OutputChannel::is_idle) {
                self.pending = Some(document);
                return;
            }

            if let Err(error) = self.process_config(&document) {
                self.diagnostics.record(Diagnostic::ConfigDocument(error));
            }
            self.reload_paused = false;
            if !self.paused {
                for driver in &mut self.drivers {
                    driver.pause(false);
                }
            }
        }

        if self.paused {
            return;
        }
        for driver in &mut self.drivers {
            let region = driver.buffer_region();
            if driver.is_idle() {
                region
                    .slice_mut(&mut self.frame)
                    .copy_from_slice(region.slice(&self.buffer));
            }
            driver.render(now, region.slice(&self.frame));
        }
    }

    /// Interrupt entry for the peripheral of `slot`.
    pub fn handle_interrupt(&mut self, slot: usize, event: InterruptEvent) {
        if let Some(driver) = self.drivers.get_mut(slot) {
            let frame = driver.buffer_region().slice(&self.frame);
            driver.on_interrupt(event, frame);
        }
    }

    /// Stop starting frames. Frames in flight still complete.
    pub fn pause_outputs(&mut self) {
        self.paused = true;
        for driver in &mut self.drivers {
            driver.pause(true);
        }
    }

    pub fn resume_outputs(&mut self) {
        self.paused = false;
        if self.reload_paused {
            return;
        }
        for driver in &mut self.drivers {
            driver.pause(false);
        }
    }

    /// Re-partition the shared buffer from the drivers' current needs.
    pub fn update_display_buffer_references(&mut self) {
        let layout = BufferLayout::partition(
            self.drivers.iter().map(OutputChannel::channels_needed),
            BUFFER_SIZE,
        );
        for (slot, driver) in self.drivers.iter_mut().enumerate() {
            driver.set_buffer_region(layout.region(slot));
        }
        for (slot, requested, granted) in layout.truncated() {
            self.diagnostics.record(Diagnostic::BufferExhausted {
                slot,
                requested,
                granted,
            });
        }
        self.listener.buffer_layout_changed(&layout);
        self.layout = layout;
    }

    /// Document with every slot disabled.
    ///
    /// Each slot entry also carries the default settings of every protocol
    /// the slot can run, keyed by protocol code.
    pub fn create_default_config(&self) -> Value {
        let mut channels = Map::new();
        for (slot, definition) in self.slots.iter().enumerate() {
            let mut entry = Map::new();
            entry.insert(
                TYPE_KEY.to_string(),
                Value::from(OutputType::Disabled.code()),
            );
            for output_type in OutputType::ALL {
                if !output_type.supported_on(definition.peripheral) {
                    continue;
                }
                let settings = OutputDriver::<B>::default_settings(output_type, slot, definition);
                if let Some(settings) = settings {
                    entry.insert(output_type.code().to_string(), Value::Object(settings));
                }
            }
            channels.insert(slot.to_string(), Value::Object(entry));
        }
        config::output_config(BUFFER_SIZE, channels)
    }

    /// Writable part of the shared buffer, up to the used size.
    ///
    /// Changes reach each slot with the next frame it starts.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        let used = self.layout.used().min(BUFFER_SIZE);
        &mut self.buffer[..used]
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..self.layout.used().min(BUFFER_SIZE)]
    }

    /// Copy `data` into the buffer at `offset`, clipped to the used size.
    ///
    /// Returns the number of bytes written.
    pub fn write_channels(&mut self, offset: usize, data: &[u8]) -> usize {
        let target = self.buffer_mut();
        if offset >= target.len() {
            return 0;
        }
        let count = data.len().min(target.len() - offset);
        target[offset..offset + count].copy_from_slice(&data[..count]);
        count
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut DiagnosticLog {
        &mut self.diagnostics
    }

    pub fn driver(&self, slot: usize) -> Option<&OutputDriver<B>> {
        self.drivers.get(slot)
    }

    pub fn driver_mut(&mut self, slot: usize) -> Option<&mut OutputDriver<B>> {
        self.drivers.get_mut(slot)
    }

    pub fn slots(&self) -> &[SlotDefinition; SLOTS] {
        &self.slots
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_reload_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Apply a configuration document to every slot.
    fn process_config(&mut self, document: &Value) -> Result<(), ConfigError> {
        let (body, channels) = config::document_sections(document)?;

        let version = body.get(VERSION_KEY).and_then(Value::as_u64);
        if version != Some(u64::from(CURRENT_CONFIG_VERSION)) {
            self.diagnostics.record(Diagnostic::ConfigVersion {
                found: version.unwrap_or(0),
                expected: CURRENT_CONFIG_VERSION,
            });
        }

        for slot in 0..SLOTS {
            let entry = channels.get(&slot.to_string()).and_then(Value::as_object);
            self.configure_slot(slot, entry);
        }
        self.channels = channels.clone();

        self.update_display_buffer_references();
        Ok(())
    }

    fn configure_slot(&mut self, slot: usize, entry: Option<&Map<String, Value>>) {
        let requested = entry
            .ok_or(ConfigError::MissingSection(CHANNELS_KEY))
            .and_then(config::type_code)
            .and_then(OutputType::from_code)
            .and_then(|output_type| {
                let settings = entry
                    .and_then(|entry| entry.get(&output_type.code().to_string()))
                    .and_then(Value::as_object);
                match (output_type, settings) {
                    (OutputType::Disabled, _) => Ok((output_type, None)),
                    (_, Some(settings)) => Ok((output_type, Some(settings))),
                    (_, None) => Err(ConfigError::MissingSection("output settings")),
                }
            });

        let (output_type, settings) = match requested {
            Ok(selection) => selection,
            Err(error) => {
                self.diagnostics.record(Diagnostic::SlotConfig { slot, error });
                (OutputType::Disabled, None)
            }
        };

        if self.drivers[slot].output_type() != output_type {
            // Release the old peripheral before the new driver claims it
            self.drivers[slot] = OutputDriver::disabled(slot);
            match OutputDriver::build(output_type, slot, &self.slots[slot], &mut self.board) {
                Ok(driver) => self.drivers[slot] = driver,
                Err(error) => {
                    self.diagnostics.record(Diagnostic::SlotConfig { slot, error });
                    return;
                }
            }
            if let Some(settings) = settings {
                if let Err(error) = self.drivers[slot].set_config(settings) {
                    self.diagnostics.record(Diagnostic::SlotConfig { slot, error });
                }
            }
            if let Err(error) = self.drivers[slot].begin() {
                self.diagnostics.record(Diagnostic::Hardware { slot, error });
            }
            if self.paused || self.reload_paused {
                self.drivers[slot].pause(true);
            }
        } else if let Some(settings) = settings {
            if let Err(error) = self.drivers[slot].set_config(settings) {
                self.diagnostics.record(Diagnostic::SlotConfig { slot, error });
            }
        }
    }
}
