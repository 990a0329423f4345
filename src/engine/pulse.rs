//! Pulse-train encoding engine.
//!
//! Streams one pulse code per intensity bit into the unit's hardware ring.
//! The ring is primed when a frame starts; afterwards every `BufferLow`
//! interrupt hands back the slots the hardware has consumed and the engine
//! tops the ring up again from the same lazy cursor.

use embassy_time::{Duration, Instant};

use super::{EncodingEngine, EngineStats, IntensitySource, TransmissionState};
use crate::error::HardwareError;
use crate::peripheral::{InterruptEvent, PulseCode, PulseTrain, PulseTrainConfig};
use crate::timing::FrameTimer;
use crate::translation::{BitGroups, PulseTable};

/// Share of the ring the hardware drains between two refill interrupts.
const REFILL_NUMERATOR: usize = 3;
const REFILL_DENOMINATOR: usize = 4;

/// Protocol variation points, fixed at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEngineConfig {
    pub table: PulseTable,
    pub clock_divider: u8,
    pub idle_level: bool,
    /// Gap codes sent before the first data bit
    pub inter_frame_slots: u8,
    /// Stop codes sent after the last data bit
    pub frame_stop_slots: u8,
    /// Bits used per intensity value (1-8)
    pub intensity_width: u8,
    pub min_frame_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillPhase {
    InterFrameGap(u8),
    FrameStart,
    Data,
    FrameStop(u8),
    EndMarker,
    Done,
}

/// Drives one pulse-train unit.
pub struct PixelEncodingEngine<P: PulseTrain> {
    unit: Option<P>,
    config: Option<PulseEngineConfig>,
    failure: Option<HardwareError>,
    state: TransmissionState,
    paused: bool,
    timer: FrameTimer,
    stats: EngineStats,

    // Interrupt-owned cursor
    phase: FillPhase,
    groups: BitGroups,
    inter_intensity_pending: bool,
    write_index: usize,
    free_slots: usize,
    ring_len: usize,
    slots_per_interrupt: usize,
    intensities: u32,
}

impl<P: PulseTrain> PixelEncodingEngine<P> {
    /// Wrap a unit handle, or record why none could be acquired.
    pub fn new(unit: Result<P, HardwareError>) -> Self {
        let (unit, failure) = match unit {
            Ok(unit) => (Some(unit), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            unit,
            config: None,
            failure,
            state: TransmissionState::Idle,
            paused: false,
            timer: FrameTimer::default(),
            stats: EngineStats::default(),
            phase: FillPhase::Done,
            groups: BitGroups::default(),
            inter_intensity_pending: false,
            write_index: 0,
            free_slots: 0,
            ring_len: 0,
            slots_per_interrupt: 0,
            intensities: 0,
        }
    }

    /// Configure the unit for a protocol. Safe to call again to reconfigure
    /// while no frame is in flight.
    pub fn begin(&mut self, config: PulseEngineConfig) -> Result<(), HardwareError> {
        let Some(unit) = self.unit.as_mut() else {
            return Err(self.failure.unwrap_or(HardwareError::NoPeripheral));
        };

        let ring_len = unit.ring_len();
        if ring_len < 2 {
            self.failure = Some(HardwareError::ConfigurationRejected);
            return Err(HardwareError::ConfigurationRejected);
        }
        let slots_per_interrupt = (ring_len * REFILL_NUMERATOR / REFILL_DENOMINATOR).max(1);

        unit.set_interrupts(false, false);
        let result = unit.configure(&PulseTrainConfig {
            clock_divider: config.clock_divider,
            idle_level: config.idle_level,
            refill_threshold: slots_per_interrupt,
        });
        if let Err(error) = result {
            self.failure = Some(error);
            self.config = None;
            return Err(error);
        }

        self.failure = None;
        self.ring_len = ring_len;
        self.slots_per_interrupt = slots_per_interrupt;
        self.timer.set_min_duration(config.min_frame_duration);
        self.config = Some(config);
        self.state = TransmissionState::Idle;
        self.phase = FillPhase::Done;
        Ok(())
    }

    pub fn unit(&self) -> Option<&P> {
        self.unit.as_ref()
    }

    pub fn unit_mut(&mut self) -> Option<&mut P> {
        self.unit.as_mut()
    }

    /// Produce the next ring entry for the current frame.
    fn next_code<S: IntensitySource>(
        &mut self,
        config: &PulseEngineConfig,
        source: &mut S,
        frame: &[u8],
    ) -> Option<PulseCode> {
        loop {
            match self.phase {
                FillPhase::InterFrameGap(remaining) => {
                    if remaining > 0 {
                        self.phase = FillPhase::InterFrameGap(remaining - 1);
                        return Some(config.table.inter_frame_gap);
                    }
                    self.phase = FillPhase::FrameStart;
                }
                FillPhase::FrameStart => {
                    self.phase = FillPhase::Data;
                    if let Some(code) = config.table.frame_start {
                        return Some(code);
                    }
                }
                FillPhase::Data => {
                    if let Some(group) = self.groups.next() {
                        return Some(config.table.data.lookup(group));
                    }
                    if self.inter_intensity_pending {
                        self.inter_intensity_pending = false;
                        if let Some(code) = config.table.inter_intensity {
                            return Some(code);
                        }
                    }
                    match source.next_intensity(frame) {
                        Some(value) => {
                            self.intensities += 1;
                            self.groups = BitGroups::new(
                                value,
                                config.intensity_width,
                                config.table.data.group_bits(),
                            );
                            self.inter_intensity_pending = config.table.inter_intensity.is_some();
                        }
                        None => self.phase = FillPhase::FrameStop(config.frame_stop_slots),
                    }
                }
                FillPhase::FrameStop(remaining) => {
                    if remaining > 0 {
                        self.phase = FillPhase::FrameStop(remaining - 1);
                        return Some(config.table.frame_stop);
                    }
                    self.phase = FillPhase::EndMarker;
                }
                FillPhase::EndMarker => {
                    self.phase = FillPhase::Done;
                    return Some(PulseCode::END);
                }
                FillPhase::Done => return None,
            }
        }
    }

    /// Top up the ring with as many codes as there are free slots.
    fn fill<S: IntensitySource>(&mut self, source: &mut S, frame: &[u8]) {
        let Some(config) = self.config else {
            return;
        };
        while self.free_slots > 0 {
            let Some(code) = self.next_code(&config, source, frame) else {
                break;
            };
            if let Some(unit) = self.unit.as_mut() {
                unit.write_slot(self.write_index, code);
            }
            self.write_index = (self.write_index + 1) % self.ring_len;
            self.free_slots -= 1;
        }
    }

    fn finish_frame(&mut self) {
        if let Some(unit) = self.unit.as_mut() {
            unit.set_interrupts(false, false);
        }
        self.stats.intensities_last_frame = self.intensities;
        self.state = TransmissionState::FrameComplete;
    }
}

impl<P: PulseTrain> EncodingEngine for PixelEncodingEngine<P> {
    fn render<S: IntensitySource>(&mut self, now: Instant, source: &mut S, frame: &[u8]) -> bool {
        self.poll(now);
        if self.failure.is_some() || self.config.is_none() || self.paused {
            return false;
        }
        if self.state.is_busy() || !self.timer.can_start(now) {
            self.stats.dropped_frames += 1;
            return false;
        }
        let Some(config) = self.config else {
            return false;
        };

        self.state = TransmissionState::Filling;
        self.timer.mark_start(now);
        source.start_frame();

        self.phase = FillPhase::InterFrameGap(config.inter_frame_slots);
        self.groups = BitGroups::default();
        self.inter_intensity_pending = false;
        self.write_index = 0;
        self.free_slots = self.ring_len;
        self.intensities = 0;

        self.fill(source, frame);

        let more_to_send = self.phase != FillPhase::Done;
        self.state = TransmissionState::Draining;
        self.stats.frames += 1;
        if let Some(unit) = self.unit.as_mut() {
            unit.set_interrupts(more_to_send, true);
            unit.start();
        }
        true
    }

    fn on_interrupt<S: IntensitySource>(
        &mut self,
        event: InterruptEvent,
        source: &mut S,
        frame: &[u8],
    ) {
        match event {
            InterruptEvent::BufferLow => {
                if self.state != TransmissionState::Draining || self.phase == FillPhase::Done {
                    return;
                }
                let refilled = self.free_slots + self.slots_per_interrupt;
                if refilled > self.ring_len {
                    self.stats.overruns += 1;
                }
                self.free_slots = refilled.min(self.ring_len);
                self.fill(source, frame);
                if self.phase == FillPhase::Done {
                    if let Some(unit) = self.unit.as_mut() {
                        unit.set_interrupts(false, true);
                    }
                }
            }
            InterruptEvent::TransmitEnd => {
                if self.state != TransmissionState::Draining {
                    return;
                }
                if self.phase != FillPhase::Done {
                    self.stats.incomplete_frames += 1;
                }
                self.finish_frame();
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
