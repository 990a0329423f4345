#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal::i2c::{self, I2c, Operation};
use embedded_hal::pwm::{ErrorType as PwmErrorType, SetDutyCycle};
use embedded_hal::spi::{self, SpiBus};
use myrtio_output_channels::board::RELAY_COUNT;
use myrtio_output_channels::peripheral::{BreakTiming, PulseTrainConfig, SerialConfig};
use myrtio_output_channels::{
    Board, ConfigStore, HardwareError, InterruptEvent, PulseCode, PulseTrain, SerialPort,
    SlotDefinition, StoreError,
};
use serde_json::Value;

pub const RING_LEN: usize = 64;
pub const FIFO_LEN: usize = 128;

// Pulse-train unit

#[derive(Debug, Default)]
pub struct RingState {
    pub ring: Vec<PulseCode>,
    pub config: Option<PulseTrainConfig>,
    pub reject_config: bool,
    pub buffer_low: bool,
    pub transmit_end: bool,
    pub starts: usize,
    pub read_index: usize,
    pub sent: Vec<PulseCode>,
}

pub struct MockPulseTrain {
    pub state: Rc<RefCell<RingState>>,
}

impl PulseTrain for MockPulseTrain {
    fn configure(&mut self, config: &PulseTrainConfig) -> Result<(), HardwareError> {
        let mut state = self.state.borrow_mut();
        if state.reject_config {
            return Err(HardwareError::ConfigurationRejected);
        }
        state.config = Some(*config);
        Ok(())
    }

    fn ring_len(&self) -> usize {
        RING_LEN
    }

    fn write_slot(&mut self, index: usize, code: PulseCode) {
        let mut state = self.state.borrow_mut();
        if state.ring.len() < RING_LEN {
            state.ring.resize(RING_LEN, PulseCode::END);
        }
        state.ring[index] = code;
    }

    fn start(&mut self) {
        let mut state = self.state.borrow_mut();
        state.starts += 1;
        state.read_index = 0;
        state.sent.clear();
    }

    fn set_interrupts(&mut self, buffer_low: bool, transmit_end: bool) {
        let mut state = self.state.borrow_mut();
        state.buffer_low = buffer_low;
        state.transmit_end = transmit_end;
    }
}

/// Play the ring out, raising interrupts the way the hardware does.
pub fn drain_pulse_train(state: &Rc<RefCell<RingState>>, mut interrupt: impl FnMut(InterruptEvent)) {
    for _ in 0..10_000 {
        let (ended, event) = {
            let mut state = state.borrow_mut();
            let threshold = state.config.map(|c| c.refill_threshold).unwrap_or(RING_LEN);
            let mut ended = false;
            for _ in 0..threshold {
                let code = state.ring[state.read_index];
                state.read_index = (state.read_index + 1) % RING_LEN;
                if code.is_end() {
                    ended = true;
                    break;
                }
                state.sent.push(code);
            }
            let event = if ended {
                state.transmit_end.then_some(InterruptEvent::TransmitEnd)
            } else {
                state.buffer_low.then_some(InterruptEvent::BufferLow)
            };
            (ended, event)
        };
        if let Some(event) = event {
            interrupt(event);
        }
        if ended {
            return;
        }
    }
    panic!("pulse train never reached the end marker");
}

/// Decode data bits from sent pulse codes; gap and stop codes are skipped.
pub fn decode_bytes(codes: &[PulseCode], one: PulseCode, zero: PulseCode) -> Vec<u8> {
    let bits: Vec<u8> = codes
        .iter()
        .filter_map(|code| {
            if *code == one {
                Some(1)
            } else if *code == zero {
                Some(0)
            } else {
                None
            }
        })
        .collect();
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, bit| (acc << 1) | bit))
        .collect()
}

// Serial unit

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartItem {
    Byte(u8),
    Break(BreakTiming),
}

#[derive(Debug, Default)]
pub struct UartState {
    pub config: Option<SerialConfig>,
    pub reject_config: bool,
    pub fifo: VecDeque<UartItem>,
    pub fifo_low: bool,
    pub transmit_done: bool,
    pub sent: Vec<UartItem>,
}

impl UartState {
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent
            .iter()
            .filter_map(|item| match item {
                UartItem::Byte(byte) => Some(*byte),
                UartItem::Break(_) => None,
            })
            .collect()
    }
}

pub struct MockSerial {
    pub state: Rc<RefCell<UartState>>,
}

impl SerialPort for MockSerial {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), HardwareError> {
        let mut state = self.state.borrow_mut();
        if state.reject_config {
            return Err(HardwareError::ConfigurationRejected);
        }
        state.config = Some(*config);
        Ok(())
    }

    fn fifo_free(&self) -> usize {
        let state = self.state.borrow();
        let used = state
            .fifo
            .iter()
            .filter(|item| matches!(item, UartItem::Byte(_)))
            .count();
        FIFO_LEN - used
    }

    fn fifo_len(&self) -> usize {
        FIFO_LEN
    }

    fn write_byte(&mut self, byte: u8) {
        self.state.borrow_mut().fifo.push_back(UartItem::Byte(byte));
    }

    fn queue_break(&mut self, timing: BreakTiming) {
        self.state.borrow_mut().fifo.push_back(UartItem::Break(timing));
    }

    fn set_interrupts(&mut self, fifo_low: bool, transmit_done: bool) {
        let mut state = self.state.borrow_mut();
        state.fifo_low = fifo_low;
        state.transmit_done = transmit_done;
    }
}

/// Shift the FIFO out until the engine stops feeding it.
pub fn drain_serial(state: &Rc<RefCell<UartState>>, mut interrupt: impl FnMut(InterruptEvent)) {
    for _ in 0..10_000 {
        let event = {
            let mut state = state.borrow_mut();
            while let Some(item) = state.fifo.pop_front() {
                state.sent.push(item);
            }
            if state.fifo_low {
                Some(InterruptEvent::BufferLow)
            } else if state.transmit_done {
                Some(InterruptEvent::TransmitEnd)
            } else {
                None
            }
        };
        match event {
            Some(InterruptEvent::TransmitEnd) => {
                interrupt(InterruptEvent::TransmitEnd);
                return;
            }
            Some(event) => interrupt(event),
            None => return,
        }
    }
    panic!("serial engine never finished the frame");
}

/// Line levels of one 6N1 character: start bit, d0..d5 LSB first, stop bit.
pub fn six_n1_levels(character: u8, invert: bool) -> Vec<u8> {
    let mut levels = vec![0];
    levels.extend((0..6).map(|bit| (character >> bit) & 1));
    levels.push(1);
    if invert {
        for level in &mut levels {
            *level ^= 1;
        }
    }
    levels
}

/// Recover clockless bits from 6N1 characters: four line bit times per data
/// bit, a one holds `active` for more than half of them.
pub fn decode_clockless_line(characters: &[u8], invert: bool, active: u8) -> Vec<u8> {
    let levels: Vec<u8> = characters
        .iter()
        .flat_map(|&character| six_n1_levels(character, invert))
        .collect();
    let bits: Vec<u8> = levels
        .chunks(4)
        .map(|cell| {
            assert_eq!(cell[0], active, "every bit starts at the active level");
            u8::from(cell.iter().filter(|&&level| level == active).count() > 2)
        })
        .collect();
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, bit| (acc << 1) | bit))
        .collect()
}

// SPI bus

#[derive(Debug, Default)]
pub struct SpiState {
    pub writes: Vec<Vec<u8>>,
    pub flushes: usize,
    pub fail: bool,
}

pub struct MockSpi {
    pub state: Rc<RefCell<SpiState>>,
}

impl spi::ErrorType for MockSpi {
    type Error = spi::ErrorKind;
}

impl SpiBus<u8> for MockSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        words.fill(0);
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail {
            return Err(spi::ErrorKind::Other);
        }
        state.writes.push(words.to_vec());
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        read.fill(0);
        self.write(write)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let data = words.to_vec();
        self.write(&data)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().flushes += 1;
        Ok(())
    }
}

// I2C bus

#[derive(Debug, Default)]
pub struct I2cState {
    /// `(address, bytes)` of every write
    pub writes: Vec<(u8, Vec<u8>)>,
    pub fail: bool,
}

pub struct MockI2c {
    pub state: Rc<RefCell<I2cState>>,
}

impl i2c::ErrorType for MockI2c {
    type Error = i2c::ErrorKind;
}

impl I2c for MockI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail {
            return Err(i2c::ErrorKind::Other);
        }
        for operation in operations {
            match operation {
                Operation::Write(bytes) => state.writes.push((address, bytes.to_vec())),
                Operation::Read(buffer) => buffer.fill(0),
            }
        }
        Ok(())
    }
}

// Relay pins

#[derive(Debug, Default)]
pub struct PinState {
    pub high: bool,
    pub duty: u16,
    pub writes: usize,
}

pub struct MockPin {
    pub state: Rc<RefCell<PinState>>,
}

impl PinErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.high = false;
        state.writes += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.high = true;
        state.writes += 1;
        Ok(())
    }
}

impl PwmErrorType for MockPin {
    type Error = Infallible;
}

impl SetDutyCycle for MockPin {
    fn max_duty_cycle(&self) -> u16 {
        255
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.duty = duty;
        state.writes += 1;
        Ok(())
    }
}

// Board

pub struct MockBoard {
    pub pulse_trains: Vec<Rc<RefCell<RingState>>>,
    pub uarts: Vec<Rc<RefCell<UartState>>>,
    pub spi: Rc<RefCell<SpiState>>,
    pub i2c: Rc<RefCell<I2cState>>,
    pub pins: Vec<Rc<RefCell<PinState>>>,
    pub acquisitions: usize,
}

impl MockBoard {
    pub fn new() -> Self {
        Self {
            pulse_trains: (0..2).map(|_| Rc::default()).collect(),
            uarts: (0..2).map(|_| Rc::default()).collect(),
            spi: Rc::default(),
            i2c: Rc::default(),
            pins: (0..RELAY_COUNT).map(|_| Rc::default()).collect(),
            acquisitions: 0,
        }
    }
}

impl Board for MockBoard {
    type PulseTrain = MockPulseTrain;
    type Serial = MockSerial;
    type Spi = MockSpi;
    type I2c = MockI2c;
    type RelayPin = MockPin;

    fn pulse_train(
        &mut self,
        unit: u8,
        _pin: Option<u8>,
    ) -> Result<Self::PulseTrain, HardwareError> {
        let state = self
            .pulse_trains
            .get(unit as usize)
            .ok_or(HardwareError::Unavailable(unit))?;
        self.acquisitions += 1;
        Ok(MockPulseTrain {
            state: Rc::clone(state),
        })
    }

    fn serial_port(&mut self, unit: u8, _pin: Option<u8>) -> Result<Self::Serial, HardwareError> {
        let state = self
            .uarts
            .get(unit as usize)
            .ok_or(HardwareError::Unavailable(unit))?;
        self.acquisitions += 1;
        Ok(MockSerial {
            state: Rc::clone(state),
        })
    }

    fn spi_bus(&mut self, _slot: usize) -> Result<Self::Spi, HardwareError> {
        self.acquisitions += 1;
        Ok(MockSpi {
            state: Rc::clone(&self.spi),
        })
    }

    fn i2c_bus(&mut self, _slot: usize) -> Result<Self::I2c, HardwareError> {
        self.acquisitions += 1;
        Ok(MockI2c {
            state: Rc::clone(&self.i2c),
        })
    }

    fn relay_pins(
        &mut self,
        _slot: usize,
    ) -> Result<heapless::Vec<Self::RelayPin, RELAY_COUNT>, HardwareError> {
        self.acquisitions += 1;
        let mut pins = heapless::Vec::new();
        for state in &self.pins {
            let _ = pins.push(MockPin {
                state: Rc::clone(state),
            });
        }
        Ok(pins)
    }
}

/// Pulse train, serial, SPI and relay slot, in that order.
pub fn board_slots() -> [SlotDefinition; 4] {
    [
        SlotDefinition::pulse_train(2, 0),
        SlotDefinition::serial(4, 1),
        SlotDefinition::spi(18),
        SlotDefinition::relay(),
    ]
}

// Config store

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub document: Option<Value>,
    pub saves: usize,
    pub fail_save: bool,
}

impl ConfigStore for MemoryStore {
    fn load(&mut self) -> Result<Value, StoreError> {
        self.document.clone().ok_or(StoreError::NotFound)
    }

    fn save(&mut self, document: &Value) -> Result<(), StoreError> {
        if self.fail_save {
            return Err(StoreError::WriteFailed);
        }
        self.saves += 1;
        self.document = Some(document.clone());
        Ok(())
    }
}
