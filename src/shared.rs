//! Interrupt-safe access to the output manager.
//!
//! The main loop and the peripheral interrupt handlers reach the single
//! [`OutputManager`] through a critical section, so a refill never observes
//! a half-started frame.

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_time::Instant;

use crate::board::Board;
use crate::layout::CapacityListener;
use crate::manager::OutputManager;
use crate::peripheral::InterruptEvent;

/// Critical-section guarded [`OutputManager`].
pub struct SharedOutputs<B, L, const SLOTS: usize, const BUFFER_SIZE: usize>
where
    B: Board,
    L: CapacityListener,
{
    inner: Mutex<RefCell<OutputManager<B, L, SLOTS, BUFFER_SIZE>>>,
}

impl<B, L, const SLOTS: usize, const BUFFER_SIZE: usize> SharedOutputs<B, L, SLOTS, BUFFER_SIZE>
where
    B: Board,
    L: CapacityListener,
{
    pub const fn new(manager: OutputManager<B, L, SLOTS, BUFFER_SIZE>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(manager)),
        }
    }

    /// Run `f` with exclusive access to the manager.
    pub fn with<R>(&self, f: impl FnOnce(&mut OutputManager<B, L, SLOTS, BUFFER_SIZE>) -> R) -> R {
        critical_section::with(|cs| {
            let mut manager = self.inner.borrow(cs).borrow_mut();
            f(&mut manager)
        })
    }

    /// Main-loop tick.
    pub fn render(&self, now: Instant) {
        self.with(|manager| manager.render(now));
    }

    /// Forward a peripheral interrupt of `slot`.
    pub fn on_interrupt(&self, slot: usize, event: InterruptEvent) {
        self.with(|manager| manager.handle_interrupt(slot, event));
    }

    /// Copy input data into the shared buffer.
    pub fn write_channels(&self, offset: usize, data: &[u8]) -> usize {
        self.with(|manager| manager.write_channels(offset, data))
    }

    pub fn into_inner(self) -> OutputManager<B, L, SLOTS, BUFFER_SIZE> {
        self.inner.into_inner().into_inner()
    }
}
