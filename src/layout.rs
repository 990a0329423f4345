//! Shared frame buffer partitioning.
//!
//! Slots receive contiguous regions in slot order. When the buffer cannot
//! hold every request, later slots are truncated (possibly to zero) and the
//! manager reports the shortfall; nothing fails.

use heapless::Vec;

/// Most slots a layout can describe.
pub const MAX_SLOTS: usize = 16;

/// A slot's window into the shared buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferRegion {
    pub offset: usize,
    pub len: usize,
}

impl BufferRegion {
    pub const EMPTY: Self = Self { offset: 0, len: 0 };

    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Borrow this region out of `buffer`, clamped to its length.
    pub fn slice<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        let start = self.offset.min(buffer.len());
        let end = self.end().min(buffer.len());
        &buffer[start..end]
    }

    pub fn slice_mut<'a>(&self, buffer: &'a mut [u8]) -> &'a mut [u8] {
        let start = self.offset.min(buffer.len());
        let end = self.end().min(buffer.len());
        &mut buffer[start..end]
    }
}

/// Result of partitioning the shared buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferLayout {
    regions: Vec<BufferRegion, MAX_SLOTS>,
    requested: Vec<usize, MAX_SLOTS>,
    used: usize,
    capacity: usize,
}

impl BufferLayout {
    /// Grant every slot `min(needed, remaining)` bytes, in slot order.
    pub fn partition<I>(needs: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut layout = Self {
            capacity,
            ..Self::default()
        };
        for needed in needs.into_iter().take(MAX_SLOTS) {
            let granted = needed.min(capacity - layout.used);
            // Both vectors share the `take` bound above
            let _ = layout.regions.push(BufferRegion::new(layout.used, granted));
            let _ = layout.requested.push(needed);
            layout.used += granted;
        }
        layout
    }

    pub fn region(&self, slot: usize) -> BufferRegion {
        self.regions.get(slot).copied().unwrap_or(BufferRegion::EMPTY)
    }

    pub fn regions(&self) -> &[BufferRegion] {
        &self.regions
    }

    pub fn requested(&self, slot: usize) -> usize {
        self.requested.get(slot).copied().unwrap_or(0)
    }

    /// Bytes handed out
    pub const fn used(&self) -> usize {
        self.used
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated().next().is_some()
    }

    /// `(slot, requested, granted)` for every slot that got less than it asked for.
    pub fn truncated(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.regions
            .iter()
            .zip(self.requested.iter())
            .enumerate()
            .filter(|(_, (region, requested))| region.len < **requested)
            .map(|(slot, (region, requested))| (slot, *requested, region.len))
    }
}

/// Receives the buffer layout whenever it changes.
///
/// The input side uses it to know how many channels it may write and where
/// each slot's data lives.
pub trait CapacityListener {
    fn buffer_layout_changed(&mut self, layout: &BufferLayout);
}

impl CapacityListener for () {
    fn buffer_layout_changed(&mut self, _layout: &BufferLayout) {}
}
