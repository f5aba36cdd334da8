//! Fixed-capacity arenas of equal-sized units.
//!
//! A [`Block`] owns one arena of `unit_size * unit_count` bytes obtained
//! from a [`ByteAllocator`]. Free units are chained through their own first
//! two bytes: a free unit stores the index of the next free unit, and the
//! chain ends at [`NO_UNIT`]. No side table is kept.
//!
//! Unit 0 never starts on the free list. It is the unit handed to the
//! allocation that caused the block to be built, so a fresh block reports
//! `unit_count - 1` free units.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use crate::config::{block_layout, UNIT_ALIGN};
use crate::error::PoolError;
use crate::raw::ByteAllocator;

/// Free-list terminator. Also the value of `free_head` when nothing is free.
pub(crate) const NO_UNIT: u16 = u16::MAX;

/// One arena of units plus the head of its intrusive free list.
pub(crate) struct Block {
    /// Start of the arena; also the address of unit 0.
    base: NonNull<u8>,
    /// Layout the arena was requested with. Needed again on release.
    layout: Layout,
    /// Aligned unit size in bytes.
    unit_size: usize,
    unit_count: u16,
    /// Units currently on the free list.
    free_count: u16,
    /// Index of the first free unit, or [`NO_UNIT`].
    free_head: u16,
}

// SAFETY: a block exclusively owns its arena; the raw base pointer is never
// shared outside the block except as unit addresses handed to callers.
unsafe impl Send for Block {}

impl Block {
    /// Build a block of `unit_count` units and thread units `1..unit_count`
    /// onto its free list.
    ///
    /// `unit_size` must already be aligned to [`UNIT_ALIGN`].
    pub(crate) fn new<A: ByteAllocator>(
        bytes: &A,
        unit_size: usize,
        unit_count: u16,
    ) -> Result<Self, PoolError> {
        debug_assert!(unit_size >= std::mem::size_of::<u16>());
        debug_assert_eq!(unit_size % UNIT_ALIGN, 0);
        debug_assert!(unit_count >= 1);

        let layout = block_layout(unit_size, unit_count).ok_or(PoolError::OutOfMemory {
            requested: unit_size.saturating_mul(unit_count as usize),
        })?;
        let base = bytes
            .allocate_bytes(layout)
            .ok_or(PoolError::OutOfMemory {
                requested: layout.size(),
            })?;

        let mut block = Self {
            base,
            layout,
            unit_size,
            unit_count,
            free_count: unit_count - 1,
            free_head: if unit_count > 1 { 1 } else { NO_UNIT },
        };
        for index in 1..unit_count {
            let next = if index + 1 < unit_count {
                index + 1
            } else {
                NO_UNIT
            };
            block.write_link(index, next);
        }
        block.debug_check_chain();
        Ok(block)
    }

    /// The reserved unit 0, given to the allocation that built this block.
    pub(crate) fn first_unit(&self) -> NonNull<u8> {
        self.base
    }

    /// Pop the head of the free list.
    ///
    /// Returns `None` when the block has no free units; the stored link of
    /// a unit is never read in that state.
    pub(crate) fn take_free(&mut self) -> Option<NonNull<u8>> {
        if self.free_count == 0 {
            return None;
        }
        let index = self.free_head;
        let unit = self.unit_ptr(index);
        self.free_head = self.read_link(index);
        self.free_count -= 1;
        self.debug_check_chain();
        Some(unit)
    }

    /// Push the unit starting at `address` onto the free list.
    ///
    /// Rejects addresses outside the arena or not on a unit boundary. A
    /// free into a block that is already entirely free, or of the unit at
    /// the head of the free list, is a double free. Returns the unit's
    /// index on success.
    pub(crate) fn give_back(&mut self, address: usize) -> Result<u16, PoolError> {
        if !self.contains(address) {
            return Err(PoolError::InvalidFree { address });
        }
        let offset = address - self.base_addr();
        if offset % self.unit_size != 0 {
            return Err(PoolError::InvalidFree { address });
        }
        if self.free_count == self.unit_count {
            return Err(PoolError::DoubleFree { address });
        }

        let index = (offset / self.unit_size) as u16;
        if self.free_count > 0 && index == self.free_head {
            return Err(PoolError::DoubleFree { address });
        }
        self.write_link(index, self.free_head);
        self.free_head = index;
        self.free_count += 1;
        self.debug_check_chain();
        Ok(index)
    }

    /// Whether `address` falls in `[base, base + capacity)`.
    pub(crate) fn contains(&self, address: usize) -> bool {
        let base = self.base_addr();
        address >= base && address - base < self.capacity()
    }

    /// True once every unit, including the reserved unit 0, is free.
    pub(crate) fn is_fully_free(&self) -> bool {
        self.free_count as usize * self.unit_size == self.capacity()
    }

    /// Arena size in bytes.
    pub(crate) fn capacity(&self) -> usize {
        self.layout.size()
    }

    pub(crate) fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub(crate) fn unit_count(&self) -> u16 {
        self.unit_count
    }

    pub(crate) fn free_count(&self) -> u16 {
        self.free_count
    }

    /// Hand the arena back to the byte allocator.
    ///
    /// # Safety
    ///
    /// `bytes` must be the allocator this block was built with. No unit
    /// address of this block may be used afterwards.
    pub(crate) unsafe fn release<A: ByteAllocator>(self, bytes: &A) {
        let block = ManuallyDrop::new(self);
        // SAFETY: the arena came from `bytes.allocate_bytes(block.layout)`
        // per the caller contract, and the block is consumed.
        unsafe { bytes.release_bytes(block.base, block.layout) }
    }

    /// Number of units reachable from `free_head`.
    ///
    /// Stops after `unit_count` steps so a corrupted chain cannot loop.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn free_chain_len(&self) -> usize {
        let mut len = 0;
        let mut index = self.free_head;
        while index != NO_UNIT && len <= self.unit_count as usize {
            len += 1;
            index = self.read_link(index);
        }
        len
    }

    #[inline]
    fn debug_check_chain(&self) {
        #[cfg(debug_assertions)]
        debug_assert_eq!(
            self.free_chain_len(),
            self.free_count as usize,
            "free chain disagrees with free count"
        );
    }

    fn unit_ptr(&self, index: u16) -> NonNull<u8> {
        assert!(index < self.unit_count, "unit index {index} out of range");
        // SAFETY: index < unit_count, so the offset is inside the arena.
        unsafe { self.base.add(index as usize * self.unit_size) }
    }

    fn read_link(&self, index: u16) -> u16 {
        // SAFETY: the unit is inside the arena, aligned to UNIT_ALIGN, and
        // free, so its first two bytes hold a link written by `write_link`.
        unsafe { self.unit_ptr(index).cast::<u16>().as_ptr().read() }
    }

    fn write_link(&mut self, index: u16, next: u16) {
        // SAFETY: the unit is inside the arena, aligned to UNIT_ALIGN, and
        // not held by any caller.
        unsafe { self.unit_ptr(index).cast::<u16>().as_ptr().write(next) }
    }
}

// Dropping a block without `release` leaks its arena.
impl Drop for Block {
    fn drop(&mut self) {
        tracing::warn!(
            base = self.base_addr(),
            capacity = self.capacity(),
            "block dropped without release, arena leaked"
        );
    }
}
