//! The pool: a chain of blocks behind one lock.
//!
//! [`Pool`] hands out units from its blocks, newest block first. When no
//! block has a free unit it builds a new one and returns that block's
//! reserved unit 0. When a free leaves a block with every unit free, the
//! block is released to the byte allocator immediately.
//!
//! # Concurrency
//!
//! All state sits behind a single `Mutex`, held for the whole of each
//! `allocate` and `free`. There is no per-block locking.

#![allow(unsafe_code)]

use std::fmt;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;

use crate::block::Block;
use crate::config::{ConfigError, PoolConfig};
use crate::error::PoolError;
use crate::raw::{ByteAllocator, SystemBytes};
use crate::stats::{BlockId, BlockInfo, PoolStats};

/// A fixed-size-unit allocator.
///
/// Every unit is `config.aligned_unit_size()` bytes and starts on an
/// 8-byte boundary. The pool only hands out raw storage; placing a value
/// in a unit and dropping it again is the caller's job.
///
/// ```
/// use fixpool::{Pool, PoolConfig};
///
/// let pool = Pool::new(PoolConfig::new(24))?;
/// let unit = pool.allocate()?;
/// unsafe {
///     unit.cast::<[u64; 3]>().write([1, 2, 3]);
///     pool.free(unit)?;
/// }
/// assert_eq!(pool.block_count(), 0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// Dropping the pool releases every block. Units still held by callers at
/// that point dangle.
pub struct Pool<A: ByteAllocator = SystemBytes> {
    config: PoolConfig,
    unit_size: usize,
    bytes: A,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    /// Live blocks in creation order. Searches walk it newest-first.
    blocks: IndexMap<BlockId, Block>,
    next_id: u64,
    blocks_created: u64,
    blocks_reclaimed: u64,
    allocations: u64,
    frees: u64,
    failed_allocations: u64,
    rejected_frees: u64,
}

// Compile-time assertion: Pool must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Pool>();
};

impl Pool<SystemBytes> {
    /// Create an empty pool backed by the global heap.
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        Self::with_allocator(config, SystemBytes)
    }

    /// Create an empty pool sized for values of `T`, with default block sizes.
    pub fn for_type<T>() -> Result<Self, ConfigError> {
        Self::new(PoolConfig::for_type::<T>()?)
    }
}

impl<A: ByteAllocator> Pool<A> {
    /// Create an empty pool that obtains block memory from `bytes`.
    ///
    /// No memory is requested until the first [`allocate`](Self::allocate).
    pub fn with_allocator(config: PoolConfig, bytes: A) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            unit_size: config.aligned_unit_size(),
            config,
            bytes,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Allocate one unit.
    ///
    /// Takes the free-list head of the newest block that has a free unit.
    /// If every block is full (or there are none), builds a block of
    /// `initial_unit_count` units when the pool is empty and
    /// `growth_unit_count` units otherwise, and returns its unit 0.
    ///
    /// The returned address is not handed out again until it is passed
    /// to [`free`](Self::free).
    pub fn allocate(&self) -> Result<NonNull<u8>, PoolError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let reused = state.blocks.iter_mut().rev().find_map(|(&id, block)| {
            block
                .take_free()
                .map(|unit| (id, unit, block.free_count()))
        });
        if let Some((id, unit, remaining)) = reused {
            state.allocations += 1;
            tracing::trace!(block = %id, remaining, "allocated unit");
            return Ok(unit);
        }

        self.grow(state)
    }

    /// Return a unit to the pool.
    ///
    /// The unit goes to the head of its block's free list. If that leaves
    /// the block entirely free, the block is released.
    ///
    /// Addresses outside every live block, or not on a unit boundary, are
    /// rejected with [`PoolError::InvalidFree`] and change nothing. Freeing
    /// the unit most recently returned to its block a second time is
    /// rejected with [`PoolError::DoubleFree`]. A second free of a unit
    /// whose block was reclaimed meanwhile is rejected as
    /// [`PoolError::InvalidFree`].
    /// Other double frees are not detected.
    ///
    /// # Safety
    ///
    /// `unit` must have been returned by [`allocate`](Self::allocate) on
    /// this pool and not freed since. The caller must not access the unit
    /// after this call.
    pub unsafe fn free(&self, unit: NonNull<u8>) -> Result<(), PoolError> {
        let address = unit.as_ptr() as usize;
        let mut guard = self.lock();
        let state = &mut *guard;

        let found = state
            .blocks
            .iter_mut()
            .enumerate()
            .rev()
            .find_map(|(index, (&id, block))| {
                block.contains(address).then_some((index, id, block))
            });
        let Some((index, id, block)) = found else {
            state.rejected_frees += 1;
            tracing::warn!(address, "rejected free of address outside every block");
            return Err(PoolError::InvalidFree { address });
        };

        let unit_index = match block.give_back(address) {
            Ok(unit_index) => unit_index,
            Err(err) => {
                state.rejected_frees += 1;
                tracing::warn!(block = %id, address, error = %err, "rejected free");
                return Err(err);
            }
        };
        state.frees += 1;
        tracing::trace!(block = %id, unit = unit_index, free = block.free_count(), "freed unit");

        if block.is_fully_free() {
            if let Some((_, block)) = state.blocks.shift_remove_index(index) {
                // SAFETY: every block in the table was built with `self.bytes`,
                // and a fully free block has no unit held by any caller.
                unsafe { block.release(&self.bytes) };
                state.blocks_reclaimed += 1;
                tracing::debug!(
                    block = %id,
                    remaining_blocks = state.blocks.len(),
                    "block fully free, reclaimed"
                );
            }
        }
        Ok(())
    }

    /// Whether `unit` lies inside one of this pool's live blocks.
    pub fn owns(&self, unit: NonNull<u8>) -> bool {
        let address = unit.as_ptr() as usize;
        self.lock()
            .blocks
            .values()
            .any(|block| block.contains(address))
    }

    /// Aligned size of one unit in bytes.
    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// The configuration this pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The byte allocator backing this pool.
    pub fn allocator(&self) -> &A {
        &self.bytes
    }

    /// Number of live blocks.
    pub fn block_count(&self) -> usize {
        self.lock().blocks.len()
    }

    /// Snapshot of the pool's accounting.
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        let mut stats = PoolStats {
            unit_size: self.unit_size,
            block_count: state.blocks.len(),
            blocks_created: state.blocks_created,
            blocks_reclaimed: state.blocks_reclaimed,
            allocations: state.allocations,
            frees: state.frees,
            failed_allocations: state.failed_allocations,
            rejected_frees: state.rejected_frees,
            ..PoolStats::default()
        };
        for block in state.blocks.values() {
            stats.total_units += block.unit_count() as usize;
            stats.free_units += block.free_count() as usize;
            stats.resident_bytes += block.capacity();
        }
        stats.outstanding_units = stats.total_units - stats.free_units;
        stats
    }

    /// Live blocks in search order (newest first).
    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.lock()
            .blocks
            .iter()
            .rev()
            .map(|(&id, block)| BlockInfo {
                id,
                base: block.base_addr(),
                capacity: block.capacity(),
                unit_count: block.unit_count(),
                free_count: block.free_count(),
            })
            .collect()
    }

    fn grow(&self, state: &mut PoolState) -> Result<NonNull<u8>, PoolError> {
        let unit_count = if state.blocks.is_empty() {
            self.config.initial_unit_count
        } else {
            self.config.growth_unit_count
        };
        let block = match Block::new(&self.bytes, self.unit_size, unit_count) {
            Ok(block) => block,
            Err(err) => {
                state.failed_allocations += 1;
                tracing::warn!(
                    unit_count,
                    unit_size = self.unit_size,
                    error = %err,
                    "block allocation failed"
                );
                return Err(err);
            }
        };

        let id = BlockId(state.next_id);
        let unit = block.first_unit();
        let (capacity, base) = (block.capacity(), block.base_addr());
        state.blocks.insert(id, block);
        state.next_id += 1;
        state.blocks_created += 1;
        state.allocations += 1;
        tracing::debug!(block = %id, unit_count, capacity, base, "block created");
        Ok(unit)
    }

    // Every mutation completes before any call that can panic, so the
    // state behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: ByteAllocator> Drop for Pool<A> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let outstanding: usize = state
            .blocks
            .values()
            .map(|block| (block.unit_count() - block.free_count()) as usize)
            .sum();
        if outstanding > 0 {
            tracing::warn!(
                outstanding,
                blocks = state.blocks.len(),
                "pool dropped with units still allocated"
            );
        }
        for (_, block) in state.blocks.drain(..) {
            // SAFETY: built with `self.bytes`; units still held by callers
            // dangle from here on, as documented on `Pool`.
            unsafe { block.release(&self.bytes) };
        }
    }
}

impl<A: ByteAllocator> fmt::Debug for Pool<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
