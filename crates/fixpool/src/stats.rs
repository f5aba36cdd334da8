//! Pool diagnostics.
//!
//! [`PoolStats`] is a point-in-time copy of the pool's accounting, taken
//! under the pool lock. [`BlockInfo`] describes one live block.

use std::fmt;

/// Identifier of a block, unique for the lifetime of its pool.
///
/// Ids increase with creation order, so a larger id is a newer block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// Accounting snapshot of a [`Pool`](crate::Pool).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Aligned unit size in bytes.
    pub unit_size: usize,
    /// Number of live blocks.
    pub block_count: usize,
    /// Units across all live blocks.
    pub total_units: usize,
    /// Units available without growing.
    pub free_units: usize,
    /// Units currently held by callers.
    pub outstanding_units: usize,
    /// Arena bytes held from the byte allocator.
    pub resident_bytes: usize,
    /// Cumulative number of blocks built.
    pub blocks_created: u64,
    /// Cumulative number of blocks released after becoming fully free.
    pub blocks_reclaimed: u64,
    /// Cumulative number of successful `allocate` calls.
    pub allocations: u64,
    /// Cumulative number of successful `free` calls.
    pub frees: u64,
    /// Cumulative number of `allocate` calls that failed with out-of-memory.
    pub failed_allocations: u64,
    /// Cumulative number of `free` calls rejected as invalid or double frees.
    pub rejected_frees: u64,
}

/// Description of one live block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// The block's id.
    pub id: BlockId,
    /// Address of unit 0.
    pub base: usize,
    /// Arena size in bytes.
    pub capacity: usize,
    /// Units in the block.
    pub unit_count: u16,
    /// Units currently free.
    pub free_count: u16,
}

impl BlockInfo {
    /// Whether `address` lies inside this block's arena.
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address - self.base < self.capacity
    }
}
