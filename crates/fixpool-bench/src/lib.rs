//! Benchmark workloads for the fixpool allocator.
//!
//! Provides deterministic allocate/free workloads:
//!
//! - [`HeapNode`]: a small node type of the kind pools are built for
//! - [`shuffled_order`]: a seeded permutation for freeing in random order
//! - [`churn_plan`] / [`run_churn`]: a seeded mix of allocations and frees

#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::ptr::NonNull;

use fixpool::{ByteAllocator, Pool, PoolError};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A 24-byte tree node, the typical pooled object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapNode {
    pub key: u64,
    pub left: u32,
    pub right: u32,
    pub payload: u64,
}

/// One step of a churn workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChurnOp {
    /// Allocate one unit.
    Allocate,
    /// Free the outstanding unit at this position (modulo the live count).
    Free(usize),
}

/// Generate a permutation of `0..n` from `seed` (Fisher-Yates).
pub fn shuffled_order(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        order.swap(i, j);
    }
    order
}

/// Generate `len` churn steps, allocating with probability
/// `alloc_percent / 100`.
pub fn churn_plan(len: usize, alloc_percent: u32, seed: u64) -> Vec<ChurnOp> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            if rng.next_u32() % 100 < alloc_percent {
                ChurnOp::Allocate
            } else {
                ChurnOp::Free(rng.next_u64() as usize)
            }
        })
        .collect()
}

/// Execute a churn plan against `pool`, then free everything still held.
///
/// Returns the peak number of units held at once. Stops at the first
/// allocation or free the pool rejects; units still held at that point
/// stay outstanding until the pool is dropped.
#[allow(unsafe_code)]
pub fn run_churn<A: ByteAllocator>(
    pool: &Pool<A>,
    plan: &[ChurnOp],
) -> Result<usize, PoolError> {
    let mut live: Vec<NonNull<u8>> = Vec::new();
    let mut peak = 0;
    for op in plan {
        match *op {
            ChurnOp::Allocate => {
                let unit = pool.allocate()?;
                // SAFETY: units are at least 8 bytes and 8-aligned.
                unsafe { unit.cast::<u64>().write(live.len() as u64) };
                live.push(unit);
                peak = peak.max(live.len());
            }
            ChurnOp::Free(k) if !live.is_empty() => {
                let unit = live.swap_remove(k % live.len());
                // SAFETY: `unit` came from this pool and is freed once.
                unsafe { pool.free(unit)? };
            }
            ChurnOp::Free(_) => {}
        }
    }
    for unit in live {
        // SAFETY: as above.
        unsafe { pool.free(unit)? };
    }
    Ok(peak)
}
