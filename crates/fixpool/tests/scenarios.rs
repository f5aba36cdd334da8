//! Integration test: pool behavior observed through a counting byte allocator.
//!
//! Covers the reuse, growth, and reclamation scenarios end to end, and
//! checks that every block the pool builds is released exactly once.

use std::ptr::NonNull;

use fixpool::{Pool, PoolConfig, PoolError};
use fixpool_test_utils::{init_tracing, CountingBytes, FailingBytes};

fn addr(unit: NonNull<u8>) -> usize {
    unit.as_ptr() as usize
}

/// Default sizing: first block of 3 units, grown blocks of 10.
fn default_config() -> PoolConfig {
    PoolConfig::new(4)
}

#[test]
fn reuse_then_full_reclamation() {
    init_tracing();
    let bytes = CountingBytes::new();
    let pool = Pool::with_allocator(default_config(), &bytes).unwrap();

    let a = pool.allocate().unwrap();
    assert_eq!(bytes.allocations(), 1);
    let block = pool.blocks()[0].clone();
    assert_eq!(block.unit_count, 3);
    assert!(block.contains(addr(a)));

    let b = pool.allocate().unwrap();
    let c = pool.allocate().unwrap();
    unsafe { pool.free(a).unwrap() };
    let d = pool.allocate().unwrap();
    assert_eq!(d, a);

    unsafe {
        pool.free(b).unwrap();
        pool.free(c).unwrap();
        assert_eq!(bytes.releases(), 0);
        pool.free(d).unwrap();
    }
    assert_eq!(bytes.releases(), 1);
    assert_eq!(bytes.live_bytes(), 0);
    assert_eq!(pool.block_count(), 0);
}

#[test]
fn fourth_allocation_creates_exactly_one_growth_block() {
    init_tracing();
    let bytes = CountingBytes::new();
    let pool = Pool::with_allocator(default_config(), &bytes).unwrap();

    let units: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(bytes.allocations(), 1);

    let fourth = pool.allocate().unwrap();
    assert_eq!(bytes.allocations(), 2);
    assert_eq!(bytes.live_bytes(), (3 + 10) * 8);

    let blocks = pool.blocks();
    assert_eq!(blocks[0].unit_count, 10);
    assert!(blocks[0].contains(addr(fourth)));
    for unit in &units {
        assert!(!blocks[0].contains(addr(*unit)));
    }

    // The next nine allocations fit in the growth block.
    let more: Vec<_> = (0..9).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(bytes.allocations(), 2);
    assert!(more.iter().all(|u| blocks[0].contains(addr(*u))));

    for unit in units.into_iter().chain(more).chain([fourth]) {
        unsafe { pool.free(unit).unwrap() };
    }
    assert_eq!(bytes.releases(), 2);
}

#[test]
fn reclaiming_the_older_block_keeps_the_newer_one() {
    let bytes = CountingBytes::new();
    let pool = Pool::with_allocator(default_config(), &bytes).unwrap();

    let old: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
    let new = pool.allocate().unwrap();
    let new_block = pool.blocks()[0].id;

    for unit in old.into_iter().rev() {
        unsafe { pool.free(unit).unwrap() };
    }
    assert_eq!(bytes.releases(), 1);
    let blocks = pool.blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].id, new_block);

    // Growth while a block is live uses the growth size, and a fully free
    // pool starts over with the initial size.
    unsafe { pool.free(new).unwrap() };
    let again = pool.allocate().unwrap();
    assert_eq!(pool.blocks()[0].unit_count, 3);
    unsafe { pool.free(again).unwrap() };
}

#[test]
fn drop_releases_every_block_once() {
    let bytes = CountingBytes::new();
    {
        let pool = Pool::with_allocator(default_config(), &bytes).unwrap();
        for _ in 0..40 {
            pool.allocate().unwrap();
        }
        assert_eq!(pool.block_count(), 5);
    }
    assert_eq!(bytes.allocations(), 5);
    assert_eq!(bytes.releases(), 5);
    assert_eq!(bytes.live_bytes(), 0);
}

#[test]
fn out_of_memory_is_reported_and_recoverable() {
    init_tracing();
    let bytes = FailingBytes::new();
    let pool = Pool::with_allocator(default_config(), &bytes).unwrap();

    bytes.set_failing(true);
    assert_eq!(
        pool.allocate(),
        Err(PoolError::OutOfMemory { requested: 24 })
    );
    assert_eq!(pool.block_count(), 0);
    assert_eq!(pool.stats().failed_allocations, 1);

    bytes.set_failing(false);
    let unit = pool.allocate().unwrap();
    assert_eq!(pool.block_count(), 1);
    unsafe { pool.free(unit).unwrap() };
}

#[test]
fn growth_failure_leaves_existing_blocks_usable() {
    let bytes = FailingBytes::with_budget(1);
    let pool = Pool::with_allocator(default_config(), &bytes).unwrap();

    let units: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(
        pool.allocate(),
        Err(PoolError::OutOfMemory { requested: 80 })
    );
    assert_eq!(bytes.refusals(), 1);

    // Capacity freed after the failure is served without growing.
    unsafe { pool.free(units[1]).unwrap() };
    let unit = pool.allocate().unwrap();
    assert_eq!(unit, units[1]);
    assert_eq!(bytes.counts().allocations(), 1);
}

#[test]
fn invalid_frees_are_rejected() {
    init_tracing();
    let pool = Pool::new(PoolConfig::new(16)).unwrap();
    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();

    let mut outside = [0u64; 2];
    let foreign = NonNull::from(&mut outside).cast::<u8>();
    assert_eq!(
        unsafe { pool.free(foreign) },
        Err(PoolError::InvalidFree {
            address: addr(foreign)
        })
    );

    let misaligned = unsafe { b.add(8) };
    assert_eq!(
        unsafe { pool.free(misaligned) },
        Err(PoolError::InvalidFree {
            address: addr(misaligned)
        })
    );

    let stats = pool.stats();
    assert_eq!(stats.rejected_frees, 2);
    assert_eq!(stats.outstanding_units, 2);

    unsafe {
        pool.free(a).unwrap();
        pool.free(b).unwrap();
    }
    assert_eq!(pool.block_count(), 0);
}

#[test]
fn repeated_free_is_reported_as_double_free() {
    init_tracing();
    let bytes = CountingBytes::new();
    let pool = Pool::with_allocator(default_config(), &bytes).unwrap();
    let units: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();

    unsafe { pool.free(units[1]).unwrap() };
    let before = pool.stats();
    assert_eq!(
        unsafe { pool.free(units[1]) },
        Err(PoolError::DoubleFree {
            address: addr(units[1])
        })
    );
    let after = pool.stats();
    assert_eq!(after.rejected_frees, before.rejected_frees + 1);
    assert_eq!(after.free_units, before.free_units);
    assert_eq!(after.outstanding_units, before.outstanding_units);

    // Only one caller gets the unit back; the next allocation grows.
    let again = pool.allocate().unwrap();
    assert_eq!(again, units[1]);
    let grown = pool.allocate().unwrap();
    assert_eq!(pool.block_count(), 2);
    assert_eq!(bytes.allocations(), 2);

    unsafe {
        pool.free(units[0]).unwrap();
        pool.free(again).unwrap();
        pool.free(units[2]).unwrap();
        pool.free(grown).unwrap();
    }
    assert_eq!(bytes.live_blocks(), 0);
}

#[test]
fn single_unit_blocks_grow_and_reclaim_per_allocation() {
    let bytes = CountingBytes::new();
    let config = PoolConfig::new(8)
        .with_initial_units(1)
        .with_growth_units(1);
    let pool = Pool::with_allocator(config, &bytes).unwrap();

    let units: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(bytes.allocations(), 4);
    assert_eq!(pool.block_count(), 4);

    for (freed, unit) in units.into_iter().enumerate() {
        unsafe { pool.free(unit).unwrap() };
        assert_eq!(bytes.releases(), freed + 1);
    }
}

#[test]
fn stats_match_allocator_view() {
    let bytes = CountingBytes::new();
    let pool = Pool::with_allocator(PoolConfig::new(40), &bytes).unwrap();
    let units: Vec<_> = (0..17).map(|_| pool.allocate().unwrap()).collect();

    let stats = pool.stats();
    assert_eq!(stats.unit_size, 40);
    assert_eq!(stats.resident_bytes, bytes.live_bytes());
    assert_eq!(stats.block_count, bytes.live_blocks());
    assert_eq!(stats.outstanding_units, 17);

    for unit in units {
        unsafe { pool.free(unit).unwrap() };
    }
    let stats = pool.stats();
    assert_eq!(stats.resident_bytes, 0);
    assert_eq!(stats.blocks_created, stats.blocks_reclaimed);
}
