//! Integration test: concurrent allocate/free from many threads.
//!
//! Threads share one pool. Each unit is stamped with its owner's id while
//! held, so a unit handed to two holders at once shows up as a torn stamp.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::bounded;
use fixpool::{Pool, PoolConfig};
use fixpool_test_utils::CountingBytes;

/// A unit address that may cross threads.
struct Unit(NonNull<u8>);

// SAFETY: a unit is exclusively owned by whoever holds this handle.
unsafe impl Send for Unit {}

const THREADS: u64 = 8;
const ROUNDS: usize = 200;
const BATCH: usize = 25;

#[test]
fn parallel_churn_never_shares_a_unit() {
    let bytes = CountingBytes::new();
    let pool = Pool::with_allocator(PoolConfig::new(16), &bytes).unwrap();

    thread::scope(|s| {
        for owner in 0..THREADS {
            let pool = &pool;
            s.spawn(move || {
                for round in 0..ROUNDS {
                    let stamp = (owner << 32) | round as u64;
                    let held: Vec<NonNull<u64>> = (0..BATCH)
                        .map(|_| {
                            let unit = pool.allocate().unwrap().cast::<u64>();
                            unsafe { unit.write(stamp) };
                            unit
                        })
                        .collect();
                    thread::yield_now();
                    for unit in held {
                        assert_eq!(unsafe { unit.read() }, stamp, "unit shared between holders");
                        unsafe { pool.free(unit.cast()).unwrap() };
                    }
                }
            });
        }
    });

    let stats = pool.stats();
    assert_eq!(stats.outstanding_units, 0);
    assert_eq!(stats.block_count, 0);
    assert_eq!(stats.allocations, THREADS * (ROUNDS * BATCH) as u64);
    assert_eq!(stats.frees, stats.allocations);
    assert_eq!(bytes.allocations(), bytes.releases());
}

#[test]
fn units_freed_on_another_thread_are_accounted() {
    let bytes = CountingBytes::new();
    let pool = Pool::with_allocator(PoolConfig::new(32), &bytes).unwrap();
    let (tx, rx) = bounded::<Unit>(16);
    let total = 500;

    thread::scope(|s| {
        let producer_pool = &pool;
        s.spawn(move || {
            for i in 0..total {
                let unit = producer_pool.allocate().unwrap();
                unsafe { unit.cast::<usize>().write(i) };
                tx.send(Unit(unit)).unwrap();
            }
        });

        let consumer_pool = &pool;
        s.spawn(move || {
            let mut expected = 0;
            for Unit(unit) in rx.iter() {
                assert_eq!(unsafe { unit.cast::<usize>().read() }, expected);
                expected += 1;
                unsafe { consumer_pool.free(unit).unwrap() };
            }
            assert_eq!(expected, total);
        });
    });

    assert_eq!(pool.stats().outstanding_units, 0);
    assert_eq!(pool.block_count(), 0);
    assert_eq!(bytes.live_bytes(), 0);
}

#[test]
fn concurrently_live_units_are_distinct() {
    let pool = Pool::new(PoolConfig::new(8)).unwrap();
    let seen = Mutex::new(Vec::new());

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let units: Vec<_> = (0..100).map(|_| pool.allocate().unwrap()).collect();
                seen.lock()
                    .unwrap()
                    .extend(units.iter().map(|u| u.as_ptr() as usize));
            });
        }
    });

    let seen = seen.into_inner().unwrap();
    let distinct: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(distinct.len(), seen.len());
    assert_eq!(pool.stats().outstanding_units, seen.len());
}
