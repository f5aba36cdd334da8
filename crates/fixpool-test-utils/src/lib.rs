//! Test utilities and mock byte allocators for fixpool development.
//!
//! Provides [`CountingBytes`], which records every block request and
//! release, [`FailingBytes`], which refuses requests on demand, and
//! [`init_tracing`] for capturing pool logs in test output.

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;

use fixpool::{ByteAllocator, SystemBytes};

/// Byte allocator that counts calls and bytes, forwarding to the heap.
///
/// Shared by reference or through `Arc` so a test can keep inspecting
/// the counters after handing the allocator to a pool.
#[derive(Debug, Default)]
pub struct CountingBytes {
    allocations: AtomicUsize,
    releases: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl CountingBytes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `allocate_bytes` calls.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Number of `release_bytes` calls.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Bytes currently held by the pool.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    /// Blocks currently held by the pool.
    pub fn live_blocks(&self) -> usize {
        self.allocations() - self.releases()
    }
}

#[allow(unsafe_code)]
// SAFETY: forwards to `SystemBytes`.
unsafe impl ByteAllocator for CountingBytes {
    fn allocate_bytes(&self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = SystemBytes.allocate_bytes(layout)?;
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_add(layout.size(), Ordering::SeqCst);
        Some(ptr)
    }

    unsafe fn release_bytes(&self, ptr: NonNull<u8>, layout: Layout) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(layout.size(), Ordering::SeqCst);
        // SAFETY: `ptr` came from `SystemBytes` with `layout`.
        unsafe { SystemBytes.release_bytes(ptr, layout) }
    }
}

/// Byte allocator that can be switched into an out-of-memory state.
///
/// Optionally grants only a fixed number of requests before failing.
#[derive(Debug, Default)]
pub struct FailingBytes {
    inner: CountingBytes,
    failing: AtomicBool,
    budget: Option<AtomicUsize>,
    refusals: AtomicUsize,
}

impl FailingBytes {
    /// An allocator that succeeds until [`set_failing`](Self::set_failing).
    pub fn new() -> Self {
        Self::default()
    }

    /// An allocator that grants `count` requests and refuses the rest.
    pub fn with_budget(count: usize) -> Self {
        Self {
            budget: Some(AtomicUsize::new(count)),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of refused requests.
    pub fn refusals(&self) -> usize {
        self.refusals.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> &CountingBytes {
        &self.inner
    }

    fn grant(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        match &self.budget {
            Some(budget) => budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
            None => true,
        }
    }
}

#[allow(unsafe_code)]
// SAFETY: forwards to `CountingBytes`.
unsafe impl ByteAllocator for FailingBytes {
    fn allocate_bytes(&self, layout: Layout) -> Option<NonNull<u8>> {
        if !self.grant() {
            self.refusals.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        self.inner.allocate_bytes(layout)
    }

    unsafe fn release_bytes(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: `ptr` came from `self.inner` with `layout`.
        unsafe { self.inner.release_bytes(ptr, layout) }
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; defaults to `fixpool=debug`. Safe to call from
/// every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fixpool=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
