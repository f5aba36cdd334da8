//! The byte allocator that backs block arenas.
//!
//! A pool never touches the global heap directly. Every block arena is
//! obtained through a [`ByteAllocator`] with exactly one
//! [`allocate_bytes`](ByteAllocator::allocate_bytes) call and returned with
//! exactly one [`release_bytes`](ByteAllocator::release_bytes) call.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;

/// Source of raw block memory for a pool.
///
/// # Safety
///
/// A non-`None` result of `allocate_bytes(layout)` must point to
/// `layout.size()` bytes aligned to `layout.align()`, valid for reads and
/// writes and not aliased by anything else until the pointer is passed to
/// `release_bytes` with the same layout.
pub unsafe trait ByteAllocator: Send + Sync {
    /// Allocate `layout.size()` bytes, or `None` if memory is exhausted.
    ///
    /// The pool never asks for a zero-sized layout.
    fn allocate_bytes(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Return memory obtained from [`allocate_bytes`](Self::allocate_bytes).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate_bytes` on this allocator with the
    /// same `layout`, and must not have been released already.
    unsafe fn release_bytes(&self, ptr: NonNull<u8>, layout: Layout);
}

/// [`ByteAllocator`] over the global heap (`std::alloc`).
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBytes;

// SAFETY: `std::alloc::alloc` returns memory fitting the layout or null,
// and null is mapped to `None`.
unsafe impl ByteAllocator for SystemBytes {
    fn allocate_bytes(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: the layout has a non-zero size.
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn release_bytes(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: caller guarantees `ptr` came from `alloc` with `layout`.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

// SAFETY: forwards to the referenced allocator.
unsafe impl<A: ByteAllocator + ?Sized> ByteAllocator for &A {
    fn allocate_bytes(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate_bytes(layout)
    }

    unsafe fn release_bytes(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: same contract as the referenced allocator.
        unsafe { (**self).release_bytes(ptr, layout) }
    }
}

// SAFETY: forwards to the shared allocator.
unsafe impl<A: ByteAllocator + ?Sized> ByteAllocator for std::sync::Arc<A> {
    fn allocate_bytes(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate_bytes(layout)
    }

    unsafe fn release_bytes(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: same contract as the shared allocator.
        unsafe { (**self).release_bytes(ptr, layout) }
    }
}
