//! Fixed-size-unit memory pool.
//!
//! A [`Pool`] hands out storage for objects of one uniform size. Memory is
//! requested from a [`ByteAllocator`] in large blocks, and each block is
//! split into equal-sized units chained on an intrusive free list.
//!
//! # Architecture
//!
//! ```text
//! Pool (one Mutex over all state)
//! ├── PoolConfig (unit size rounded up to 8, first/growth block sizes)
//! ├── ByteAllocator (one allocate_bytes per block, one release_bytes per block)
//! └── IndexMap<BlockId, Block> (creation order; searched newest-first)
//!     └── Block (arena of N units + free list threaded through free units)
//! ```
//!
//! # Lifecycle
//!
//! - The pool starts empty. The first `allocate` builds a block of
//!   `initial_unit_count` units and returns its unit 0.
//! - When every block is full, `allocate` builds a block of
//!   `growth_unit_count` units and returns its unit 0.
//! - `free` threads the unit back onto its block's free list; a block whose
//!   units are all free is released on the spot.
//!
//! # Safety
//!
//! `unsafe` is confined to [`raw`] (the allocator seam), the private
//! `block` module (free-list links stored inside unit bytes), and [`pool`]
//! (the `free` contract). The pool never reads a unit's bytes while a
//! caller holds it.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

mod block;
pub mod config;
pub mod error;
pub mod pool;
pub mod raw;
pub mod stats;

// Public re-exports for the primary API surface.
pub use config::{ConfigError, PoolConfig, UNIT_ALIGN};
pub use error::PoolError;
pub use pool::Pool;
pub use raw::{ByteAllocator, SystemBytes};
pub use stats::{BlockId, BlockInfo, PoolStats};
