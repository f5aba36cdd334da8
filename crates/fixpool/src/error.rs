//! Pool-specific error types.

use std::error::Error;
use std::fmt;

/// Errors that can occur during pool operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// The byte allocator could not provide a new block.
    ///
    /// Only the failing `allocate` call is affected; units freed later can
    /// still be handed out.
    OutOfMemory {
        /// Size in bytes of the block that was requested.
        requested: usize,
    },
    /// The address is not the start of a unit in any live block.
    InvalidFree {
        /// The rejected address.
        address: usize,
    },
    /// The address lies in a block whose units are all already free.
    DoubleFree {
        /// The rejected address.
        address: usize,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory: block of {requested} bytes refused")
            }
            Self::InvalidFree { address } => {
                write!(f, "invalid free: {address:#x} is not a unit of this pool")
            }
            Self::DoubleFree { address } => {
                write!(f, "double free: unit at {address:#x} is already free")
            }
        }
    }
}

impl Error for PoolError {}
