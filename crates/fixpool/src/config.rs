//! Pool configuration parameters and validation.

use std::alloc::Layout;
use std::error::Error;
use std::fmt;

/// Alignment of every unit start, in bytes.
///
/// Unit sizes are rounded up to a multiple of this, and blocks are
/// requested from the byte allocator with this alignment, so every unit
/// is suitably aligned for any type with `align_of::<T>() <= UNIT_ALIGN`.
pub const UNIT_ALIGN: usize = 8;

/// Configuration for a [`Pool`](crate::Pool).
///
/// Validated at pool construction; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Requested size of one unit in bytes, before alignment.
    ///
    /// The pool rounds this up to a multiple of [`UNIT_ALIGN`]; see
    /// [`aligned_unit_size`](Self::aligned_unit_size).
    pub unit_size: usize,

    /// Number of units in the first block a pool creates.
    ///
    /// Also used when the pool grows again after every block was reclaimed.
    /// Default: 3.
    pub initial_unit_count: u16,

    /// Number of units in every block created while other blocks are live.
    ///
    /// Default: 10.
    pub growth_unit_count: u16,
}

impl PoolConfig {
    /// Default unit count of the first block.
    pub const DEFAULT_INITIAL_UNITS: u16 = 3;

    /// Default unit count of every grown block.
    pub const DEFAULT_GROWTH_UNITS: u16 = 10;

    /// Create a config for units of `unit_size` bytes with default block sizing.
    pub fn new(unit_size: usize) -> Self {
        Self {
            unit_size,
            initial_unit_count: Self::DEFAULT_INITIAL_UNITS,
            growth_unit_count: Self::DEFAULT_GROWTH_UNITS,
        }
    }

    /// Create a config sized for values of type `T`.
    ///
    /// Fails if `T` needs stricter alignment than [`UNIT_ALIGN`].
    pub fn for_type<T>() -> Result<Self, ConfigError> {
        let align = std::mem::align_of::<T>();
        if align > UNIT_ALIGN {
            return Err(ConfigError::UnsupportedAlignment { align });
        }
        Ok(Self::new(std::mem::size_of::<T>()))
    }

    /// Set the unit count of the first block.
    pub fn with_initial_units(mut self, count: u16) -> Self {
        self.initial_unit_count = count;
        self
    }

    /// Set the unit count of grown blocks.
    pub fn with_growth_units(mut self, count: u16) -> Self {
        self.growth_unit_count = count;
        self
    }

    /// Unit size rounded up to the next multiple of [`UNIT_ALIGN`].
    ///
    /// A size that is already aligned is returned unchanged. Sizes too
    /// large to round saturate at the largest aligned `usize`; such a
    /// config fails [`validate`](Self::validate).
    pub fn aligned_unit_size(&self) -> usize {
        self.unit_size
            .checked_next_multiple_of(UNIT_ALIGN)
            .unwrap_or(usize::MAX & !(UNIT_ALIGN - 1))
    }

    /// Check structural invariants.
    ///
    /// Every block the pool may create must have a non-zero unit size, at
    /// least one unit, and a byte size that forms a valid [`Layout`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unit_size == 0 {
            return Err(ConfigError::ZeroUnitSize);
        }
        if self.initial_unit_count == 0 {
            return Err(ConfigError::ZeroInitialUnits);
        }
        if self.growth_unit_count == 0 {
            return Err(ConfigError::ZeroGrowthUnits);
        }
        let unit_size = self
            .unit_size
            .checked_next_multiple_of(UNIT_ALIGN)
            .ok_or(ConfigError::BlockTooLarge {
                unit_size: self.unit_size,
                unit_count: self.initial_unit_count,
            })?;
        for unit_count in [self.initial_unit_count, self.growth_unit_count] {
            block_layout(unit_size, unit_count).ok_or(ConfigError::BlockTooLarge {
                unit_size: self.unit_size,
                unit_count,
            })?;
        }
        Ok(())
    }
}

/// Layout of a block arena holding `unit_count` units of `unit_size` bytes.
///
/// Returns `None` if the byte size overflows or exceeds `isize::MAX`.
pub(crate) fn block_layout(unit_size: usize, unit_count: u16) -> Option<Layout> {
    let capacity = unit_size.checked_mul(unit_count as usize)?;
    Layout::from_size_align(capacity, UNIT_ALIGN).ok()
}

/// Errors detected by [`PoolConfig::validate()`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The unit size is zero.
    ZeroUnitSize,
    /// The first block would hold no units.
    ZeroInitialUnits,
    /// Grown blocks would hold no units.
    ZeroGrowthUnits,
    /// The pooled type needs more alignment than units provide.
    UnsupportedAlignment {
        /// The type's alignment in bytes.
        align: usize,
    },
    /// A block of this shape cannot be described by a [`Layout`].
    BlockTooLarge {
        /// The requested unit size.
        unit_size: usize,
        /// The unit count of the offending block.
        unit_count: u16,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroUnitSize => write!(f, "unit size must be non-zero"),
            Self::ZeroInitialUnits => write!(f, "initial unit count must be at least 1"),
            Self::ZeroGrowthUnits => write!(f, "growth unit count must be at least 1"),
            Self::UnsupportedAlignment { align } => {
                write!(
                    f,
                    "type alignment {align} exceeds unit alignment {UNIT_ALIGN}"
                )
            }
            Self::BlockTooLarge {
                unit_size,
                unit_count,
            } => {
                write!(
                    f,
                    "block of {unit_count} units of {unit_size} bytes exceeds the address space"
                )
            }
        }
    }
}

impl Error for ConfigError {}

impl Default for PoolConfig {
    /// Units sized for one pointer.
    fn default() -> Self {
        Self::new(std::mem::size_of::<usize>())
    }
}
