//! Error types returned by the pool.
//!
//! Nothing inside the allocator panics across its boundary: exhaustion and
//! misuse fail the current call only, configuration errors fail `init`.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, SlabError>;

#[derive(Error, Debug)]
pub enum SlabError {
    /// No free page run can satisfy the request. The pool stays usable.
    #[error("slab alloc({size}) failed: no memory")]
    Exhausted { size: usize },

    /// A free was rejected. The pool state is left unmodified.
    #[error("slab free(): {0}")]
    Misuse(#[from] Misuse),

    /// The span or geometry cannot host a pool.
    #[error("slab init: {0}")]
    Config(#[from] ConfigError),

    /// The shared memory span could not be mapped.
    #[error("shared memory mapping failed: {0}")]
    Map(#[from] std::io::Error),
}

impl SlabError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, SlabError::Exhausted { .. })
    }

    pub fn misuse(&self) -> Option<Misuse> {
        match self {
            SlabError::Misuse(m) => Some(*m),
            _ => None,
        }
    }
}

/// Reasons a pointer handed to `free` was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    #[error("outside of pool")]
    OutsidePool,
    #[error("pointer to wrong chunk")]
    WrongChunk,
    #[error("chunk is already free")]
    ChunkAlreadyFree,
    #[error("page is already free")]
    PageAlreadyFree,
    #[error("pointer to wrong page")]
    WrongPage,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("span of {len} bytes cannot hold the pool header and slot table ({need} bytes)")]
    SpanTooSmall { len: usize, need: usize },

    #[error("span base 0x{base:x} is not aligned to {align}")]
    MisalignedSpan { base: usize, align: usize },

    #[error("page size {0} must be a power of two between 256 and 65536")]
    PageSize(usize),

    #[error("minimum chunk shift {min_shift} must be in 1..{page_shift}")]
    MinShift { min_shift: u32, page_shift: u32 },

    #[error("region layout mismatch: {0}")]
    Incompatible(&'static str),
}
