//! A page and size-class slab allocator over a fixed shared memory region.
//!
//! The region holds a small header, one candidate list per power-of-two size
//! class, a descriptor per page and the pages themselves. Requests of half a
//! page or more take whole page runs; smaller requests are carved from slab
//! pages whose occupancy is tracked by a bitmap in the page, in the page's
//! descriptor word, or in the upper half of that word, depending on the
//! chunk size. Every operation runs under a lock stored in the region, so
//! threads and forked processes can share one pool.

pub mod allocator;
pub mod config;
pub mod error;
pub mod init;
pub mod platform;
pub mod shm;
pub mod slab;
pub mod stats;
pub mod sync;
pub mod util;

pub use allocator::{PoolGuard, SlabPool};
pub use config::PoolConfig;
pub use error::{ConfigError, Misuse, Result, SlabError};
pub use shm::SharedMemory;
pub use stats::{PoolStats, SlotStats, TableSnapshot};
