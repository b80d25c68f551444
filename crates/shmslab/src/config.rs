use crate::error::ConfigError;
use crate::platform;
use crate::sync::DEFAULT_SPIN;

pub const DEFAULT_MIN_SHIFT: u32 = 3;
pub const MIN_PAGE_SIZE: usize = 256;
/// Upper bound: the BIG regime stores the chunk shift in four bits.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Geometry and behaviour of a pool.
///
/// Every executor attaching to the same region must use the same
/// `page_size` and `min_shift`; `attach` rejects a mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// log2 of the smallest chunk handed out.
    pub min_shift: u32,
    /// Page size used for the page-run allocator and slab pages.
    pub page_size: usize,
    /// Backoff rounds before a contended lock blocks.
    pub spin: u32,
    /// Fill the data area at init and freed memory with `0xA5`.
    pub junk: bool,
    /// Appended to every diagnostic, e.g. ` in slab "zone"`.
    pub log_ctx: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min_shift: DEFAULT_MIN_SHIFT,
            page_size: platform::page_size(),
            spin: DEFAULT_SPIN,
            junk: false,
            log_ctx: String::new(),
        }
    }
}

impl PoolConfig {
    /// Defaults overridden by `SHMSLAB_MIN_SHIFT`, `SHMSLAB_PAGE_SIZE`,
    /// `SHMSLAB_SPIN` and `SHMSLAB_JUNK`. Unparsable values are ignored, as is
    /// a min shift that does not fit a `u32`.
    pub fn from_env() -> Self {
        let mut config = PoolConfig::default();
        if let Some(val) = getenv_usize("SHMSLAB_MIN_SHIFT").and_then(|v| u32::try_from(v).ok()) {
            config.min_shift = val;
        }
        if let Some(val) = getenv_usize("SHMSLAB_PAGE_SIZE") {
            config.page_size = val;
        }
        if let Some(val) = getenv_usize("SHMSLAB_SPIN") {
            config.spin = val.min(u32::MAX as usize) as u32;
        }
        if let Some(val) = getenv_usize("SHMSLAB_JUNK") {
            config.junk = val != 0;
        }
        config
    }

    pub fn with_log_ctx(mut self, ctx: impl Into<String>) -> Self {
        self.log_ctx = ctx.into();
        self
    }

    /// Check the geometry and return the page shift.
    pub fn validate(&self) -> Result<u32, ConfigError> {
        let page_size = self.page_size;
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ConfigError::PageSize(page_size));
        }
        let page_shift = page_size.trailing_zeros();
        if self.min_shift == 0 || self.min_shift >= page_shift {
            return Err(ConfigError::MinShift {
                min_shift: self.min_shift,
                page_shift,
            });
        }
        Ok(page_shift)
    }
}

/// Parse an environment variable as a usize.
fn getenv_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}
