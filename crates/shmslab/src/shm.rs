use core::ptr::NonNull;
use std::io;

use crate::error::Result;
use crate::platform;
use crate::util::align_up;

/// An anonymous shared mapping. Child processes forked after `alloc` see the
/// same pages at the same address.
pub struct SharedMemory {
    addr: NonNull<u8>,
    size: usize,
    name: String,
}

// The mapping is plain memory; synchronization is up to its users.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Map `size` bytes, rounded up to the platform page size.
    pub fn alloc(name: impl Into<String>, size: usize) -> Result<Self> {
        let name = name.into();
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero-sized shared memory").into());
        }
        let size = align_up(size, platform::page_size());
        // SAFETY: size is non-zero and page-aligned.
        let ptr = unsafe { platform::map_shared(size) };
        let addr = NonNull::new(ptr).ok_or_else(|| {
            let err = io::Error::last_os_error();
            log::error!("mmap(MAP_ANON|MAP_SHARED, {}) \"{}\" failed: {}", size, name, err);
            err
        })?;
        log::debug!("shared memory \"{}\": {:p} {} bytes", name, addr, size);
        Ok(SharedMemory { addr, size, name })
    }

    #[inline]
    pub fn addr(&self) -> NonNull<u8> {
        self.addr
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        // SAFETY: addr/size are exactly what map_shared returned.
        unsafe { platform::unmap(self.addr.as_ptr(), self.size) };
    }
}

impl core::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("size", &self.size)
            .finish()
    }
}
