use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::PoolConfig;
use crate::error::{Misuse, Result, SlabError};
use crate::init::{self, Layout, PoolHeader};
use crate::slab::page::ListHead;
use crate::slab::{PageDesc, PageState, SizeClasses, Slabs};
use crate::stats::{self, PoolStats, TableSnapshot};
use crate::sync::{ShmMutex, ShmMutexGuard};
use crate::util::junk_region;

/// Handle on a slab pool living in a shared region.
///
/// Any number of handles, in any number of processes, may refer to the same
/// region. All allocator state lives in the region; the handle only caches
/// derived geometry. Every process must see the region at the same address
/// for the pointers it hands out to be meaningful to the others.
pub struct SlabPool {
    header: NonNull<PoolHeader>,
    slots: NonNull<ListHead>,
    pages: NonNull<PageDesc>,
    num_pages: usize,
    /// First byte of page 0.
    start: *mut u8,
    /// One past the last byte of the span.
    end: *mut u8,
    classes: SizeClasses,
    junk: bool,
    spin: u32,
    log_ctx: String,
}

unsafe impl Send for SlabPool {}
unsafe impl Sync for SlabPool {}

impl SlabPool {
    /// Lay out a fresh pool over `[base, base + len)`.
    ///
    /// # Safety
    /// The span must be valid for reads and writes for as long as this handle
    /// and any handle attached to it live, and no other executor may use the
    /// span while `init` runs.
    pub unsafe fn init(base: NonNull<u8>, len: usize, config: &PoolConfig) -> Result<Self> {
        let page_shift = config.validate()?;
        let layout = Layout::compute(base.as_ptr() as usize, len, page_shift, config.min_shift)?;
        init::write_region(base.as_ptr(), &layout, page_shift, config.min_shift);

        let pool = Self::from_layout(base, &layout, page_shift, config);
        if config.junk {
            junk_region(pool.start, layout.pages << page_shift);
        }
        log::debug!(
            "slab init: {} pages of {} at {:p}{}",
            layout.pages,
            config.page_size,
            pool.start,
            pool.log_ctx
        );
        Ok(pool)
    }

    /// Open a pool another executor created with `init` over the same span.
    ///
    /// # Safety
    /// Same as `init`, except that the region must already hold an
    /// initialized pool and may be in concurrent use.
    pub unsafe fn attach(base: NonNull<u8>, len: usize, config: &PoolConfig) -> Result<Self> {
        let page_shift = config.validate()?;
        let layout = Layout::compute(base.as_ptr() as usize, len, page_shift, config.min_shift)?;
        init::check_region(base.as_ptr(), &layout, page_shift, config.min_shift)?;
        Ok(Self::from_layout(base, &layout, page_shift, config))
    }

    unsafe fn from_layout(
        base: NonNull<u8>,
        layout: &Layout,
        page_shift: u32,
        config: &PoolConfig,
    ) -> Self {
        let base = base.as_ptr();
        SlabPool {
            header: NonNull::new_unchecked(base as *mut PoolHeader),
            slots: NonNull::new_unchecked(base.add(layout.slots_offset) as *mut ListHead),
            pages: NonNull::new_unchecked(base.add(layout.pages_offset) as *mut PageDesc),
            num_pages: layout.pages,
            start: base.add(layout.start_offset),
            end: base.add(layout.len),
            classes: SizeClasses::new(page_shift, config.min_shift),
            junk: config.junk,
            spin: config.spin,
            log_ctx: config.log_ctx.clone(),
        }
    }

    #[inline]
    fn mutex(&self) -> &ShmMutex {
        // SAFETY: the header outlives the handle. Only the atomic fields are
        // borrowed shared; the free list head is reached through `slabs`.
        unsafe { &*ptr::addr_of!((*self.header.as_ptr()).lock) }
    }

    #[inline]
    fn data(&self) -> &AtomicUsize {
        // SAFETY: as for `mutex`.
        unsafe { &*ptr::addr_of!((*self.header.as_ptr()).data) }
    }

    /// Acquire the pool lock for a sequence of operations.
    pub fn lock(&self) -> PoolGuard<'_> {
        PoolGuard {
            pool: self,
            _lock: ShmMutexGuard::lock(self.mutex(), self.spin),
        }
    }

    pub fn try_lock(&self) -> Option<PoolGuard<'_>> {
        ShmMutexGuard::try_lock(self.mutex()).map(|lock| PoolGuard {
            pool: self,
            _lock: lock,
        })
    }

    /// Allocate `size` bytes. Requests of half a page or more take whole
    /// pages and come back page-aligned; smaller ones are rounded up to a
    /// power of two no smaller than the minimum chunk.
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        self.lock().alloc(size)
    }

    /// Like `alloc`, with the returned bytes zeroed.
    pub fn alloc_zeroed(&self, size: usize) -> Result<NonNull<u8>> {
        self.lock().alloc_zeroed(size)
    }

    /// Release memory returned by `alloc`.
    ///
    /// Pointers outside the pool, not on a chunk boundary or already free
    /// are rejected with `SlabError::Misuse` and leave the pool untouched.
    ///
    /// # Safety
    /// Nothing may access the memory behind `ptr` after this call, in this
    /// or any other executor.
    pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        self.lock().free(ptr)
    }

    /// `alloc` for a caller already holding the pool lock.
    ///
    /// # Safety
    /// The calling executor must hold the lock of this pool.
    pub unsafe fn alloc_locked(&self, size: usize) -> Result<NonNull<u8>> {
        let mut slabs = self.slabs();
        let ptr = if size >= self.classes.max_size() {
            let shift = self.classes.page_shift();
            let mask = self.classes.page_size() - 1;
            let n = (size >> shift) + usize::from(size & mask != 0);
            slabs.alloc_pages(n).map(|idx| slabs.page_addr(idx))
        } else {
            slabs.alloc_chunk(size)
        };

        match ptr.and_then(NonNull::new) {
            Some(p) => {
                log::debug!("slab alloc: {:p}", p);
                Ok(p)
            }
            None => {
                log::error!("slab alloc({}) failed: no memory{}", size, self.log_ctx);
                Err(SlabError::Exhausted { size })
            }
        }
    }

    /// `alloc_zeroed` for a caller already holding the pool lock.
    ///
    /// # Safety
    /// The calling executor must hold the lock of this pool.
    pub unsafe fn alloc_zeroed_locked(&self, size: usize) -> Result<NonNull<u8>> {
        let p = self.alloc_locked(size)?;
        ptr::write_bytes(p.as_ptr(), 0, size);
        Ok(p)
    }

    /// `free` for a caller already holding the pool lock.
    ///
    /// # Safety
    /// The calling executor must hold the lock of this pool, and the
    /// requirements of `free` apply.
    pub unsafe fn free_locked(&self, ptr: NonNull<u8>) -> Result<()> {
        let p = ptr.as_ptr();
        log::debug!("slab free: {:p}", p);
        self.release(p).map_err(|misuse| {
            log::error!("slab free(): {}{}", misuse, self.log_ctx);
            SlabError::Misuse(misuse)
        })
    }

    unsafe fn release(&self, p: *mut u8) -> core::result::Result<(), Misuse> {
        if p < self.start || p >= self.end {
            return Err(Misuse::OutsidePool);
        }
        let idx = (p as usize - self.start as usize) >> self.classes.page_shift();
        if idx >= self.num_pages {
            return Err(Misuse::OutsidePool);
        }

        let mut slabs = self.slabs();
        let size = match slabs.pages[idx].state() {
            PageState::Run { pages } => {
                if p != slabs.page_addr(idx) {
                    return Err(Misuse::WrongChunk);
                }
                slabs.free_pages(idx, pages);
                pages << self.classes.page_shift()
            }
            PageState::Busy => return Err(Misuse::WrongPage),
            PageState::Free { .. } => return Err(Misuse::PageAlreadyFree),
            PageState::Small { .. } | PageState::Exact { .. } | PageState::Big { .. } => {
                slabs.free_chunk(idx, p)?
            }
        };

        if self.junk {
            junk_region(p, size);
        }
        Ok(())
    }

    /// Mutable view over the allocator tables.
    ///
    /// # Safety
    /// The pool lock must be held for as long as the view is alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slabs(&self) -> Slabs<'_> {
        let header = self.header.as_ptr();
        Slabs {
            free: &mut *ptr::addr_of_mut!((*header).free),
            slots: core::slice::from_raw_parts_mut(self.slots.as_ptr(), self.classes.num_slots()),
            pages: core::slice::from_raw_parts_mut(self.pages.as_ptr(), self.num_pages),
            start: self.start,
            classes: &self.classes,
        }
    }

    /// Snapshot of page and chunk usage.
    ///
    /// Scans every page descriptor while holding the pool lock, so the call
    /// costs O(pages) and allocations in every other thread and process wait
    /// for the whole scan. Meant for diagnostics, not for hot paths. A caller
    /// that already holds a `PoolGuard` uses `PoolGuard::stats`.
    pub fn stats(&self) -> PoolStats {
        self.lock().stats()
    }

    /// `stats` for a caller already holding the pool lock.
    ///
    /// # Safety
    /// The calling executor must hold the lock of this pool.
    pub unsafe fn stats_locked(&self) -> PoolStats {
        stats::collect(&mut self.slabs())
    }

    /// Copy of every page descriptor and of the list orders. Same cost as
    /// `stats`.
    pub fn snapshot(&self) -> TableSnapshot {
        let _guard = self.lock();
        // SAFETY: lock held.
        unsafe { stats::snapshot(&self.slabs()) }
    }

    /// Opaque word shared by every executor using the pool.
    pub fn user_data(&self) -> usize {
        self.data().load(Ordering::Acquire)
    }

    pub fn set_user_data(&self, data: usize) {
        self.data().store(data, Ordering::Release);
    }

    /// Release the pool lock on behalf of an executor that died holding it.
    ///
    /// # Safety
    /// The holder must no longer be running and must not have been inside an
    /// allocator call, or the tables may be left inconsistent.
    pub unsafe fn force_unlock(&self) {
        self.mutex().force_unlock();
    }

    /// First byte of the data area.
    #[inline]
    pub fn start(&self) -> *mut u8 {
        self.start
    }

    /// End of the span.
    #[inline]
    pub fn end(&self) -> *mut u8 {
        self.end
    }

    #[inline]
    pub fn pages(&self) -> usize {
        self.num_pages
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.classes.page_size()
    }

    #[inline]
    pub fn classes(&self) -> &SizeClasses {
        &self.classes
    }

    /// Whether `ptr` lies in the page area of this pool.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let p = ptr as usize;
        let start = self.start as usize;
        p >= start && p < start + (self.num_pages << self.classes.page_shift())
    }
}

impl core::fmt::Debug for SlabPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlabPool")
            .field("start", &self.start)
            .field("pages", &self.num_pages)
            .field("page_size", &self.page_size())
            .field("min_size", &self.classes.min_size())
            .finish()
    }
}

/// Holds the pool lock; allocations through it compose atomically with
/// respect to every other executor.
pub struct PoolGuard<'a> {
    pool: &'a SlabPool,
    _lock: ShmMutexGuard<'a>,
}

impl PoolGuard<'_> {
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        // SAFETY: the guard holds the lock.
        unsafe { self.pool.alloc_locked(size) }
    }

    pub fn alloc_zeroed(&mut self, size: usize) -> Result<NonNull<u8>> {
        // SAFETY: the guard holds the lock.
        unsafe { self.pool.alloc_zeroed_locked(size) }
    }

    /// # Safety
    /// Same as `SlabPool::free`.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<()> {
        self.pool.free_locked(ptr)
    }

    /// `SlabPool::stats` without taking the lock again.
    pub fn stats(&self) -> PoolStats {
        // SAFETY: the guard holds the lock.
        unsafe { self.pool.stats_locked() }
    }
}
