//! Region layout and pool header.
//!
//! A pool region is laid out as
//!
//! ```text
//! base: PoolHeader | slot table (ListHead x num_slots) | PageDesc x pages | pad | data pages
//! ```
//!
//! The data area starts on a page boundary. Its page count is computed from
//! what remains after the header and slot table, then reduced if aligning the
//! start pushed the last pages past the end of the span.

use core::mem::{align_of, size_of};
use core::sync::atomic::AtomicUsize;

use crate::error::ConfigError;
use crate::slab::page::{ListHead, PageDesc, LIST_FREE, NIL};
use crate::sync::ShmMutex;
use crate::util::{align_up, WORD_BITS};

pub const MAGIC: u64 = u64::from_le_bytes(*b"SHMSLAB1");

/// Fixed-size header at the base of every pool region.
#[repr(C)]
pub struct PoolHeader {
    magic: u64,
    pub(crate) lock: ShmMutex,
    word_bits: u32,
    page_shift: u32,
    min_shift: u32,
    num_slots: u32,
    pages: u32,
    pub(crate) free: ListHead,
    start_offset: usize,
    len: usize,
    pub(crate) data: AtomicUsize,
}

/// Offsets of every table in a region, relative to its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub slots_offset: usize,
    pub num_slots: usize,
    pub pages_offset: usize,
    pub pages: usize,
    pub start_offset: usize,
    pub len: usize,
}

impl Layout {
    pub fn compute(
        base: usize,
        len: usize,
        page_shift: u32,
        min_shift: u32,
    ) -> Result<Layout, ConfigError> {
        let align = align_of::<PoolHeader>();
        if base % align != 0 {
            return Err(ConfigError::MisalignedSpan { base, align });
        }

        let page_size = 1usize << page_shift;
        let num_slots = (page_shift - min_shift) as usize;
        let slots_offset = size_of::<PoolHeader>();
        let pages_offset = align_up(
            slots_offset + num_slots * size_of::<ListHead>(),
            align_of::<PageDesc>(),
        );
        if len < pages_offset {
            return Err(ConfigError::SpanTooSmall {
                len,
                need: pages_offset,
            });
        }

        let avail = len - pages_offset;
        let mut pages = avail / (page_size + size_of::<PageDesc>());
        // Indices must stay below the NIL sentinel.
        pages = pages.min(NIL as usize - 1);

        let table_end = base + pages_offset + pages * size_of::<PageDesc>();
        let start = align_up(table_end, page_size);
        let end = base + len;
        let fit = end.saturating_sub(start) >> page_shift;
        if fit < pages {
            pages = fit;
        }

        Ok(Layout {
            slots_offset,
            num_slots,
            pages_offset,
            pages,
            start_offset: start - base,
            len,
        })
    }
}

/// Write a fresh header, slot table and descriptor table. The data area is
/// one free run covering every page.
///
/// # Safety
/// `base` must be valid for writes of `layout.len` bytes, aligned for
/// `PoolHeader`, and not in use by any other executor.
pub unsafe fn write_region(base: *mut u8, layout: &Layout, page_shift: u32, min_shift: u32) {
    let header = base as *mut PoolHeader;
    header.write(PoolHeader {
        magic: MAGIC,
        lock: ShmMutex::new(),
        word_bits: WORD_BITS,
        page_shift,
        min_shift,
        num_slots: layout.num_slots as u32,
        pages: layout.pages as u32,
        free: ListHead::EMPTY,
        start_offset: layout.start_offset,
        len: layout.len,
        data: AtomicUsize::new(0),
    });

    let slots = base.add(layout.slots_offset) as *mut ListHead;
    for i in 0..layout.num_slots {
        slots.add(i).write(ListHead::EMPTY);
    }

    let pages = base.add(layout.pages_offset) as *mut PageDesc;
    for i in 0..layout.pages {
        pages.add(i).write(PageDesc::FREE);
    }

    if layout.pages > 0 {
        let first = &mut *pages;
        first.set_free_run(layout.pages);
        first.list = LIST_FREE;
        (*header).free.first = 0;
    }
}

/// Check that the header at `base` describes exactly `layout` with this
/// executor's word width and geometry.
///
/// # Safety
/// `base` must be valid for reads of `size_of::<PoolHeader>()` bytes and
/// aligned for `PoolHeader`.
pub unsafe fn check_region(
    base: *const u8,
    layout: &Layout,
    page_shift: u32,
    min_shift: u32,
) -> Result<(), ConfigError> {
    let header = &*(base as *const PoolHeader);
    if header.magic != MAGIC {
        return Err(ConfigError::Incompatible("bad magic"));
    }
    if header.word_bits != WORD_BITS {
        return Err(ConfigError::Incompatible("word width"));
    }
    if header.page_shift != page_shift {
        return Err(ConfigError::Incompatible("page size"));
    }
    if header.min_shift != min_shift || header.num_slots as usize != layout.num_slots {
        return Err(ConfigError::Incompatible("size classes"));
    }
    if header.len != layout.len
        || header.pages as usize != layout.pages
        || header.start_offset != layout.start_offset
    {
        return Err(ConfigError::Incompatible("region size"));
    }
    Ok(())
}
