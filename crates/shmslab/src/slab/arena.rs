//! Size-class sub-allocator.
//!
//! Each slot keeps a list of slab pages that still have at least one free
//! chunk. A page that fills up is detached from its list so later scans skip
//! it, and is pushed back on the front as soon as one of its chunks is freed.
//! A page whose last chunk is freed goes straight back to the page-run
//! allocator.

use super::bitmap::SlabBitmap;
use super::page::{PageState, MAP_SHIFT, NIL};
use super::size_class::{Regime, SizeClass};
use super::Slabs;
use crate::error::Misuse;

impl Slabs<'_> {
    /// Carve one chunk of the class serving `size`. Returns None when a fresh
    /// page is needed and none is left.
    pub(crate) fn alloc_chunk(&mut self, size: usize) -> Option<*mut u8> {
        let class = self.classes.class_for(size);
        log::debug!("slab alloc: {} slot: {}", size, class.slot);

        let mut cur = self.slots[class.slot].first;
        while cur != NIL {
            let idx = cur as usize;
            cur = self.pages[idx].next;
            if let Some(chunk) = self.take_chunk(idx, class) {
                return Some(self.chunk_addr(idx, chunk, class.shift));
            }
        }

        let idx = self.alloc_pages(1)?;
        let chunk = self.init_slab(idx, class);
        Some(self.chunk_addr(idx, chunk, class.shift))
    }

    #[inline]
    fn chunk_addr(&self, idx: usize, chunk: usize, shift: u32) -> *mut u8 {
        // SAFETY: chunk < chunks_per_page, so the offset stays inside page idx.
        unsafe { self.page_addr(idx).add(chunk << shift) }
    }

    /// The in-page bitmap of SMALL page `idx`.
    pub(crate) fn bitmap(&mut self, idx: usize, shift: u32) -> SlabBitmap<'_> {
        let words = self.classes.bitmap_words(shift);
        let reserved = self.classes.reserved_chunks(shift);
        // SAFETY: the first `reserved` chunks of a SMALL page hold exactly
        // `words` words, are never handed out, and are only touched under the
        // pool lock that `self` stands for.
        let storage =
            unsafe { core::slice::from_raw_parts_mut(self.page_addr(idx) as *mut usize, words) };
        SlabBitmap::new(storage, reserved)
    }

    /// Take the lowest free chunk of listed page `idx`, detaching the page
    /// once it is full.
    fn take_chunk(&mut self, idx: usize, class: SizeClass) -> Option<usize> {
        let (chunk, full) = match self.classes.regime(class.shift) {
            Regime::Small => self.bitmap(idx, class.shift).alloc_first_free()?,
            Regime::Exact => {
                let map = self.pages[idx].word();
                if map == usize::MAX {
                    return None;
                }
                let bit = (!map).trailing_zeros() as usize;
                let map = map | (1 << bit);
                self.pages[idx].set_exact(map);
                (bit, map == usize::MAX)
            }
            Regime::Big => {
                let PageState::Big { shift, map } = self.pages[idx].state() else {
                    return None;
                };
                let mask = self.big_mask(shift);
                if map == mask {
                    return None;
                }
                let bit = (!map).trailing_zeros() as usize;
                let map = map | (1 << bit);
                self.pages[idx].set_big(shift, map);
                (bit, map == mask)
            }
        };
        if full {
            self.unlink(idx);
        }
        Some(chunk)
    }

    /// Bitmap mask with one bit per chunk of a BIG page.
    #[inline]
    fn big_mask(&self, shift: u32) -> usize {
        let chunks = self.classes.chunks_per_page(shift);
        debug_assert!(chunks <= MAP_SHIFT as usize);
        (1usize << chunks) - 1
    }

    /// Turn fresh page `idx` into a slab for `class`, make it the class's
    /// first candidate and return the chunk handed to the caller.
    fn init_slab(&mut self, idx: usize, class: SizeClass) -> usize {
        let chunk = match self.classes.regime(class.shift) {
            Regime::Small => {
                self.pages[idx].set_small(class.shift);
                let reserved = self.classes.reserved_chunks(class.shift);
                let words = self.classes.bitmap_words(class.shift);
                // SAFETY: see `bitmap`; the page was just taken from the free list.
                let storage = unsafe {
                    core::slice::from_raw_parts_mut(self.page_addr(idx) as *mut usize, words)
                };
                let mut bitmap = SlabBitmap::init(storage, reserved);
                match bitmap.alloc_first_free() {
                    Some((chunk, _)) => chunk,
                    None => reserved,
                }
            }
            Regime::Exact => {
                self.pages[idx].set_exact(1);
                0
            }
            Regime::Big => {
                self.pages[idx].set_big(class.shift, 1);
                0
            }
        };
        self.link_front(class.slot as u8, idx);
        chunk
    }

    /// Release the chunk at `ptr` inside slab page `idx`. Returns the chunk
    /// size on success. On error nothing is modified.
    pub(crate) fn free_chunk(&mut self, idx: usize, ptr: *mut u8) -> Result<usize, Misuse> {
        let offset = ptr as usize - self.page_addr(idx) as usize;
        let (shift, regime) = match self.pages[idx].state() {
            PageState::Small { shift } => (shift, Regime::Small),
            PageState::Exact { .. } => (self.classes.exact_shift(), Regime::Exact),
            PageState::Big { shift, .. } => (shift, Regime::Big),
            _ => return Err(Misuse::WrongPage),
        };
        let size = 1usize << shift;
        if offset & (size - 1) != 0 {
            return Err(Misuse::WrongChunk);
        }
        let chunk = offset >> shift;

        let empty = match regime {
            Regime::Small => {
                let mut bitmap = self.bitmap(idx, shift);
                if bitmap.is_reserved(chunk) {
                    return Err(Misuse::WrongChunk);
                }
                if !bitmap.free_chunk(chunk) {
                    return Err(Misuse::ChunkAlreadyFree);
                }
                bitmap.is_empty()
            }
            Regime::Exact => {
                let map = self.pages[idx].word();
                let bit = 1usize << chunk;
                if map & bit == 0 {
                    return Err(Misuse::ChunkAlreadyFree);
                }
                self.pages[idx].set_exact(map & !bit);
                map & !bit == 0
            }
            Regime::Big => {
                let PageState::Big { map, .. } = self.pages[idx].state() else {
                    return Err(Misuse::WrongPage);
                };
                let bit = 1usize << chunk;
                if map & bit == 0 {
                    return Err(Misuse::ChunkAlreadyFree);
                }
                self.pages[idx].set_big(shift, map & !bit);
                map & !bit == 0
            }
        };

        if empty {
            self.free_pages(idx, 1);
        } else if self.pages[idx].is_detached() {
            let slot = (shift - self.classes.min_shift()) as u8;
            self.link_front(slot, idx);
        }
        Ok(size)
    }
}
