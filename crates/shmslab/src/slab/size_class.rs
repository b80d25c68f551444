use crate::util::{ceil_log2, WORD_BITS};

/// How a slab page tracks the occupancy of its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    /// Chunk smaller than the exact size: bitmap stored at the start of the page.
    Small,
    /// Chunk count equals the word width: the status word is the bitmap.
    Exact,
    /// Chunk larger than the exact size: status word packs shift and bitmap.
    Big,
}

/// A resolved size class for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    /// Index into the slot table.
    pub slot: usize,
    /// log2 of the chunk size.
    pub shift: u32,
}

impl SizeClass {
    #[inline]
    pub fn chunk_size(&self) -> usize {
        1 << self.shift
    }
}

/// Power-of-two size classes from `min_size` up to half a page.
///
/// Every derived constant is computed once when a pool handle is built, so
/// two handles over the same region agree as long as they agree on page
/// size and minimum shift.
#[derive(Debug, Clone)]
pub struct SizeClasses {
    page_shift: u32,
    min_shift: u32,
    exact_shift: u32,
    /// Chunks consumed by the in-page bitmap, per slot (0 outside SMALL).
    reserved: Vec<usize>,
}

impl SizeClasses {
    /// Build the class table. Callers validate `min_shift < page_shift` and
    /// that a page holds at least one word's worth of bits.
    pub fn new(page_shift: u32, min_shift: u32) -> Self {
        let exact_shift = page_shift - WORD_BITS.trailing_zeros();
        let num_slots = (page_shift - min_shift) as usize;
        let mut reserved = vec![0; num_slots];
        for (slot, r) in reserved.iter_mut().enumerate() {
            let shift = min_shift + slot as u32;
            if shift < exact_shift {
                let bitmap_bytes = (1usize << (page_shift - shift)) / 8;
                *r = bitmap_bytes.div_ceil(1 << shift).max(1);
            }
        }
        SizeClasses {
            page_shift,
            min_shift,
            exact_shift,
            reserved,
        }
    }

    #[inline]
    pub fn page_shift(&self) -> u32 {
        self.page_shift
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        1 << self.page_shift
    }

    #[inline]
    pub fn min_shift(&self) -> u32 {
        self.min_shift
    }

    #[inline]
    pub fn min_size(&self) -> usize {
        1 << self.min_shift
    }

    /// Requests of this size or larger bypass the slots and take whole pages.
    #[inline]
    pub fn max_size(&self) -> usize {
        self.page_size() / 2
    }

    #[inline]
    pub fn exact_shift(&self) -> u32 {
        self.exact_shift
    }

    #[inline]
    pub fn exact_size(&self) -> usize {
        1 << self.exact_shift
    }

    #[inline]
    pub fn num_slots(&self) -> usize {
        self.reserved.len()
    }

    /// Class for a request below `max_size`.
    #[inline]
    pub fn class_for(&self, size: usize) -> SizeClass {
        debug_assert!(size < self.max_size());
        let shift = ceil_log2(size).max(self.min_shift);
        SizeClass {
            slot: (shift - self.min_shift) as usize,
            shift,
        }
    }

    #[inline]
    pub fn class_of_slot(&self, slot: usize) -> SizeClass {
        SizeClass {
            slot,
            shift: self.min_shift + slot as u32,
        }
    }

    #[inline]
    pub fn regime(&self, shift: u32) -> Regime {
        if shift < self.exact_shift {
            Regime::Small
        } else if shift == self.exact_shift {
            Regime::Exact
        } else {
            Regime::Big
        }
    }

    /// Number of chunks of size `1 << shift` in one page.
    #[inline]
    pub fn chunks_per_page(&self, shift: u32) -> usize {
        1 << (self.page_shift - shift)
    }

    /// Leading chunks of a SMALL page that hold the page's own bitmap.
    #[inline]
    pub fn reserved_chunks(&self, shift: u32) -> usize {
        self.reserved[(shift - self.min_shift) as usize]
    }

    /// Chunks a caller can actually receive from one page of this class.
    #[inline]
    pub fn usable_chunks(&self, shift: u32) -> usize {
        self.chunks_per_page(shift) - self.reserved_chunks(shift)
    }

    /// Bitmap words a SMALL page of this class stores in its first chunks.
    #[inline]
    pub fn bitmap_words(&self, shift: u32) -> usize {
        self.chunks_per_page(shift) / WORD_BITS as usize
    }
}
