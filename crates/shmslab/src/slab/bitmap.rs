use crate::util::WORD_BITS;

const BITS: usize = WORD_BITS as usize;

/// Occupancy bitmap of a SMALL slab page, stored in the page's own leading
/// chunks. Each bit represents one chunk: 1 = in use, 0 = free.
///
/// The first `reserved` bits cover the chunks that hold the bitmap itself and
/// stay set for the page's whole life as a slab.
pub struct SlabBitmap<'a> {
    words: &'a mut [usize],
    reserved: usize,
}

impl<'a> SlabBitmap<'a> {
    /// Wrap an existing bitmap.
    pub fn new(words: &'a mut [usize], reserved: usize) -> Self {
        debug_assert!(reserved < words.len() * BITS);
        SlabBitmap { words, reserved }
    }

    /// Reset the bitmap for a fresh page: only the reserved chunks are live.
    pub fn init(words: &'a mut [usize], reserved: usize) -> Self {
        for (i, w) in words.iter_mut().enumerate() {
            *w = Self::reserved_mask(i, reserved);
        }
        SlabBitmap { words, reserved }
    }

    /// Bits of word `i` that belong to the reservation.
    #[inline]
    fn reserved_mask(i: usize, reserved: usize) -> usize {
        let lo = i * BITS;
        if reserved <= lo {
            0
        } else if reserved >= lo + BITS {
            usize::MAX
        } else {
            (1usize << (reserved - lo)) - 1
        }
    }

    /// Number of chunks tracked.
    #[inline]
    pub fn num_chunks(&self) -> usize {
        self.words.len() * BITS
    }

    /// Take the lowest free chunk. Returns the chunk index and whether the
    /// page became full, or None if it was already full.
    pub fn alloc_first_free(&mut self) -> Option<(usize, bool)> {
        let n = self.words.len();
        for i in 0..n {
            let word = self.words[i];
            if word != usize::MAX {
                let bit = (!word).trailing_zeros() as usize;
                self.words[i] = word | (1 << bit);
                // Earlier words were full, so only the rest can still have room.
                let full = self.words[i..].iter().all(|&w| w == usize::MAX);
                return Some((i * BITS + bit, full));
            }
        }
        None
    }

    /// Whether `chunk` is currently in use (reserved chunks count as in use).
    #[inline]
    pub fn is_allocated(&self, chunk: usize) -> bool {
        self.words[chunk / BITS] & (1 << (chunk % BITS)) != 0
    }

    /// Whether `chunk` belongs to the bitmap's own storage.
    #[inline]
    pub fn is_reserved(&self, chunk: usize) -> bool {
        chunk < self.reserved
    }

    /// Release a chunk. Returns false, leaving the bitmap untouched, if the
    /// chunk was not in use.
    pub fn free_chunk(&mut self, chunk: usize) -> bool {
        debug_assert!(chunk < self.num_chunks() && !self.is_reserved(chunk));
        let mask = 1usize << (chunk % BITS);
        let word = &mut self.words[chunk / BITS];
        if *word & mask == 0 {
            return false;
        }
        *word &= !mask;
        true
    }

    /// True when no chunk beyond the reservation is in use.
    pub fn is_empty(&self) -> bool {
        self.words
            .iter()
            .enumerate()
            .all(|(i, &w)| w == Self::reserved_mask(i, self.reserved))
    }

    /// Live chunks handed out to callers.
    pub fn used(&self) -> usize {
        let set: u32 = self.words.iter().map(|w| w.count_ones()).sum();
        set as usize - self.reserved
    }
}
