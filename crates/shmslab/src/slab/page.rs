//! Page descriptor table.
//!
//! One `PageDesc` per page of the data area, stored in the shared region right
//! after the slot table. Descriptors are addressed by page index and linked
//! into lists by index, so nothing in the table depends on where the region
//! is mapped.
//!
//! The status word is interpreted according to the regime tag:
//!   PAGE   run length (free run head), `PAGE_START | n` (allocated run head),
//!          `PAGE_BUSY` (allocated run interior) or 0 (free, not a run head)
//!   SMALL  chunk shift; the bitmap lives in the page itself
//!   EXACT  occupancy bitmap, one bit per chunk
//!   BIG    bits [0..4) chunk shift, bits [WORD/2..WORD) occupancy bitmap

use crate::util::WORD_BITS;

/// Null page index.
pub const NIL: u32 = u32::MAX;

/// `list` value of a page that is in no list (allocated run, full slab).
pub const LIST_DETACHED: u8 = 0xff;
/// `list` value of a page heading a free run.
pub const LIST_FREE: u8 = 0xfe;

const PAGE_FREE: usize = 0;
const PAGE_BUSY: usize = usize::MAX;
const PAGE_START: usize = 1 << (WORD_BITS - 1);

const SHIFT_MASK: usize = 0xf;
pub const MAP_SHIFT: u32 = WORD_BITS / 2;

/// Regime tag stored in every descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    Page = 0,
    Big = 1,
    Exact = 2,
    Small = 3,
}

impl PageKind {
    #[inline]
    fn from_raw(raw: u8) -> Self {
        match raw & 3 {
            0 => PageKind::Page,
            1 => PageKind::Big,
            2 => PageKind::Exact,
            _ => PageKind::Small,
        }
    }
}

/// Decoded view of one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Not allocated. `run` is the run length for a free-run head, 0 otherwise.
    Free { run: usize },
    /// First page of an allocated run of `pages` pages.
    Run { pages: usize },
    /// Interior page of an allocated run.
    Busy,
    /// Slab of chunks smaller than the exact size.
    Small { shift: u32 },
    /// Slab of exact-size chunks.
    Exact { map: usize },
    /// Slab of chunks larger than the exact size.
    Big { shift: u32, map: usize },
}

/// One page descriptor as laid out in the shared region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PageDesc {
    slab: usize,
    pub(crate) next: u32,
    pub(crate) prev: u32,
    kind: u8,
    pub(crate) list: u8,
    _pad: [u8; 2],
}

impl PageDesc {
    /// A free page that heads no run and sits in no list.
    pub const FREE: PageDesc = PageDesc {
        slab: PAGE_FREE,
        next: NIL,
        prev: NIL,
        kind: PageKind::Page as u8,
        list: LIST_DETACHED,
        _pad: [0; 2],
    };

    #[inline]
    pub fn kind(&self) -> PageKind {
        PageKind::from_raw(self.kind)
    }

    #[inline]
    pub fn is_detached(&self) -> bool {
        self.list == LIST_DETACHED
    }

    pub fn state(&self) -> PageState {
        let slab = self.slab;
        match self.kind() {
            PageKind::Page => match slab {
                PAGE_BUSY => PageState::Busy,
                s if s & PAGE_START != 0 => PageState::Run {
                    pages: s & !PAGE_START,
                },
                run => PageState::Free { run },
            },
            PageKind::Small => PageState::Small {
                shift: (slab & SHIFT_MASK) as u32,
            },
            PageKind::Exact => PageState::Exact { map: slab },
            PageKind::Big => PageState::Big {
                shift: (slab & SHIFT_MASK) as u32,
                map: slab >> MAP_SHIFT,
            },
        }
    }

    /// Raw status word. Doubles as the bitmap for EXACT pages.
    #[inline]
    pub fn word(&self) -> usize {
        self.slab
    }

    pub(crate) fn set_free_run(&mut self, pages: usize) {
        self.slab = pages;
        self.kind = PageKind::Page as u8;
    }

    pub(crate) fn set_run(&mut self, pages: usize) {
        self.slab = pages | PAGE_START;
        self.kind = PageKind::Page as u8;
        self.detach();
    }

    pub(crate) fn set_busy(&mut self) {
        self.slab = PAGE_BUSY;
        self.kind = PageKind::Page as u8;
        self.detach();
    }

    pub(crate) fn set_small(&mut self, shift: u32) {
        self.slab = shift as usize;
        self.kind = PageKind::Small as u8;
    }

    pub(crate) fn set_exact(&mut self, map: usize) {
        self.slab = map;
        self.kind = PageKind::Exact as u8;
    }

    pub(crate) fn set_big(&mut self, shift: u32, map: usize) {
        self.slab = (map << MAP_SHIFT) | shift as usize;
        self.kind = PageKind::Big as u8;
    }

    #[inline]
    pub(crate) fn detach(&mut self) {
        self.next = NIL;
        self.prev = NIL;
        self.list = LIST_DETACHED;
    }
}

/// Head of an index-linked page list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ListHead {
    pub(crate) first: u32,
}

impl ListHead {
    pub const EMPTY: ListHead = ListHead { first: NIL };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.first == NIL
    }
}
