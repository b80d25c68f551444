pub mod arena;
pub mod bitmap;
pub mod page;
pub mod pages;
pub mod size_class;

pub use page::{PageDesc, PageKind, PageState};
pub use size_class::{Regime, SizeClass, SizeClasses};

use page::{ListHead, LIST_DETACHED, LIST_FREE, NIL};

/// Mutable view over the allocator state of one pool.
///
/// Built only while the pool mutex is held; every method assumes exclusive
/// access to the free list, the slot table, the descriptor table and the
/// bitmaps stored in SMALL pages.
pub(crate) struct Slabs<'a> {
    pub(crate) free: &'a mut ListHead,
    pub(crate) slots: &'a mut [ListHead],
    pub(crate) pages: &'a mut [PageDesc],
    /// First byte of page 0.
    pub(crate) start: *mut u8,
    pub(crate) classes: &'a SizeClasses,
}

impl Slabs<'_> {
    /// Address of the first byte of page `idx`.
    #[inline]
    pub(crate) fn page_addr(&self, idx: usize) -> *mut u8 {
        // SAFETY: idx < pages.len(), and the data area holds pages.len() pages.
        unsafe { self.start.add(idx << self.classes.page_shift()) }
    }

    #[inline]
    fn head_mut(&mut self, list: u8) -> &mut ListHead {
        match list {
            LIST_FREE => &mut *self.free,
            slot => &mut self.slots[slot as usize],
        }
    }

    /// Push page `idx` on the front of `list`.
    pub(crate) fn link_front(&mut self, list: u8, idx: usize) {
        let first = self.head_mut(list).first;
        {
            let page = &mut self.pages[idx];
            page.next = first;
            page.prev = NIL;
            page.list = list;
        }
        if first != NIL {
            self.pages[first as usize].prev = idx as u32;
        }
        self.head_mut(list).first = idx as u32;
    }

    /// Remove page `idx` from whatever list holds it and mark it detached.
    pub(crate) fn unlink(&mut self, idx: usize) {
        let PageDesc { next, prev, list, .. } = self.pages[idx];
        if list == LIST_DETACHED {
            return;
        }
        if prev == NIL {
            self.head_mut(list).first = next;
        } else {
            self.pages[prev as usize].next = next;
        }
        if next != NIL {
            self.pages[next as usize].prev = prev;
        }
        self.pages[idx].detach();
    }

    /// Put page `new` in the list position held by `old`, detaching `old`.
    pub(crate) fn replace(&mut self, old: usize, new: usize) {
        let PageDesc { next, prev, list, .. } = self.pages[old];
        debug_assert_ne!(list, LIST_DETACHED);
        {
            let page = &mut self.pages[new];
            page.next = next;
            page.prev = prev;
            page.list = list;
        }
        if prev == NIL {
            self.head_mut(list).first = new as u32;
        } else {
            self.pages[prev as usize].next = new as u32;
        }
        if next != NIL {
            self.pages[next as usize].prev = new as u32;
        }
        self.pages[old].detach();
    }

    /// Iterate the page indices of `list`, front to back.
    pub(crate) fn iter_list(&self, list: u8) -> ListIter<'_> {
        let first = match list {
            LIST_FREE => self.free.first,
            slot => self.slots[slot as usize].first,
        };
        ListIter {
            pages: &self.pages[..],
            cur: first,
        }
    }
}

pub(crate) struct ListIter<'a> {
    pages: &'a [PageDesc],
    cur: u32,
}

impl Iterator for ListIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == NIL {
            return None;
        }
        let idx = self.cur as usize;
        self.cur = self.pages[idx].next;
        Some(idx)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;

    #[test]
    fn link_and_unlink_keep_neighbours_consistent() {
        let mut h = Harness::new(4);
        let mut s = h.slabs();
        s.unlink(0);
        assert!(s.free.is_empty());

        s.link_front(0, 1);
        s.link_front(0, 2);
        s.link_front(0, 3);
        assert_eq!(s.iter_list(0).collect::<Vec<_>>(), vec![3, 2, 1]);

        s.unlink(2);
        assert_eq!(s.iter_list(0).collect::<Vec<_>>(), vec![3, 1]);
        assert!(s.pages[2].is_detached());
        assert_eq!(s.pages[1].prev, 3);

        s.unlink(3);
        assert_eq!(s.slots[0].first, 1);
        assert_eq!(s.pages[1].prev, NIL);
    }

    #[test]
    fn replace_takes_over_list_position() {
        let mut h = Harness::new(4);
        let mut s = h.slabs();
        s.unlink(0);
        s.link_front(LIST_FREE, 1);
        s.link_front(LIST_FREE, 0);
        s.replace(0, 2);
        assert_eq!(s.iter_list(LIST_FREE).collect::<Vec<_>>(), vec![2, 1]);
        assert!(s.pages[0].is_detached());
    }
}
