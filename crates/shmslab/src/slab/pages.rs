//! Page-run allocator.
//!
//! Free pages are kept as runs in an unordered list; the head page of each run
//! records its length. Allocation is first-fit, splitting the tail off in
//! place. Released runs are pushed on the front of the list and never merged
//! with their neighbours, so fragmentation can accumulate over the life of the
//! pool.

use super::page::{PageDesc, PageState, LIST_FREE};
use super::Slabs;

impl Slabs<'_> {
    /// Detach a run of `n` pages from the free list. Returns the index of its
    /// first page, or None if no free run is long enough.
    pub(crate) fn alloc_pages(&mut self, n: usize) -> Option<usize> {
        debug_assert!(n > 0);
        let mut found = None;
        for idx in self.iter_list(LIST_FREE) {
            if let PageState::Free { run } = self.pages[idx].state() {
                if run >= n {
                    found = Some((idx, run));
                    break;
                }
            }
        }
        let (idx, run) = found?;

        if run > n {
            let rest = idx + n;
            self.pages[rest].set_free_run(run - n);
            self.replace(idx, rest);
        } else {
            self.unlink(idx);
        }

        self.pages[idx].set_run(n);
        for page in &mut self.pages[idx + 1..idx + n] {
            page.set_busy();
        }
        Some(idx)
    }

    /// Return `n` pages starting at `idx` to the free list as one run.
    ///
    /// `idx` may be an allocated run head or a slab page that is still linked
    /// into its size class list.
    pub(crate) fn free_pages(&mut self, idx: usize, n: usize) {
        self.unlink(idx);
        for page in &mut self.pages[idx + 1..idx + n] {
            *page = PageDesc::FREE;
        }
        self.pages[idx].set_free_run(n);
        self.link_front(LIST_FREE, idx);
    }

    /// Total pages sitting in free runs.
    #[cfg(test)]
    pub(crate) fn free_page_count(&self) -> usize {
        self.iter_list(LIST_FREE)
            .map(|idx| match self.pages[idx].state() {
                PageState::Free { run } => run,
                _ => 0,
            })
            .sum()
    }
}
