//! Point-in-time usage snapshot of a pool.

use crate::slab::page::LIST_FREE;
use crate::slab::{PageDesc, PageState, Regime, Slabs};

/// Usage of one size class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub chunk_size: usize,
    /// Pages currently carved into chunks of this class.
    pub pages: usize,
    /// Pages on the candidate list (at least one free chunk).
    pub candidates: usize,
    /// Chunks handed out and not yet freed.
    pub used: usize,
    /// Chunks the class's pages could hand out in total.
    pub capacity: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub page_size: usize,
    pub pages: usize,
    pub free_pages: usize,
    pub free_runs: usize,
    pub largest_free_run: usize,
    /// Pages held by whole-page allocations.
    pub run_pages: usize,
    pub slots: Vec<SlotStats>,
}

impl PoolStats {
    /// Chunks in use across every size class.
    pub fn used_chunks(&self) -> usize {
        self.slots.iter().map(|s| s.used).sum()
    }
}

/// Copy of the allocator tables: every descriptor plus the order of the
/// free list and of each candidate list. Two snapshots compare equal only if
/// no descriptor changed and no list was reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    /// First page of each free run, head first.
    pub free_list: Vec<usize>,
    /// Candidate pages per size class, head first.
    pub slot_lists: Vec<Vec<usize>>,
    pub pages: Vec<PageDesc>,
}

/// Caller holds the pool lock.
pub(crate) fn snapshot(slabs: &Slabs<'_>) -> TableSnapshot {
    TableSnapshot {
        free_list: slabs.iter_list(LIST_FREE).collect(),
        slot_lists: (0..slabs.classes.num_slots())
            .map(|slot| slabs.iter_list(slot as u8).collect())
            .collect(),
        pages: slabs.pages.to_vec(),
    }
}

/// Scan every descriptor. Caller holds the pool lock.
pub(crate) fn collect(slabs: &mut Slabs<'_>) -> PoolStats {
    let classes = slabs.classes;
    let mut stats = PoolStats {
        page_size: classes.page_size(),
        pages: slabs.pages.len(),
        slots: (0..classes.num_slots())
            .map(|slot| SlotStats {
                chunk_size: classes.class_of_slot(slot).chunk_size(),
                ..SlotStats::default()
            })
            .collect(),
        ..PoolStats::default()
    };

    for idx in slabs.iter_list(LIST_FREE) {
        if let PageState::Free { run } = slabs.pages[idx].state() {
            stats.free_runs += 1;
            stats.free_pages += run;
            stats.largest_free_run = stats.largest_free_run.max(run);
        }
    }

    for slot in 0..classes.num_slots() {
        stats.slots[slot].candidates = slabs.iter_list(slot as u8).count();
    }

    for idx in 0..slabs.pages.len() {
        let (shift, used) = match slabs.pages[idx].state() {
            PageState::Run { pages } => {
                stats.run_pages += pages;
                continue;
            }
            PageState::Free { .. } | PageState::Busy => continue,
            PageState::Small { shift } => (shift, slabs.bitmap(idx, shift).used()),
            PageState::Exact { map } => (classes.exact_shift(), map.count_ones() as usize),
            PageState::Big { shift, map } => (shift, map.count_ones() as usize),
        };
        let slot = (shift - classes.min_shift()) as usize;
        let s = &mut stats.slots[slot];
        s.pages += 1;
        s.used += used;
        s.capacity += match classes.regime(shift) {
            Regime::Small => classes.usable_chunks(shift),
            Regime::Exact | Regime::Big => classes.chunks_per_page(shift),
        };
    }
    stats
}
