//! Allocation behaviour of a pool over a shared mapping with 4 KiB pages.

use std::collections::HashSet;
use std::ptr::NonNull;

use shmslab::{PoolConfig, SharedMemory, SlabPool};

const PAGE: usize = 4096;

/// Keeps the mapping alive for as long as the pool.
struct Fixture {
    pool: SlabPool,
    _shm: SharedMemory,
}

fn fixture(pages: usize) -> Fixture {
    let shm = SharedMemory::alloc("pool_basic", (pages + 1) * PAGE).unwrap();
    let config = PoolConfig {
        page_size: PAGE,
        min_shift: 3,
        ..PoolConfig::default()
    };
    let pool = unsafe { SlabPool::init(shm.addr(), shm.size(), &config).unwrap() };
    Fixture { pool, _shm: shm }
}

fn page_of(pool: &SlabPool, p: NonNull<u8>) -> usize {
    (p.as_ptr() as usize - pool.start() as usize) / PAGE
}

fn offset_in_page(p: NonNull<u8>) -> usize {
    p.as_ptr() as usize % PAGE
}

// ---------------------------------------------------------------------------
// Size class selection and the SMALL bitmap reservation
// ---------------------------------------------------------------------------

#[test]
fn size_10_uses_16_byte_class() {
    let f = fixture(16);
    let a = f.pool.alloc(10).unwrap();
    let b = f.pool.alloc(10).unwrap();
    assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
    // Two chunks of bitmap precede the first usable one.
    assert_eq!(offset_in_page(a), 32);
    let stats = f.pool.stats();
    assert_eq!(stats.slots[1].chunk_size, 16);
    assert_eq!(stats.slots[1].used, 2);
}

#[test]
fn allocation_255_of_16_bytes_comes_from_second_page() {
    let f = fixture(16);
    let first: Vec<_> = (0..254).map(|_| f.pool.alloc(10).unwrap()).collect();
    let page = page_of(&f.pool, first[0]);
    assert!(first.iter().all(|&p| page_of(&f.pool, p) == page));
    assert_eq!(first.iter().map(|p| p.as_ptr() as usize).collect::<HashSet<_>>().len(), 254);

    let next = f.pool.alloc(10).unwrap();
    assert_ne!(page_of(&f.pool, next), page);
}

#[test]
fn bitmap_chunks_are_never_handed_out() {
    let f = fixture(32);
    // 8-byte class: 512 chunks, 64 bytes of bitmap, 8 reserved chunks.
    for _ in 0..504 {
        let p = f.pool.alloc(8).unwrap();
        assert!(offset_in_page(p) >= 64);
    }
    let stats = f.pool.stats();
    assert_eq!(stats.slots[0].pages, 1);
    assert_eq!(stats.slots[0].capacity, 504);
    assert_eq!(stats.slots[0].candidates, 0);
}

#[test]
fn live_chunks_per_page_never_exceed_capacity() {
    let f = fixture(64);
    for shift in 3..11 {
        let size = 1usize << shift;
        let mut per_page = std::collections::HashMap::<usize, usize>::new();
        let mut ptrs = Vec::new();
        for _ in 0..(2 * PAGE / size) {
            let p = f.pool.alloc(size).unwrap();
            *per_page.entry(page_of(&f.pool, p)).or_default() += 1;
            ptrs.push(p);
        }
        assert!(per_page.values().all(|&n| n <= PAGE / size), "class {size}");
        for p in ptrs {
            unsafe { f.pool.free(p).unwrap() };
        }
    }
}

// ---------------------------------------------------------------------------
// Page-run routing
// ---------------------------------------------------------------------------

#[test]
fn request_of_3000_takes_one_page() {
    let f = fixture(16);
    let before = f.pool.stats().free_pages;
    let p = f.pool.alloc(3000).unwrap();
    assert_eq!(offset_in_page(p), 0);
    assert_eq!(f.pool.stats().free_pages, before - 1);
    assert_eq!(f.pool.stats().run_pages, 1);
}

#[test]
fn half_page_goes_to_page_runs() {
    let f = fixture(16);
    let p = f.pool.alloc(PAGE / 2).unwrap();
    assert_eq!(offset_in_page(p), 0);
    let q = f.pool.alloc(PAGE / 2 - 1).unwrap();
    assert_eq!(f.pool.stats().run_pages, 1);
    assert_eq!(f.pool.stats().slots[8].used, 1);
    unsafe {
        f.pool.free(p).unwrap();
        f.pool.free(q).unwrap();
    }
}

#[test]
fn multi_page_runs_conserve_free_pages() {
    let f = fixture(32);
    let before = f.pool.stats().free_pages;
    for k in 1..5 {
        let p = f.pool.alloc(k * PAGE).unwrap();
        assert_eq!(offset_in_page(p), 0);
        assert_eq!(f.pool.stats().free_pages, before - k);
        unsafe { f.pool.free(p).unwrap() };
        assert_eq!(f.pool.stats().free_pages, before);
    }
}

#[test]
fn freed_runs_are_not_merged() {
    let f = fixture(8);
    let pages = f.pool.pages();
    let a = f.pool.alloc(PAGE).unwrap();
    let rest = f.pool.alloc((pages - 1) * PAGE).unwrap();
    unsafe {
        f.pool.free(a).unwrap();
        f.pool.free(rest).unwrap();
    }
    let stats = f.pool.stats();
    assert_eq!(stats.free_pages, pages);
    assert_eq!(stats.free_runs, 2);
    assert!(f.pool.alloc(pages * PAGE).unwrap_err().is_exhausted());
}

// ---------------------------------------------------------------------------
// Reuse
// ---------------------------------------------------------------------------

#[test]
fn fixed_size_alloc_free_does_not_leak_pages() {
    let f = fixture(64);
    let before = f.pool.stats();
    for size in [1, 8, 10, 16, 33, 64, 100, 1000, 2047, 3000, 9000] {
        let count = (16 * PAGE / size.max(8)).min(300);
        let ptrs: Vec<_> = (0..count).map(|_| f.pool.alloc(size).unwrap()).collect();
        for p in ptrs {
            unsafe { f.pool.free(p).unwrap() };
        }
        let after = f.pool.stats();
        assert_eq!(after.free_pages, before.free_pages, "size {size}");
        assert_eq!(after.used_chunks(), 0);
    }
}

#[test]
fn freed_chunk_is_reused_while_page_stays_in_use() {
    let f = fixture(16);
    let keep = f.pool.alloc(48).unwrap();
    let p = f.pool.alloc(48).unwrap();
    unsafe { f.pool.free(p).unwrap() };
    let q = f.pool.alloc(48).unwrap();
    assert_eq!(p, q);
    unsafe {
        f.pool.free(q).unwrap();
        f.pool.free(keep).unwrap();
    }
}

#[test]
fn last_chunk_free_returns_page() {
    let f = fixture(16);
    let before = f.pool.stats().free_pages;
    let p = f.pool.alloc(48).unwrap();
    assert_eq!(f.pool.stats().free_pages, before - 1);
    unsafe { f.pool.free(p).unwrap() };
    assert_eq!(f.pool.stats().free_pages, before);
    assert_eq!(f.pool.stats().slots[3].pages, 0);

    // The page went back to the runs, so the address may differ.
    let q = f.pool.alloc(48).unwrap();
    assert!(f.pool.contains(q.as_ptr()));
}

#[test]
fn full_page_is_candidate_again_after_one_free() {
    let f = fixture(16);
    // 1024-byte class: four chunks per page, BIG regime.
    let ptrs: Vec<_> = (0..4).map(|_| f.pool.alloc(1024).unwrap()).collect();
    let stats = f.pool.stats();
    assert_eq!(stats.slots[7].candidates, 0);
    let free_before = stats.free_pages;

    unsafe { f.pool.free(ptrs[1]).unwrap() };
    assert_eq!(f.pool.stats().slots[7].candidates, 1);

    let again = f.pool.alloc(1000).unwrap();
    assert_eq!(again, ptrs[1]);
    assert_eq!(f.pool.stats().free_pages, free_before);
}

/// Fill one page of the class serving `size`, free a chunk in the middle and
/// check that the page is reused before any new page is taken.
fn relink_on_first_free(size: usize, per_page: usize) {
    let f = fixture(16);
    let slot = f.pool.classes().class_for(size).slot;
    let ptrs: Vec<_> = (0..per_page).map(|_| f.pool.alloc(size).unwrap()).collect();
    let page = page_of(&f.pool, ptrs[0]);
    assert!(ptrs.iter().all(|&p| page_of(&f.pool, p) == page));
    let stats = f.pool.stats();
    assert_eq!(stats.slots[slot].candidates, 0);
    assert_eq!(stats.slots[slot].pages, 1);
    let free_before = stats.free_pages;

    let victim = ptrs[per_page / 2];
    unsafe { f.pool.free(victim).unwrap() };
    let stats = f.pool.stats();
    assert_eq!(stats.slots[slot].candidates, 1);
    assert_eq!(stats.free_pages, free_before);

    assert_eq!(f.pool.alloc(size).unwrap(), victim);
    let stats = f.pool.stats();
    assert_eq!(stats.slots[slot].candidates, 0);
    assert_eq!(stats.slots[slot].pages, 1);
    assert_eq!(stats.free_pages, free_before);
}

#[test]
fn full_small_page_is_candidate_again_after_one_free() {
    // 16-byte class: two bitmap chunks leave 254 usable.
    relink_on_first_free(16, 254);
}

#[test]
fn full_exact_page_is_candidate_again_after_one_free() {
    let exact = fixture(1).pool.classes().exact_size();
    relink_on_first_free(exact, PAGE / exact);
}

#[test]
fn exact_class_fills_one_word() {
    let f = fixture(16);
    let exact = f.pool.classes().exact_size();
    let per_page = PAGE / exact;
    let ptrs: Vec<_> = (0..per_page).map(|_| f.pool.alloc(exact).unwrap()).collect();
    let page = page_of(&f.pool, ptrs[0]);
    assert!(ptrs.iter().all(|&p| page_of(&f.pool, p) == page));
    assert_eq!(offset_in_page(ptrs[0]), 0);
    let next = f.pool.alloc(exact).unwrap();
    assert_ne!(page_of(&f.pool, next), page);
}

#[test]
fn pool_with_no_pages_only_fails() {
    let shm = SharedMemory::alloc("no_pages", 512).unwrap();
    let config = PoolConfig {
        page_size: PAGE,
        ..PoolConfig::default()
    };
    // Only the first 512 bytes are handed to the pool.
    let pool = unsafe { SlabPool::init(shm.addr(), 512, &config).unwrap() };
    assert_eq!(pool.pages(), 0);
    assert!(pool.alloc(8).unwrap_err().is_exhausted());
    assert!(pool.alloc(PAGE).unwrap_err().is_exhausted());
}
