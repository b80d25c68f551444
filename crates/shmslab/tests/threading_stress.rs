//! Thread stress tests: many threads sharing one pool through its lock.

use std::ptr::{self, NonNull};
use std::sync::{Arc, Barrier};
use std::thread;

use shmslab::{PoolConfig, SharedMemory, SlabPool};

const PAGE: usize = 4096;

struct Shared {
    pool: SlabPool,
    _shm: SharedMemory,
}

fn shared(pages: usize) -> Arc<Shared> {
    let shm = SharedMemory::alloc("threads", (pages + 1) * PAGE).unwrap();
    let config = PoolConfig {
        page_size: PAGE,
        spin: 64,
        ..PoolConfig::default()
    };
    let pool = unsafe { SlabPool::init(shm.addr(), shm.size(), &config).unwrap() };
    Arc::new(Shared { pool, _shm: shm })
}

/// Raw pointers are not Send; the pool memory they point into is shared.
#[derive(Clone, Copy)]
struct SendPtr(NonNull<u8>);
unsafe impl Send for SendPtr {}

fn run_threads<F>(num_threads: usize, s: &Arc<Shared>, body: F)
where
    F: Fn(&SlabPool, usize) + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(num_threads));
    let body = Arc::new(body);
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let barrier = Arc::clone(&barrier);
            let s = Arc::clone(s);
            let body = Arc::clone(&body);
            thread::spawn(move || {
                barrier.wait();
                body(&s.pool, t);
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread panicked during pool stress");
    }
}

// ---------------------------------------------------------------------------
// Rapid alloc/free cycles with pattern checks
// ---------------------------------------------------------------------------

fn stress_alloc_free(num_threads: usize) {
    const ITERATIONS: usize = 5_000;
    let s = shared(256);
    let before = s.pool.stats().free_pages;

    run_threads(num_threads, &s, |pool, t| {
        let tag = t as u8;
        for i in 0..ITERATIONS {
            let size = [8, 24, 64, 200, 1000, 1500, 3000][i % 7];
            let p = pool.alloc(size).expect("pool exhausted under contention");
            unsafe {
                ptr::write_bytes(p.as_ptr(), tag, size);
                let bytes = std::slice::from_raw_parts(p.as_ptr(), size);
                assert!(bytes.iter().all(|&b| b == tag), "block shared between threads");
                pool.free(p).unwrap();
            }
        }
    });

    let stats = s.pool.stats();
    assert_eq!(stats.free_pages, before);
    assert_eq!(stats.used_chunks(), 0);
}

#[test]
fn stress_alloc_free_4_threads() {
    stress_alloc_free(4);
}

#[test]
fn stress_alloc_free_8_threads() {
    stress_alloc_free(8);
}

// ---------------------------------------------------------------------------
// Live sets held across iterations
// ---------------------------------------------------------------------------

#[test]
fn held_blocks_never_overlap() {
    const THREADS: usize = 6;
    const LIVE: usize = 64;
    let s = shared(512);

    run_threads(THREADS, &s, |pool, t| {
        let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::with_capacity(LIVE);
        for round in 0..200usize {
            let size = 1 + (round * 37 + t * 101) % 2500;
            let tag = (round as u8) ^ (t as u8).wrapping_mul(31);
            let p = pool.alloc(size).expect("pool exhausted");
            unsafe { ptr::write_bytes(p.as_ptr(), tag, size) };
            live.push((p, size, tag));

            if live.len() == LIVE {
                for (p, size, tag) in live.drain(..LIVE / 2) {
                    unsafe {
                        let bytes = std::slice::from_raw_parts(p.as_ptr(), size);
                        assert!(bytes.iter().all(|&b| b == tag), "block overwritten");
                        pool.free(p).unwrap();
                    }
                }
            }
        }
        for (p, _, _) in live {
            unsafe { pool.free(p).unwrap() };
        }
    });

    assert_eq!(s.pool.stats().used_chunks(), 0);
    assert_eq!(s.pool.stats().run_pages, 0);
}

// ---------------------------------------------------------------------------
// Cross-thread free
// ---------------------------------------------------------------------------

#[test]
fn free_on_other_thread() {
    let s = shared(64);
    let ptrs: Vec<SendPtr> = (0..500).map(|_| SendPtr(s.pool.alloc(48).unwrap())).collect();

    let s2 = Arc::clone(&s);
    thread::spawn(move || {
        for p in ptrs {
            unsafe { s2.pool.free(p.0).unwrap() };
        }
    })
    .join()
    .expect("freeing thread panicked");

    assert_eq!(s.pool.stats().used_chunks(), 0);
}

// ---------------------------------------------------------------------------
// Locked composition
// ---------------------------------------------------------------------------

#[test]
fn guard_batches_are_atomic() {
    let s = shared(128);
    run_threads(4, &s, |pool, _| {
        for _ in 0..500 {
            let mut g = pool.lock();
            let a = g.alloc(32).unwrap();
            let b = g.alloc(32).unwrap();
            // Every batch starts from an empty pool and nobody else can
            // allocate between the two calls.
            assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 32);
            unsafe {
                g.free(a).unwrap();
                g.free(b).unwrap();
            }
        }
    });
}
