#![no_main]

use std::ptr::NonNull;
use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use shmslab::{PoolConfig, SharedMemory, SlabPool};

/// Fuzz target that interprets a byte slice as a sequence of pool operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=alloc, 1=free, 2=alloc_zeroed, 3=bogus free)
///   byte 1-2: size (little-endian u16)
///   byte 3: slot index (which tracked pointer to operate on)
///
/// We track up to 64 live pointers. Every run starts from a fresh pool and
/// must end with every page back on the free list.
const MAX_SLOTS: usize = 64;
const PAGE: usize = 4096;
const PAGES: usize = 256;

fn shm() -> &'static SharedMemory {
    static SHM: OnceLock<SharedMemory> = OnceLock::new();
    SHM.get_or_init(|| SharedMemory::alloc("fuzz", (PAGES + 1) * PAGE).unwrap())
}

fuzz_target!(|data: &[u8]| {
    let shm = shm();
    let config = PoolConfig {
        page_size: PAGE,
        junk: true,
        ..PoolConfig::default()
    };
    let pool = unsafe { SlabPool::init(shm.addr(), shm.size(), &config).unwrap() };
    let free_pages = pool.stats().free_pages;

    let mut slots: [Option<(NonNull<u8>, usize)>; MAX_SLOTS] = [None; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] & 0x03;
        let size = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let slot = (data[i + 3] as usize) % MAX_SLOTS;
        i += 4;

        match opcode {
            0 | 2 => {
                if let Some((p, _)) = slots[slot].take() {
                    unsafe { pool.free(p).unwrap() };
                }
                let res = if opcode == 0 {
                    pool.alloc(size)
                } else {
                    pool.alloc_zeroed(size)
                };
                if let Ok(p) = res {
                    assert!(pool.contains(p.as_ptr()));
                    if opcode == 2 {
                        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), size) };
                        assert!(bytes.iter().all(|&b| b == 0));
                    }
                    unsafe { std::ptr::write_bytes(p.as_ptr(), slot as u8, size) };
                    slots[slot] = Some((p, size));
                } else {
                    assert!(res.unwrap_err().is_exhausted());
                }
            }
            1 => {
                if let Some((p, size)) = slots[slot].take() {
                    let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), size) };
                    assert!(bytes.iter().all(|&b| b == slot as u8), "block overwritten");
                    unsafe { pool.free(p).unwrap() };
                }
            }
            _ => {
                // Free something that is not a live block start: must be
                // rejected without touching the pool.
                let before = pool.stats();
                let target = pool.start().wrapping_add(size * 61 + 1);
                if let Some(p) = NonNull::new(target) {
                    if slots.iter().flatten().all(|&(q, _)| q != p) {
                        assert!(unsafe { pool.free(p) }.is_err());
                        assert_eq!(pool.stats(), before);
                    }
                }
            }
        }
    }

    for (p, _) in slots.iter().flatten() {
        unsafe { pool.free(*p).unwrap() };
    }
    let stats = pool.stats();
    assert_eq!(stats.free_pages, free_pages);
    assert_eq!(stats.used_chunks(), 0);
});
