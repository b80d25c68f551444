/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Check if `value` is aligned to `align`.
#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Smallest `shift` such that `1 << shift >= value`. `value` must be non-zero.
#[inline(always)]
pub const fn ceil_log2(value: usize) -> u32 {
    if value <= 1 {
        return 0;
    }
    usize::BITS - (value - 1).leading_zeros()
}

/// Bit width of the status word stored in every page descriptor.
pub const WORD_BITS: u32 = usize::BITS;

/// Byte written over freed memory when junk filling is enabled.
pub const JUNK_BYTE: u8 = 0xA5;

/// Fill a memory region with junk bytes.
///
/// # Safety
/// `ptr` must point to a valid writable region of at least `size` bytes.
#[inline]
pub unsafe fn junk_region(ptr: *mut u8, size: usize) {
    core::ptr::write_bytes(ptr, JUNK_BYTE, size);
}
