use core::sync::atomic::{AtomicU32, Ordering};

use crate::platform;

/// Default number of backoff rounds before a waiter blocks.
pub const DEFAULT_SPIN: u32 = 2048;

/// A mutex that lives inside the shared region and serializes every process
/// that maps it.
///
/// The state word is a plain atomic, so the futex calls below deliberately
/// omit `FUTEX_PRIVATE_FLAG`: the kernel keys the wait queue on the physical
/// page and wakes waiters in other processes too.
#[repr(C)]
pub struct ShmMutex {
    /// 0 = unlocked, 1 = locked no waiters, 2 = locked with waiters
    state: AtomicU32,
}

impl ShmMutex {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    /// Acquire the lock, spinning with exponential backoff for up to `spin`
    /// rounds on multi-CPU machines before blocking.
    #[inline]
    pub fn lock(&self, spin: u32) {
        // Fast path: uncontended
        if self.try_lock() {
            return;
        }
        self.lock_slow(spin);
    }

    #[cold]
    fn lock_slow(&self, spin: u32) {
        if platform::num_cpus() > 1 {
            let mut n = 1;
            while n < spin {
                for _ in 0..n {
                    core::hint::spin_loop();
                }
                if self.state.load(Ordering::Relaxed) == 0 && self.try_lock() {
                    return;
                }
                n <<= 1;
            }
        }
        loop {
            let old = self.state.swap(2, Ordering::Acquire);
            if old == 0 {
                return;
            }
            self.wait(2);
        }
    }

    #[cfg(target_os = "linux")]
    fn wait(&self, expected: u32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                &self.state as *const AtomicU32,
                libc::FUTEX_WAIT,
                expected,
                core::ptr::null::<libc::timespec>(),
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn wait(&self, _expected: u32) {
        platform::yield_now();
    }

    #[inline]
    pub fn unlock(&self) {
        let old = self.state.fetch_sub(1, Ordering::Release);
        if old != 1 {
            // There were waiters
            self.state.store(0, Ordering::Release);
            self.wake_one();
        }
    }

    #[cold]
    fn wake_one(&self) {
        #[cfg(target_os = "linux")]
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                &self.state as *const AtomicU32,
                libc::FUTEX_WAKE,
                1i32,
            );
        }
    }

    /// Try to lock without blocking. Returns true if lock was acquired.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }

    /// Release the lock regardless of who holds it.
    ///
    /// # Safety
    /// The holder must be gone (e.g. a process that died inside a critical
    /// section) and the protected state must be known to be consistent.
    pub unsafe fn force_unlock(&self) {
        self.state.store(0, Ordering::Release);
        self.wake_one();
    }
}

impl Default for ShmMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases a `ShmMutex` on drop.
pub struct ShmMutexGuard<'a> {
    mutex: &'a ShmMutex,
}

impl<'a> ShmMutexGuard<'a> {
    pub fn lock(mutex: &'a ShmMutex, spin: u32) -> Self {
        mutex.lock(spin);
        ShmMutexGuard { mutex }
    }

    pub fn try_lock(mutex: &'a ShmMutex) -> Option<Self> {
        if mutex.try_lock() {
            Some(ShmMutexGuard { mutex })
        } else {
            None
        }
    }
}

impl Drop for ShmMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
