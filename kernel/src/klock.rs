//! Critical-section discipline around a single [`crate::kernel::Kernel`]
//! instance.
//!
//! Grounded on `r3_kernel::klock`'s `CpuLockCell`/lock-guard shape, but
//! simplified from its `tokenlock`-based compile-time singleton-token scheme
//! to a plain `spin::Mutex`. `tokenlock` buys zero-cost reentrancy checking
//! across a *process-wide* `System<Traits>` type; this kernel is an
//! explicit, possibly-multiply-instantiated `Kernel<MAX_TASKS>` value, so
//! there is no singleton type for a token to attach to. A `spin::Mutex` with
//! a `try_lock`-based reentrancy check gives the same "exactly one holder,
//! reentry rejected" guarantee without it.

use spin::{Mutex, MutexGuard};

use crate::error::{OsError, OsResult};

/// Wraps the kernel's inner state behind a non-reentrant lock standing in
/// for "interrupts disabled".
pub struct KernelLock<T> {
    inner: Mutex<T>,
}

impl<T> KernelLock<T> {
    pub const fn new(value: T) -> Self {
        KernelLock {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock. Fails with [`OsError::InvalidOper`] if it is
    /// already held on this call stack, mirroring the source's single
    /// hardware interrupt-disable flag, which cannot itself be nested.
    pub fn lock(&self) -> OsResult<KernelLockGuard<'_, T>> {
        self.inner
            .try_lock()
            .map(KernelLockGuard)
            .ok_or(OsError::InvalidOper)
    }
}

/// RAII guard releasing the lock (the moral equivalent of re-enabling
/// interrupts) on drop.
pub struct KernelLockGuard<'a, T>(MutexGuard<'a, T>);

impl<'a, T> core::ops::Deref for KernelLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<'a, T> core::ops::DerefMut for KernelLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}
