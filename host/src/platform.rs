//! A hosted [`Platform`] implementation: interrupts don't exist on a std
//! target, so the critical section is faked with a `spin::Mutex` guard
//! stashed in thread-local scratch, the same trick `r3_port_std` uses to
//! fake CPU Lock on a hosted OS thread with no real interrupt controller.

use std::cell::RefCell;
use std::time::Duration;

use nos_kernel::{Kernel, Platform};
use spin::Mutex as SpinMutex;

use crate::driver::TickDriver;

/// Whether a given `irq_save` call was the one that actually acquired the
/// section, vs. observing it already held by the same thread.
#[derive(Debug, Clone, Copy)]
pub struct IrqFlags {
    acquired: bool,
}

/// Faked critical section for hosted (std) targets.
///
/// `irq_save`/`irq_restore` are reentrant: a thread that is already inside
/// the section (e.g. a task body calling back into kernel code that itself
/// takes the section) observes it as already held and does not block or
/// double-release, mirroring a real `irq_save`/`irq_restore` pair around a
/// status register rather than a true mutex.
pub struct HostPlatform {
    held: SpinMutex<()>,
}

thread_local! {
    static DEPTH: RefCell<u32> = const { RefCell::new(0) };
}

impl HostPlatform {
    pub const fn new() -> Self {
        Self {
            held: SpinMutex::new(()),
        }
    }

    /// Start configuring a `HostPlatform` together with the tick-driver
    /// thread that will call `on_sys_tick` against it.
    pub fn builder() -> HostPlatformBuilder {
        HostPlatformBuilder::default()
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a leaked, process-lifetime [`HostPlatform`] plus the
/// [`TickDriver`] thread that drives it, at a configurable tick interval.
pub struct HostPlatformBuilder {
    interval: Duration,
}

impl Default for HostPlatformBuilder {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1),
        }
    }
}

impl HostPlatformBuilder {
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Leak a `HostPlatform` and spawn its tick-driver thread against
    /// `kernel`. `kernel` must outlive the returned driver — in practice,
    /// a `'static` instance such as [`crate::global`] or another leaked
    /// `Kernel`.
    pub fn build<const MAX_TASKS: usize>(
        self,
        kernel: &'static Kernel<MAX_TASKS>,
    ) -> (&'static HostPlatform, TickDriver) {
        let platform: &'static HostPlatform = Box::leak(Box::new(HostPlatform::new()));
        let driver = TickDriver::spawn(kernel, platform, self.interval);
        (platform, driver)
    }
}

impl Platform for HostPlatform {
    type Flags = IrqFlags;

    fn irq_save(&self) -> IrqFlags {
        let already_held = DEPTH.with(|d| *d.borrow() > 0);
        if !already_held {
            // Held only to serialize with the tick-driver thread; released
            // immediately below once we've recorded ownership in DEPTH.
            core::mem::forget(self.held.lock());
        }
        DEPTH.with(|d| *d.borrow_mut() += 1);
        IrqFlags {
            acquired: !already_held,
        }
    }

    fn irq_restore(&self, flags: IrqFlags) {
        DEPTH.with(|d| *d.borrow_mut() -= 1);
        if flags.acquired {
            // Safety: exactly one `forget`-ed guard corresponds to this
            // release, since `acquired` is only set by the call that did
            // the forget above and DEPTH tracks nesting per-thread.
            unsafe { self.held.force_unlock() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Any nesting depth of `irq_save`/`irq_restore` on one thread must
    /// leave the section fully released: only the outermost pair may report
    /// `acquired`, and a fresh `irq_save` afterwards must report it again.
    #[quickcheck_macros::quickcheck]
    fn nested_save_restore_balances(depth: u8) -> bool {
        let platform = HostPlatform::new();
        let depth = (depth % 8) as usize + 1;

        let mut flags = Vec::with_capacity(depth);
        for i in 0..depth {
            let f = platform.irq_save();
            if f.acquired != (i == 0) {
                return false;
            }
            flags.push(f);
        }
        for f in flags.into_iter().rev() {
            platform.irq_restore(f);
        }

        platform.irq_save().acquired
    }
}
