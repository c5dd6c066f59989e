//! A background `std::thread` that calls [`Kernel::on_sys_tick`] on a fixed
//! interval, and a foreground run loop over [`Kernel::run_ready_task`].
//!
//! Grounded on `r3_port_std`'s timer thread in `lib.rs::State::port_boot`
//! (a dedicated thread that pends a timer interrupt on a schedule), adapted
//! from its `mpsc`-deadline-driven design to a plain fixed-interval sleep
//! loop, since this kernel's tick driver has no variable-deadline timer
//! commands to honor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use nos_kernel::{Kernel, Platform};

use crate::platform::HostPlatform;

/// Owns the background thread that periodically calls `on_sys_tick`.
/// Dropping it stops the thread and joins it.
pub struct TickDriver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickDriver {
    /// Spawn a thread that calls `kernel.on_sys_tick()` every `interval`,
    /// bracketed by `platform.irq_save()`/`irq_restore()` the way a real
    /// tick ISR would run with interrupts masked.
    pub fn spawn<const MAX_TASKS: usize>(
        kernel: &'static Kernel<MAX_TASKS>,
        platform: &'static HostPlatform,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("nos-tick".into())
            .spawn(move || {
                log::trace!("tick driver started, interval={interval:?}");
                while !stop_clone.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    let flags = platform.irq_save();
                    if let Err(e) = kernel.on_sys_tick() {
                        log::debug!("on_sys_tick failed: {e}");
                    }
                    platform.irq_restore(flags);
                }
                log::trace!("tick driver stopped");
            })
            .expect("failed to spawn tick driver thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Run the scheduler loop until `run_ready_task` reports nothing is ready
/// and `on_idle_fn` chooses to stop (by returning `false`). Mirrors the
/// `run_ready_task → on_idle` loop described for the platform's main thread.
pub fn run_until<const MAX_TASKS: usize>(
    kernel: &Kernel<MAX_TASKS>,
    mut on_idle_fn: impl FnMut() -> bool,
) -> nos_kernel::OsResult<()> {
    loop {
        if kernel.run_ready_task()? == nos_kernel::sched::NO_READY_TASK {
            kernel.on_idle(Some(|| {}))?;
            if !on_idle_fn() {
                return Ok(());
            }
        }
    }
}

/// Drive a pending `begin_delay_tick` to completion, calling `idle_fn`
/// while ticks remain, then calling `end_delay_tick`. Intended to be called
/// from the same thread that called `begin_delay_tick`, with the
/// `TickDriver` advancing `delay_ticks_remaining` concurrently in the
/// background.
pub fn drive_delay_tick<const MAX_TASKS: usize>(
    kernel: &Kernel<MAX_TASKS>,
    n: nos_kernel::Tick,
    mut idle_fn: impl FnMut(),
) -> nos_kernel::OsResult<()> {
    kernel.begin_delay_tick(n)?;
    while !kernel.is_delay_complete()? {
        idle_fn();
        std::thread::yield_now();
    }
    kernel.end_delay_tick()
}
