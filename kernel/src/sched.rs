//! The scheduler loop: dispatch, idle, tick-driven timeout expiry, and the
//! `delay_tick` pending-scheduler primitive.
//!
//! Grounded on `NOS_runReadyTask`, `NOS_onIdle`, `NOS_delayTick`, and
//! `NOS_onSysTick` in `nonOS.c`.

use alloc::vec::Vec;

use crate::error::{OsError, OsResult};
use crate::event::TickOutcome;
use crate::kernel::{wake_waiting_task, Kernel};
use crate::task::{Priority, Tick};

/// Sentinel returned by [`Kernel::run_ready_task`] when nothing was ready
/// to run, mirroring `NOS_runReadyTask`'s `-1`.
pub const NO_READY_TASK: i32 = -1;

impl<const MAX_TASKS: usize> Kernel<MAX_TASKS> {
    /// Dispatch the highest-priority ready task, run it to completion of its
    /// current time slice (it returns when it suspends or finishes), then
    /// push it back into the waiting region. Returns its priority, or
    /// [`NO_READY_TASK`] if the ready heap was empty.
    pub fn run_ready_task(&self) -> OsResult<i32> {
        let task = {
            let mut inner = self.lock.lock()?;
            inner.read_lock = None;
            match inner.tasks.dispatch() {
                Some(t) => t,
                None => return Ok(NO_READY_TASK),
            }
        };
        let priority = task.priority;
        let mut cx = task.cx;
        let user = task.user;
        let entry = task.entry;
        {
            let mut inner = self.lock.lock()?;
            inner.current = Some(task);
        }
        // Run the task body outside the lock so it can itself call back
        // into wait_*/send_* (which take the lock internally), matching
        // the source's unlock-before-calling-`pTask`-then-relock shape.
        let _ = entry(self, &mut cx, user);
        let mut inner = self.lock.lock()?;
        inner.read_lock = None;
        if let Some(mut current) = inner.current.take() {
            current.cx = cx;
            inner.tasks.push_back(current)?;
        }
        Ok(priority as i32)
    }

    /// Recompute each task's CPU-usage ratio and invoke `on_idle_fn`.
    /// Grounded on `NOS_onIdle`/`nos_calTaskCpuUsageRatio`.
    pub fn on_idle(&self, on_idle_fn: Option<impl FnOnce()>) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        if inner.tick_count > 0 {
            for idx in 0..inner.tasks.n_total() {
                let task = inner.tasks.get_mut(idx).unwrap();
                task.cpu_usage_pct = (task.tick_count as u64 * 100 / inner.tick_count as u64) as u32;
            }
        }
        drop(inner);
        if let Some(f) = on_idle_fn {
            f();
        }
        Ok(())
    }

    /// Suspend the scheduler (not the tick ISR) for `n` ticks, calling
    /// `idle_fn` repeatedly while waiting. Forbidden from ISR context.
    ///
    /// Grounded on `NOS_delayTick`: wakes accumulated while the delay is
    /// pending are buffered in `deferred_wakes` and drained once the delay
    /// completes, in the order they arrived.
    pub fn begin_delay_tick(&self, n: Tick) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        if inner.int_nesting > 0 {
            log::debug!("begin_delay_tick: rejected from ISR context");
            return Err(OsError::InvalidOper);
        }
        inner.is_running = false;
        inner.is_pending_delay = true;
        inner.delay_ticks_remaining = n;
        log::trace!("begin_delay_tick: delaying for {n} ticks");
        Ok(())
    }

    /// True while a `begin_delay_tick` delay is still counting down.
    pub fn is_delay_pending(&self) -> OsResult<bool> {
        Ok(self.lock.lock()?.is_pending_delay)
    }

    /// True between `begin_delay_tick`/dispatch boundaries when no task body
    /// is currently executing — callers loop on this to know when to invoke
    /// their idle/low-power function while a delay is pending.
    pub fn is_running(&self) -> OsResult<bool> {
        Ok(self.lock.lock()?.is_running)
    }

    /// True once a pending `begin_delay_tick` delay's ticks have all been
    /// consumed by `on_sys_tick` calls — the platform loop calls
    /// `end_delay_tick` in response, mirroring the point at which the
    /// source's blocking `NOS_delayTick` would return.
    pub fn is_delay_complete(&self) -> OsResult<bool> {
        let inner = self.lock.lock()?;
        Ok(inner.is_pending_delay && inner.delay_ticks_remaining == 0)
    }

    /// End a delay begun with `begin_delay_tick` once its ticks have
    /// elapsed: drains `deferred_wakes` into real wakes and clears the
    /// pending-delay state.
    pub fn end_delay_tick(&self) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        inner.is_pending_delay = false;
        inner.is_running = true;
        let pending: Vec<Priority> = inner.deferred_wakes.drain(..).collect();
        for priority in pending {
            if let Some(idx) = inner.tasks.find_index(priority) {
                inner.tasks.wake_index(idx);
            }
        }
        Ok(())
    }

    /// Enter an ISR frame. Must be paired with [`Kernel::exit_int`].
    pub fn enter_int(&self) -> OsResult<()> {
        self.lock.lock()?.int_nesting += 1;
        Ok(())
    }

    /// Leave an ISR frame entered with [`Kernel::enter_int`].
    pub fn exit_int(&self) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        inner.int_nesting = inner.int_nesting.saturating_sub(1);
        Ok(())
    }

    /// The platform's tick-ISR callback: advances kernel and per-task tick
    /// counters, decrements any in-progress `delay_tick`, and advances every
    /// waiting task's tick-delay or event timeout, waking whichever reach
    /// zero. Grounded on `NOS_onSysTick`.
    pub fn on_sys_tick(&self) -> OsResult<()> {
        self.enter_int()?;
        let mut inner = self.lock.lock()?;

        inner.tick_count = inner.tick_count.wrapping_add(1);
        if let Some(current) = inner.current.as_mut() {
            current.tick_count = current.tick_count.wrapping_add(1);
        }
        if inner.is_pending_delay {
            inner.delay_ticks_remaining = inner.delay_ticks_remaining.saturating_sub(1);
        }

        let waiting: Vec<Priority> = inner
            .tasks
            .waiting_indices()
            .map(|i| inner.tasks.get(i).unwrap().priority)
            .collect();

        for priority in waiting {
            let Some(idx) = inner.tasks.find_index(priority) else {
                continue;
            };
            if idx < inner.tasks.n_ready() {
                // Already promoted earlier this tick.
                continue;
            }
            let ticks_to_wait = inner.tasks.get(idx).unwrap().ticks_to_wait;
            if ticks_to_wait > 0 {
                let remaining = ticks_to_wait - 1;
                inner.tasks.get_mut(idx).unwrap().ticks_to_wait = remaining;
                if remaining == 0 {
                    log::trace!("on_sys_tick: priority {priority} tick-delay expired");
                    wake_waiting_task(&mut inner, idx);
                }
            } else if let Some(event_id) = inner.tasks.get(idx).unwrap().waiting_event {
                let outcome = inner
                    .events
                    .get_mut(event_id)
                    .map(|e| e.tick_timeout(priority))
                    .unwrap_or(TickOutcome::NotWaiting);
                if outcome == TickOutcome::JustExpired {
                    log::trace!("on_sys_tick: priority {priority} event timeout expired");
                    wake_waiting_task(&mut inner, idx);
                }
            }
        }

        drop(inner);
        self.exit_int()
    }
}
