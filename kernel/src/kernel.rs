//! The kernel manager: task table, event table, heap, and the public API
//! surface described by the core's external interface.
//!
//! Grounded on `NOS_InnerMgr_t` and the top-level `NOS_*` entry points in
//! `nonOS.c`, exposed here as methods on an explicit `Kernel<MAX_TASKS>`
//! handle rather than the source's (and `r3_kernel`'s) process-wide
//! singleton — see `host::global()` for the convenience wrapper that
//! restores singleton-style use for embedded-style callers.

use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::error::{OsError, OsResult};
use crate::event::{EventId, EventKind, EventTable, MsgKind, TickOutcome};
use crate::heap::Heap;
use crate::klock::KernelLock;
use crate::task::{Priority, TaskCb, TaskCx, TaskEntry, TaskTable, Tick};

pub(crate) struct Inner<const MAX_TASKS: usize> {
    pub(crate) tasks: TaskTable<MAX_TASKS>,
    pub(crate) events: EventTable,
    pub(crate) heap: Heap,
    pub(crate) current: Option<TaskCb<MAX_TASKS>>,
    pub(crate) tick_count: Tick,
    pub(crate) int_nesting: u32,
    pub(crate) is_running: bool,
    pub(crate) is_pending_delay: bool,
    pub(crate) delay_ticks_remaining: Tick,
    pub(crate) deferred_wakes: Vec<Priority>,
    /// Transient "already attempted this event this dispatch" guard. Scoped
    /// to a single dispatch (cleared by `run_ready_task` before and after
    /// invoking the task body), unlike the source's function-local `static`
    /// which, being shared process-wide, could in principle leak a stale
    /// lock across unrelated tasks and events — see DESIGN.md.
    pub(crate) read_lock: Option<EventId>,
}

/// The kernel handle. `MAX_TASKS` bounds the task table's capacity at
/// compile time, matching `NOS_MAX_TASKNUM`; the default of 10 matches the
/// source's own default configuration.
pub struct Kernel<const MAX_TASKS: usize = 10> {
    lock: KernelLock<Inner<MAX_TASKS>>,
}

impl<const MAX_TASKS: usize> Kernel<MAX_TASKS> {
    /// Build a kernel with an already-initialized heap (e.g. from
    /// [`Heap::new_in_place`] on a `#![no_std]` target).
    pub fn new(heap: Heap) -> Self {
        Kernel {
            lock: KernelLock::new(Inner {
                tasks: TaskTable::new(),
                events: EventTable::new(),
                heap,
                current: None,
                tick_count: 0,
                int_nesting: 0,
                is_running: false,
                is_pending_delay: false,
                delay_ticks_remaining: 0,
                deferred_wakes: Vec::new(),
                read_lock: None,
            }),
        }
    }

    /// Build a kernel that owns a heap of `heap_size` bytes, word-aligned.
    pub fn with_owned_heap(heap_size: usize) -> Option<Self> {
        let heap = Heap::new_owned(heap_size, core::mem::align_of::<usize>())?;
        Some(Self::new(heap))
    }

    /// Create a task. Forbidden from ISR context; rejects an out-of-range
    /// or already-live priority without touching the table.
    ///
    /// Grounded on `NOS_createTask`: unlike the source, a full table or a
    /// duplicate priority is rejected before any field of the manager is
    /// mutated, so a failed call is always a complete no-op.
    pub fn create_task(
        &self,
        entry: TaskEntry<MAX_TASKS>,
        user: usize,
        priority: Priority,
    ) -> OsResult<()> {
        if (priority as usize) >= MAX_TASKS {
            log::debug!("create_task: priority {priority} out of range");
            return Err(OsError::WrongPrio);
        }
        let mut inner = self.lock.lock()?;
        if inner.int_nesting > 0 {
            log::debug!("create_task: rejected from ISR context");
            return Err(OsError::InvalidOper);
        }
        if inner.tasks.find_index(priority).is_some() {
            log::debug!("create_task: priority {priority} already in use");
            return Err(OsError::WrongPrio);
        }
        let result = inner.tasks.insert(priority, entry, user);
        if result.is_ok() {
            log::trace!("create_task: priority {priority} created");
        }
        result
    }

    /// Delete a task by priority. Forbidden from ISR context, on the
    /// currently running task, or on a priority with no live task.
    pub fn delete_task(&self, priority: Priority) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        if inner.int_nesting > 0 {
            log::debug!("delete_task: rejected from ISR context");
            return Err(OsError::InvalidOper);
        }
        if let Some(current) = &inner.current {
            if current.priority == priority {
                log::debug!("delete_task: priority {priority} is the running task");
                return Err(OsError::InvalidOper);
            }
        }
        match inner.tasks.remove(priority) {
            Some(_) => {
                log::trace!("delete_task: priority {priority} deleted");
                Ok(())
            }
            None => {
                log::debug!("delete_task: priority {priority} not in list");
                Err(OsError::NotInList)
            }
        }
    }

    /// Create a semaphore or message box, storing its handle into `cell`.
    pub fn create_event(
        &self,
        kind: EventKind,
        init_arg: u8,
        cell: &mut Option<EventId>,
    ) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        if inner.int_nesting > 0 {
            log::debug!("create_event: rejected from ISR context");
            return Err(OsError::InvalidOper);
        }
        let id = match kind {
            EventKind::Semaphore => inner.events.create_semaphore(init_arg),
            EventKind::MessageBox => inner.events.create_message_box(),
        };
        log::trace!("create_event: created {kind:?}");
        *cell = Some(id);
        Ok(())
    }

    /// Destroy an event, waking every waiter and clearing `cell`.
    ///
    /// Grounded on `NOS_deleteEvt`: every waiter in the waiting region
    /// referencing this event is found and woken (the loop is structured so
    /// each iteration re-scans for a fresh match rather than caching stale
    /// indices, since waking reshuffles the table), then any still-pending
    /// messages are freed unconditionally and the event itself is dropped
    /// from the slab.
    pub fn delete_event(&self, cell: &mut Option<EventId>) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        if inner.int_nesting > 0 {
            log::debug!("delete_event: rejected from ISR context");
            return Err(OsError::InvalidOper);
        }
        let id = cell.take().ok_or(OsError::NullEvt)?;
        loop {
            let idx = inner
                .tasks
                .waiting_indices()
                .find(|&i| inner.tasks.get(i).unwrap().waiting_event == Some(id));
            let Some(idx) = idx else { break };
            wake_waiting_task(&mut inner, idx);
        }
        if let Some(event) = inner.events.get_mut(id) {
            event.drain_and_free_pending(&mut inner.heap);
        }
        inner.events.remove(id);
        log::trace!("delete_event: destroyed, waiters woken");
        Ok(())
    }

    /// Suspend the current task for exactly `n` ticks, independent of any
    /// event. `n == 0` returns immediately.
    pub fn wait_tick(&self, cx: &TaskCx, n: Tick) -> OsResult<()> {
        if n == 0 {
            return Ok(());
        }
        let mut inner = self.lock.lock()?;
        let mut task = inner.current.take().ok_or(OsError::NullTcb)?;
        task.ticks_to_wait = n;
        task.cx = *cx;
        let result = inner.tasks.push_back(task);
        if result.is_err() {
            // Table was already at capacity with the current task removed —
            // cannot happen in practice (the task just vacated its own
            // slot), but propagate rather than silently drop the task.
            return result;
        }
        log::trace!("wait_tick: suspended for {n} ticks");
        Err(OsError::Pended)
    }

    /// Wait on a semaphore. Returns `Ok(())` whether the wait succeeded or
    /// timed out (the source does not distinguish the two outcomes either —
    /// see `nos_waitEvt`'s `NOS_EVT_Sem` arm); `Err(Pended)` if the caller
    /// must suspend and retry on its next dispatch.
    pub fn wait_semaphore(&self, cx: &TaskCx, id: EventId, timeout: Tick) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        let priority = current_priority(&inner)?;
        if inner.events.get(id).is_none() {
            return Err(OsError::NullEvt);
        }

        if inner.events.get_mut(id).unwrap().take_expired(priority) {
            return Ok(());
        }
        if timeout > 0 {
            inner.events.get_mut(id).unwrap().renew_timeout(priority, timeout);
        }

        let already_locked = inner.read_lock == Some(id);
        let consumed = if already_locked {
            false
        } else {
            let got = inner.events.get_mut(id).unwrap().try_consume_semaphore();
            inner.read_lock = Some(id);
            got
        };

        if consumed {
            inner.current.as_mut().unwrap().waiting_event = None;
            return Ok(());
        }
        if timeout == 0 {
            return Err(OsError::NullEvt);
        }
        suspend_current_on(&mut inner, cx, id)?;
        log::trace!("wait_semaphore: suspended");
        Err(OsError::Pended)
    }

    /// Wait on a message box. `Ok(Some(..))` carries a freshly allocated
    /// copy of the received payload and its length; `Ok(None)` means the
    /// wait timed out without a message ever arriving.
    pub fn wait_message_box(
        &self,
        cx: &TaskCx,
        id: EventId,
        timeout: Tick,
    ) -> OsResult<Option<(NonNull<u8>, usize)>> {
        let mut inner = self.lock.lock()?;
        let priority = current_priority(&inner)?;
        if inner.events.get(id).is_none() {
            return Err(OsError::NullEvt);
        }

        if inner.events.get_mut(id).unwrap().take_expired(priority) {
            return Ok(None);
        }
        if timeout > 0 {
            inner.events.get_mut(id).unwrap().renew_timeout(priority, timeout);
        }

        let already_locked = inner.read_lock == Some(id);
        let consumed = if already_locked {
            None
        } else {
            inner.read_lock = Some(id);
            let Inner { events, heap, .. } = &mut *inner;
            events.get_mut(id).unwrap().try_consume_message(heap)?
        };

        if let Some(data) = consumed {
            inner.current.as_mut().unwrap().waiting_event = None;
            return Ok(Some(data));
        }
        if timeout == 0 {
            return Err(OsError::NullEvt);
        }
        suspend_current_on(&mut inner, cx, id)?;
        log::trace!("wait_message_box: suspended");
        Err(OsError::Pended)
    }

    /// Signal a semaphore: wakes one waiter if any, then saturating-
    /// increments `free_count` regardless.
    pub fn send_semaphore(&self, id: EventId) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        if inner.events.get(id).is_none() {
            return Err(OsError::NullEvt);
        }
        if let Some(idx) = inner
            .tasks
            .waiting_indices()
            .find(|&i| inner.tasks.get(i).unwrap().waiting_event == Some(id))
        {
            wake_waiting_task(&mut inner, idx);
        }
        inner.events.get_mut(id).unwrap().send_semaphore();
        Ok(())
    }

    /// Send a message box payload: wakes every current waiter and, if any
    /// existed, enqueues one message record all of them will receive.
    ///
    /// Grounded on `nos_sendEvt`'s `NOS_EVT_MsgBox` arm: a payload sent with
    /// no waiters is dropped rather than queued.
    pub fn send_message_box(
        &self,
        id: EventId,
        kind: MsgKind,
        payload: NonNull<u8>,
        length: usize,
    ) -> OsResult<()> {
        let mut inner = self.lock.lock()?;
        if inner.events.get(id).is_none() {
            return Err(OsError::NullEvt);
        }
        let mut waiters: u8 = 0;
        loop {
            let idx = inner
                .tasks
                .waiting_indices()
                .find(|&i| inner.tasks.get(i).unwrap().waiting_event == Some(id));
            let Some(idx) = idx else { break };
            wake_waiting_task(&mut inner, idx);
            waiters = waiters.saturating_add(1);
        }
        if waiters > 0 {
            inner
                .events
                .get_mut(id)
                .unwrap()
                .send_message(kind, payload, length, waiters);
        }
        Ok(())
    }

    /// Allocate `n` bytes from the kernel's shared heap, for building a
    /// message box payload.
    pub fn alloc(&self, n: usize) -> OsResult<NonNull<u8>> {
        self.lock.lock()?.heap.malloc(n).ok_or(OsError::NullMemory)
    }

    /// Free a block previously returned by [`Kernel::alloc`] or received
    /// from [`Kernel::wait_message_box`].
    pub fn free(&self, p: NonNull<u8>) -> OsResult<()> {
        self.lock.lock()?.heap.free(p);
        Ok(())
    }
}

fn current_priority<const MAX_TASKS: usize>(inner: &Inner<MAX_TASKS>) -> OsResult<Priority> {
    inner.current.as_ref().map(|t| t.priority).ok_or(OsError::NullTcb)
}

/// Push the current task into the waiting region, recording the event it
/// is now blocked on. `cx` is the task body's live, already-mutated context
/// (its `resume_point`/`locals` set for the next dispatch); it must be
/// synced into the TCB here, before the TCB leaves `inner.current`, or the
/// body's next entry would restart at its stale pre-dispatch state.
fn suspend_current_on<const MAX_TASKS: usize>(
    inner: &mut Inner<MAX_TASKS>,
    cx: &TaskCx,
    id: EventId,
) -> OsResult<()> {
    let mut task = inner.current.take().ok_or(OsError::NullTcb)?;
    task.cx = *cx;
    task.waiting_event = Some(id);
    inner.tasks.push_back(task)
}

/// Promote a waiting task into the ready heap (or the deferred-wake list, if
/// a `delay_tick` is in progress), clearing `waiting_event` first.
///
/// The clear happens unconditionally and *before* the task leaves the
/// waiting region: invariant 4 ("a task's `waiting_event` is non-empty iff
/// the TCB is in the waiting region") requires it, even though the source's
/// `nos_sendEvt`/`nos_runWakeupTask` leave `pEvtWait` set until the task's
/// own next `nos_waitEvt` call happens to clear it.
pub(crate) fn wake_waiting_task<const MAX_TASKS: usize>(inner: &mut Inner<MAX_TASKS>, idx: usize) {
    inner.tasks.get_mut(idx).unwrap().waiting_event = None;
    if inner.is_pending_delay {
        let priority = inner.tasks.get(idx).unwrap().priority;
        if !inner.deferred_wakes.contains(&priority) {
            inner.deferred_wakes.push(priority);
        }
    } else {
        inner.tasks.wake_index(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_k: &Kernel<4>, _cx: &mut crate::task::TaskCx, _user: usize) -> OsResult<()> {
        Ok(())
    }

    #[test]
    fn create_task_rejects_out_of_range_priority() {
        let k: Kernel<4> = Kernel::with_owned_heap(1024).unwrap();
        assert_eq!(k.create_task(noop, 0, 4).unwrap_err(), OsError::WrongPrio);
    }

    #[test]
    fn create_task_rejects_duplicate_priority() {
        let k: Kernel<4> = Kernel::with_owned_heap(1024).unwrap();
        k.create_task(noop, 0, 1).unwrap();
        assert_eq!(k.create_task(noop, 0, 1).unwrap_err(), OsError::WrongPrio);
    }

    #[test]
    fn delete_task_rejects_unknown_priority() {
        let k: Kernel<4> = Kernel::with_owned_heap(1024).unwrap();
        assert_eq!(k.delete_task(2).unwrap_err(), OsError::NotInList);
    }

    #[test]
    fn semaphore_round_trip_without_contention() {
        let k: Kernel<4> = Kernel::with_owned_heap(1024).unwrap();
        let mut cell = None;
        k.create_event(EventKind::Semaphore, 1, &mut cell).unwrap();
        let id = cell.unwrap();
        k.send_semaphore(id).unwrap();
        // Two permits now (initial 1 + the send); draining via internal
        // plumbing isn't exposed without a current task, so just check the
        // event exists and accepts further sends.
        k.send_semaphore(id).unwrap();
        let mut cell2 = Some(id);
        k.delete_event(&mut cell2).unwrap();
        assert!(cell2.is_none());
    }
}
