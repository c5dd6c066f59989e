//! Events: counting semaphores and message boxes, plus the per-event
//! timeout list used by waiters with a finite timeout.
//!
//! Grounded on `NOS_Evt_t`/`NOS_Evt_Sem_t`/`NOS_Evt_MsgBox_t`/`NOS_Evt_Timeout_t`
//! in `nonOS.c`, re-expressed as a `slab::Slab<Event>`-backed table instead of
//! the source's hand-rolled intrusive linked lists — the same substitution
//! `r3_kernel`'s `iterpool`-free, index-based collections make relative to a
//! C kernel's pointer-chased ones.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::ptr::NonNull;

use slab::Slab;

use crate::error::{OsError, OsResult};
use crate::heap::Heap;
use crate::task::{Priority, Tick};

/// A stable handle to a created event; the slab index underneath never
/// changes for the lifetime of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId(usize);

/// Which flavor of event `Kernel::create_event` should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Semaphore,
    MessageBox,
}

/// How a message box's payload should be released once every waiter that was
/// live when it was sent has received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    /// Sender retains ownership; the kernel never frees the payload.
    NoFree,
    /// The sender is expected to free the payload itself after sending.
    SendFree,
    /// The last receiver frees the payload on receipt.
    RecvFree,
}

struct PendingMessage {
    kind: MsgKind,
    payload: NonNull<u8>,
    length: usize,
    remaining_waiters: u8,
}

enum EventObject {
    Semaphore { free_count: u8 },
    MessageBox { pending: VecDeque<PendingMessage> },
}

struct TimeoutElem {
    task_priority: Priority,
    ticks_remaining: Tick,
    expired: bool,
}

/// The outcome of decrementing one task's timeout element by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// This task has no timeout element on this event.
    NotWaiting,
    /// Still counting down.
    StillWaiting,
    /// Reached zero this tick; the task should be woken.
    JustExpired,
}

pub struct Event {
    object: EventObject,
    timeout_list: Vec<TimeoutElem>,
}

impl Event {
    fn semaphore(init: u8) -> Self {
        Event {
            object: EventObject::Semaphore { free_count: init },
            timeout_list: Vec::new(),
        }
    }

    fn message_box() -> Self {
        Event {
            object: EventObject::MessageBox {
                pending: VecDeque::new(),
            },
            timeout_list: Vec::new(),
        }
    }

    /// Grounded on the `NOS_EVT_Sem` arm of `nos_waitEvt`: decrement and
    /// succeed only while `free_count > 0`.
    pub fn try_consume_semaphore(&mut self) -> bool {
        match &mut self.object {
            EventObject::Semaphore { free_count } if *free_count > 0 => {
                *free_count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Grounded on `nos_sendEvt`'s `NOS_EVT_Sem` arm: saturating increment,
    /// independent of whether a waiter was actually found.
    pub fn send_semaphore(&mut self) {
        if let EventObject::Semaphore { free_count } = &mut self.object {
            *free_count = free_count.saturating_add(1);
        }
    }

    /// Grounded on the `NOS_EVT_MsgBox` arm of `nos_waitEvt`: copy the head
    /// message into a fresh heap allocation, decrement its waiter count, and
    /// free the original payload once the last waiter has received it and
    /// the message was sent as `RecvFree`.
    ///
    /// Returns `Ok(None)` if no message is pending (not an error — the
    /// caller decides whether that means "pend" or "timed out without
    /// receiving").
    pub fn try_consume_message(&mut self, heap: &mut Heap) -> OsResult<Option<(NonNull<u8>, usize)>> {
        let pending = match &mut self.object {
            EventObject::MessageBox { pending } => pending,
            EventObject::Semaphore { .. } => return Ok(None),
        };
        let Some(front) = pending.front_mut() else {
            return Ok(None);
        };
        let length = front.length;
        let copy = heap.malloc(length).ok_or(OsError::NullMemory)?;
        unsafe {
            core::ptr::copy_nonoverlapping(front.payload.as_ptr(), copy.as_ptr(), length);
        }
        front.remaining_waiters = front.remaining_waiters.saturating_sub(1);
        if front.remaining_waiters == 0 {
            let msg = pending.pop_front().expect("front just matched");
            if msg.kind == MsgKind::RecvFree {
                heap.free(msg.payload);
            }
        }
        Ok(Some((copy, length)))
    }

    /// Enqueue a message that `waiters` current tasks are entitled to
    /// receive. Grounded on `nos_sendEvt`'s `NOS_EVT_MsgBox` arm: a message
    /// with zero waiters is dropped rather than queued, matching "semaphore
    /// style fan-out only when waiters exist".
    pub fn send_message(&mut self, kind: MsgKind, payload: NonNull<u8>, length: usize, waiters: u8) {
        if waiters == 0 {
            return;
        }
        if let EventObject::MessageBox { pending } = &mut self.object {
            pending.push_back(PendingMessage {
                kind,
                payload,
                length,
                remaining_waiters: waiters,
            });
        }
    }

    /// Grounded on `nos_isEvtReachTimeout`: find and remove this task's
    /// timeout element if it has already fired.
    pub fn take_expired(&mut self, priority: Priority) -> bool {
        if let Some(pos) = self
            .timeout_list
            .iter()
            .position(|e| e.task_priority == priority && e.expired)
        {
            self.timeout_list.remove(pos);
            true
        } else {
            false
        }
    }

    /// Grounded on `nos_renewEvtTimeoutList`: overwrite an existing element
    /// for this priority, or prepend a new one.
    pub fn renew_timeout(&mut self, priority: Priority, ticks: Tick) {
        if let Some(elem) = self
            .timeout_list
            .iter_mut()
            .find(|e| e.task_priority == priority)
        {
            elem.ticks_remaining = ticks;
            elem.expired = false;
        } else {
            self.timeout_list.push(TimeoutElem {
                task_priority: priority,
                ticks_remaining: ticks,
                expired: false,
            });
        }
    }

    /// Free every pending message unconditionally, ignoring each message's
    /// `kind`. Used only by `delete_event`: the box itself is being torn
    /// down, so there is no later receiver left to apply the normal
    /// `RecvFree`-on-last-receipt policy to.
    pub fn drain_and_free_pending(&mut self, heap: &mut Heap) {
        if let EventObject::MessageBox { pending } = &mut self.object {
            while let Some(msg) = pending.pop_front() {
                heap.free(msg.payload);
            }
        }
    }

    /// Called once per tick from `on_sys_tick` for a task known to be
    /// waiting on this event with no plain tick-delay of its own.
    pub fn tick_timeout(&mut self, priority: Priority) -> TickOutcome {
        let Some(elem) = self
            .timeout_list
            .iter_mut()
            .find(|e| e.task_priority == priority)
        else {
            return TickOutcome::NotWaiting;
        };
        if elem.ticks_remaining == 0 {
            return TickOutcome::StillWaiting;
        }
        elem.ticks_remaining -= 1;
        if elem.ticks_remaining == 0 {
            elem.expired = true;
            TickOutcome::JustExpired
        } else {
            TickOutcome::StillWaiting
        }
    }
}

/// The slab-backed table of live events.
pub struct EventTable {
    slab: Slab<Event>,
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTable {
    pub fn new() -> Self {
        EventTable { slab: Slab::new() }
    }

    pub fn create_semaphore(&mut self, init: u8) -> EventId {
        EventId(self.slab.insert(Event::semaphore(init)))
    }

    pub fn create_message_box(&mut self) -> EventId {
        EventId(self.slab.insert(Event::message_box()))
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.slab.get(id.0)
    }

    pub fn get_mut(&mut self, id: EventId) -> Option<&mut Event> {
        self.slab.get_mut(id.0)
    }

    pub fn remove(&mut self, id: EventId) -> Option<Event> {
        self.slab.try_remove(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new_owned(4096, 8).unwrap()
    }

    #[test]
    fn semaphore_consume_requires_free_count() {
        let mut table = EventTable::new();
        let id = table.create_semaphore(0);
        let evt = table.get_mut(id).unwrap();
        assert!(!evt.try_consume_semaphore());
        evt.send_semaphore();
        assert!(evt.try_consume_semaphore());
        assert!(!evt.try_consume_semaphore());
    }

    #[test]
    fn semaphore_saturates_at_255() {
        let mut table = EventTable::new();
        let id = table.create_semaphore(254);
        let evt = table.get_mut(id).unwrap();
        evt.send_semaphore();
        evt.send_semaphore();
        evt.send_semaphore();
        // Drain it and confirm it never went past 255.
        let mut count = 0;
        while evt.try_consume_semaphore() {
            count += 1;
        }
        assert_eq!(count, 255);
    }

    #[test]
    fn message_box_drops_send_with_no_waiters() {
        let mut h = heap();
        let mut table = EventTable::new();
        let id = table.create_message_box();
        let payload = h.malloc(4).unwrap();
        let evt = table.get_mut(id).unwrap();
        evt.send_message(MsgKind::NoFree, payload, 4, 0);
        assert!(evt.try_consume_message(&mut h).unwrap().is_none());
        h.free(payload);
    }

    #[test]
    fn message_box_fan_out_frees_recv_free_payload_once() {
        let mut h = heap();
        let mut table = EventTable::new();
        let id = table.create_message_box();
        let original = h.malloc(3).unwrap();
        unsafe {
            original.as_ptr().write_bytes(0xAB, 3);
        }
        let evt = table.get_mut(id).unwrap();
        evt.send_message(MsgKind::RecvFree, original, 3, 2);

        let (first, len1) = evt.try_consume_message(&mut h).unwrap().unwrap();
        assert_eq!(len1, 3);
        let (second, len2) = evt.try_consume_message(&mut h).unwrap().unwrap();
        assert_eq!(len2, 3);
        unsafe {
            assert_eq!(core::slice::from_raw_parts(first.as_ptr(), 3), &[0xAB, 0xAB, 0xAB]);
            assert_eq!(core::slice::from_raw_parts(second.as_ptr(), 3), &[0xAB, 0xAB, 0xAB]);
        }
        assert!(evt.try_consume_message(&mut h).unwrap().is_none());
        h.free(first);
        h.free(second);
        // The original RecvFree payload was freed internally after the
        // second (last) receiver; free_size should reflect only the two
        // copies having been handed out and freed above, not three blocks.
    }

    #[test]
    fn timeout_renew_then_expire() {
        let mut table = EventTable::new();
        let id = table.create_semaphore(0);
        let evt = table.get_mut(id).unwrap();
        evt.renew_timeout(2, 3);
        assert_eq!(evt.tick_timeout(2), TickOutcome::StillWaiting);
        assert_eq!(evt.tick_timeout(2), TickOutcome::StillWaiting);
        assert_eq!(evt.tick_timeout(2), TickOutcome::JustExpired);
        assert!(evt.take_expired(2));
        assert!(!evt.take_expired(2));
    }

    #[test]
    fn renew_overwrites_existing_element_for_same_priority() {
        let mut table = EventTable::new();
        let id = table.create_semaphore(0);
        let evt = table.get_mut(id).unwrap();
        evt.renew_timeout(1, 5);
        evt.renew_timeout(1, 2);
        assert_eq!(evt.tick_timeout(1), TickOutcome::StillWaiting);
        assert_eq!(evt.tick_timeout(1), TickOutcome::JustExpired);
    }
}
