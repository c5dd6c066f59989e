//! Task control blocks and the priority-ordered task table.
//!
//! The table stores every live task in one `ArrayVec`, partitioned in place
//! into a ready region `[0, n_ready)` — a binary min-heap keyed on
//! [`Priority`] — and a waiting region `[n_ready, n_total)` in unspecified
//! order. This mirrors `arrTaskTcb`/`nTaskRdy`/`nTaskAll` in the original
//! kernel exactly, rather than r3_kernel's priority-bitmap ready queue: the
//! heap-in-array shape is part of the contract here, not an implementation
//! detail a bitmap could replace.

use arrayvec::ArrayVec;

use crate::error::{OsError, OsResult};
use crate::event::EventId;

/// Task priority: lower numeric value runs first. Unique across live tasks.
pub type Priority = u8;

/// Kernel tick count.
pub type Tick = u32;

/// A cooperative resume token. `ResumePoint::START` means "never suspended";
/// any other value identifies the wait site a task should jump back into on
/// its next dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumePoint(pub u32);

impl ResumePoint {
    pub const START: ResumePoint = ResumePoint(0);
}

/// The mutable context handed to a task's entry function on every dispatch.
///
/// In the original kernel a suspended task is resumed by restoring a raw
/// byte-wise snapshot of the hardware stack. Here a task body is instead a
/// plain function that inspects [`TaskCx::resume_point`] the way the source
/// switches on `nCodeLine`, and keeps whatever local state it needs to
/// survive a suspension in `locals` — a small fixed word buffer owned
/// in-line by the `TaskCb`, so there is never a separate allocation to make
/// or free across a yield.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskCx {
    resume_point: ResumePoint,
    locals: [usize; 4],
}

impl TaskCx {
    pub fn resume_point(&self) -> ResumePoint {
        self.resume_point
    }

    pub fn set_resume_point(&mut self, rp: ResumePoint) {
        self.resume_point = rp;
    }

    /// Scratch words a task body can use to carry state across suspensions.
    pub fn locals(&mut self) -> &mut [usize; 4] {
        &mut self.locals
    }
}

/// A task's entry function. `user` is an opaque word threaded straight from
/// `create_task`, matching the source's `void *pUser`.
pub type TaskEntry<const MAX_TASKS: usize> =
    fn(kernel: &crate::kernel::Kernel<MAX_TASKS>, cx: &mut TaskCx, user: usize) -> OsResult<()>;

/// Task control block — one per task, stored in-line in the task table.
pub struct TaskCb<const MAX_TASKS: usize> {
    pub priority: Priority,
    pub entry: TaskEntry<MAX_TASKS>,
    pub user: usize,
    pub tick_count: Tick,
    pub ticks_to_wait: Tick,
    pub cx: TaskCx,
    pub waiting_event: Option<EventId>,
    /// `100 * tick_count / kernel.tick_count`, refreshed by `Kernel::on_idle`.
    pub cpu_usage_pct: u32,
}

impl<const MAX_TASKS: usize> TaskCb<MAX_TASKS> {
    fn new(priority: Priority, entry: TaskEntry<MAX_TASKS>, user: usize) -> Self {
        TaskCb {
            priority,
            entry,
            user,
            tick_count: 0,
            ticks_to_wait: 0,
            cx: TaskCx::default(),
            waiting_event: None,
            cpu_usage_pct: 0,
        }
    }
}

/// Alias kept for the term the spec uses for a task-table element.
pub type TaskSlot<const MAX_TASKS: usize> = TaskCb<MAX_TASKS>;

/// The priority-ordered task table: ready-heap region plus waiting region,
/// both packed into one fixed-capacity array.
pub struct TaskTable<const MAX_TASKS: usize> {
    slots: ArrayVec<TaskSlot<MAX_TASKS>, MAX_TASKS>,
    n_ready: usize,
}

impl<const MAX_TASKS: usize> Default for TaskTable<MAX_TASKS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const MAX_TASKS: usize> TaskTable<MAX_TASKS> {
    pub const fn new() -> Self {
        TaskTable {
            slots: ArrayVec::new_const(),
            n_ready: 0,
        }
    }

    pub fn n_total(&self) -> usize {
        self.slots.len()
    }

    pub fn n_ready(&self) -> usize {
        self.n_ready
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == MAX_TASKS
    }

    /// Linear search by priority over the whole table.
    ///
    /// Grounded on `nos_isElementInTaskArray`: a plain reverse scan, since
    /// the table is small and neither region is sorted by priority value
    /// (only the ready region's *heap* order, not a total order).
    pub fn find_index(&self, priority: Priority) -> Option<usize> {
        self.slots.iter().position(|t| t.priority == priority)
    }

    pub fn get(&self, index: usize) -> Option<&TaskCb<MAX_TASKS>> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TaskCb<MAX_TASKS>> {
        self.slots.get_mut(index)
    }

    pub fn ready_slice(&self) -> &[TaskCb<MAX_TASKS>] {
        &self.slots[..self.n_ready]
    }

    pub fn waiting_indices(&self) -> core::ops::Range<usize> {
        self.n_ready..self.slots.len()
    }

    /// Insert a new task, already validated for priority range and
    /// uniqueness by the caller (`Kernel::create_task`).
    ///
    /// Grounded on `NOS_createTask`: if the waiting region is non-empty, the
    /// slot at `n_ready` is moved to the new tail first so the freshly
    /// created task can be inserted at `n_ready` and sifted up, keeping the
    /// waiting region's existing occupants undisturbed. Unlike the source,
    /// `n_ready`/`n_total` are only touched once the push below has already
    /// succeeded, so a full table leaves the existing state untouched.
    pub fn insert(&mut self, priority: Priority, entry: TaskEntry<MAX_TASKS>, user: usize) -> OsResult<()> {
        if self.slots.len() >= MAX_TASKS {
            return Err(OsError::FullTaskList);
        }
        let task = TaskCb::new(priority, entry, user);
        if self.n_ready < self.slots.len() {
            let displaced = self.slots[self.n_ready].clone_handle();
            self.slots.push(displaced);
            self.slots[self.n_ready] = task;
        } else {
            self.slots.push(task);
        }
        let inserted_at = self.n_ready;
        self.n_ready += 1;
        sift_up(&mut self.slots, inserted_at);
        Ok(())
    }

    /// Remove the task with the given priority, wherever it sits.
    ///
    /// Grounded on `NOS_deleteTask`'s index-compaction, replacing its
    /// `memmove`-by-possibly-wrong-unit with `ArrayVec::remove`, which moves
    /// exactly `n_total - index - 1` elements by construction.
    pub fn remove(&mut self, priority: Priority) -> Option<TaskCb<MAX_TASKS>> {
        let index = self.find_index(priority)?;
        if index < self.n_ready {
            self.n_ready -= 1;
            self.slots.swap(index, self.n_ready);
            // The element swapped into `index` may need to go either way:
            // it could be smaller than its new parent (sift up) just as
            // easily as larger than a child (sift down). A plain sift-down,
            // as a textbook single-direction removal would use, is not
            // enough here. Grounded on `r3_kernel::utils::binary_heap`'s own
            // `heap_remove`, which makes the same two-way check.
            if index < self.n_ready {
                let parent = index.checked_sub(1).map(|p| p / 2);
                let should_sift_up = matches!(parent, Some(p) if self.slots[index].priority < self.slots[p].priority);
                if should_sift_up {
                    sift_up(&mut self.slots, index);
                } else {
                    sift_down(&mut self.slots, index, self.n_ready);
                }
            }
        }
        Some(self.slots.remove(index))
    }

    /// Pop the highest-priority ready task, as the scheduler's dispatch step.
    ///
    /// Grounded on the dispatch half of `NOS_runReadyTask`: the heap root is
    /// removed by moving the ready region's tail into slot 0 and sifting
    /// down, then the waiting region's former head slides into the vacated
    /// ready-tail slot so the two regions stay contiguous.
    pub fn dispatch(&mut self) -> Option<TaskCb<MAX_TASKS>> {
        if self.n_ready == 0 {
            return None;
        }
        self.n_ready -= 1;
        self.slots.swap(0, self.n_ready);
        let popped = self.slots.remove(self.n_ready);
        sift_down(&mut self.slots, 0, self.n_ready);
        Some(popped)
    }

    /// Push a task that just yielded back into the waiting region.
    pub fn push_back(&mut self, task: TaskCb<MAX_TASKS>) -> OsResult<()> {
        if self.slots.len() >= MAX_TASKS {
            return Err(OsError::FullTaskList);
        }
        self.slots.push(task);
        Ok(())
    }

    /// Promote the waiting task at `index` into the ready heap.
    ///
    /// Grounded on `nos_wakeupTask`: swap the target into the ready
    /// region's new tail slot, then sift it up.
    pub fn wake_index(&mut self, index: usize) {
        if index < self.n_ready {
            return;
        }
        if index > self.n_ready {
            self.slots.swap(index, self.n_ready);
        }
        sift_up(&mut self.slots, self.n_ready);
        self.n_ready += 1;
    }
}

impl<const MAX_TASKS: usize> TaskCb<MAX_TASKS> {
    /// Shallow copy used only while shuffling slots during `insert`; the
    /// moved-from slot is immediately overwritten, so this never produces a
    /// live duplicate task.
    fn clone_handle(&self) -> Self {
        TaskCb {
            priority: self.priority,
            entry: self.entry,
            user: self.user,
            tick_count: self.tick_count,
            ticks_to_wait: self.ticks_to_wait,
            cx: self.cx,
            waiting_event: self.waiting_event,
            cpu_usage_pct: self.cpu_usage_pct,
        }
    }
}

/// Sift an element up toward the root from `i`, restoring heap order after
/// an insertion. Grounded on `nos_adjustTaskArrayFromTail`.
fn sift_up<const MAX_TASKS: usize>(
    slots: &mut ArrayVec<TaskSlot<MAX_TASKS>, MAX_TASKS>,
    mut i: usize,
) -> usize {
    while i > 0 {
        let parent = (i - 1) / 2;
        if slots[parent].priority > slots[i].priority {
            slots.swap(parent, i);
            i = parent;
        } else {
            break;
        }
    }
    i
}

/// Sift an element down from `i` over the first `len` slots, restoring heap
/// order after a removal. Grounded on `nos_adjustTaskArrayFromHead`.
fn sift_down<const MAX_TASKS: usize>(
    slots: &mut ArrayVec<TaskSlot<MAX_TASKS>, MAX_TASKS>,
    mut i: usize,
    len: usize,
) -> usize {
    loop {
        let left = 2 * i + 1;
        if left >= len {
            break;
        }
        let mut min = i;
        if slots[left].priority < slots[min].priority {
            min = left;
        }
        let right = left + 1;
        if right < len && slots[right].priority < slots[min].priority {
            min = right;
        }
        if min == i {
            break;
        }
        slots.swap(min, i);
        i = min;
    }
    i
}

fn is_min_heap<const MAX_TASKS: usize>(slots: &[TaskCb<MAX_TASKS>]) -> bool {
    for i in 1..slots.len() {
        let parent = (i - 1) / 2;
        if slots[parent].priority > slots[i].priority {
            return false;
        }
    }
    true
}
