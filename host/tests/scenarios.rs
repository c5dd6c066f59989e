//! Concrete end-to-end scenarios driven through real task entry functions,
//! mirroring the numbered walkthroughs used to validate the original C
//! kernel: priority ordering, semaphore rendezvous, message-box fan-out,
//! `delay_tick` deferral, and event-deletion wakeups.

use std::sync::Mutex;

use nos_kernel::{EventId, EventKind, Heap, Kernel, MsgKind, OsError, OsResult, ResumePoint, Tick, TaskCx};

/// Records dispatch order as task bodies run. Leaked for the lifetime of a
/// test and referenced through each task's opaque `user` word, the same way
/// `nonOS.c` threads a `void *pUser` through to the task function.
struct Recorder {
    order: Mutex<Vec<&'static str>>,
}

impl Recorder {
    fn new() -> &'static Self {
        Box::leak(Box::new(Recorder {
            order: Mutex::new(Vec::new()),
        }))
    }

    fn record(&self, what: &'static str) {
        self.order.lock().unwrap().push(what);
    }

    fn snapshot(&self) -> Vec<&'static str> {
        self.order.lock().unwrap().clone()
    }
}

fn as_user(r: &'static Recorder) -> usize {
    r as *const Recorder as usize
}

unsafe fn recorder_from(user: usize) -> &'static Recorder {
    &*(user as *const Recorder)
}

const FOREVER: Tick = Tick::MAX;

#[test]
fn s1_priority_ordering() {
    let k: Kernel<4> = Kernel::with_owned_heap(1024).unwrap();
    let rec = Recorder::new();
    let user = as_user(rec);

    fn task_a(_k: &Kernel<4>, _cx: &mut TaskCx, user: usize) -> OsResult<()> {
        unsafe { recorder_from(user) }.record("A");
        Ok(())
    }
    fn task_b(k: &Kernel<4>, cx: &mut TaskCx, user: usize) -> OsResult<()> {
        unsafe { recorder_from(user) }.record("B");
        cx.set_resume_point(ResumePoint(1));
        k.wait_tick(cx, 10)?;
        Ok(())
    }
    fn task_c(_k: &Kernel<4>, _cx: &mut TaskCx, user: usize) -> OsResult<()> {
        unsafe { recorder_from(user) }.record("C");
        Ok(())
    }

    k.create_task(task_a, user, 3).unwrap();
    k.create_task(task_b, user, 1).unwrap();
    k.create_task(task_c, user, 2).unwrap();

    // B has the lowest priority value (runs first), then yields on a
    // 10-tick wait, so C and A follow in priority order.
    assert_eq!(k.run_ready_task().unwrap(), 1);
    assert_eq!(k.run_ready_task().unwrap(), 2);
    assert_eq!(k.run_ready_task().unwrap(), 3);
    assert_eq!(rec.snapshot(), vec!["B", "C", "A"]);
}

#[test]
fn s2_allocator_split_coalesce() {
    let mut heap = Heap::new_owned(1024, 4).unwrap();
    let m1 = heap.malloc(7).unwrap();
    let _m2 = heap.malloc(15).unwrap();
    heap.free(m1);
    let m3 = heap.malloc(7).unwrap();
    assert_eq!(m1, m3);
    heap.free(m3);
    heap.free(_m2);
    // Everything given back; one malloc spanning (close to) the whole pool
    // should succeed again, confirming the free list re-coalesced into one
    // block rather than staying fragmented.
    let whole = heap.malloc(900).unwrap();
    heap.free(whole);
}

#[test]
fn s3_semaphore_rendezvous() {
    let k: Kernel<4> = Kernel::with_owned_heap(1024).unwrap();
    let rec = Recorder::new();

    let mut cell = None;
    k.create_event(EventKind::Semaphore, 0, &mut cell).unwrap();
    let sem = cell.unwrap();

    struct Ctx {
        rec: &'static Recorder,
        sem: EventId,
    }
    let ctx = Box::leak(Box::new(Ctx { rec, sem }));
    let user = ctx as *const Ctx as usize;

    fn t1(k: &Kernel<4>, cx: &mut TaskCx, user: usize) -> OsResult<()> {
        let ctx = unsafe { &*(user as *const Ctx) };
        if cx.resume_point() == ResumePoint::START {
            ctx.rec.record("T1-wait");
        }
        cx.set_resume_point(ResumePoint(1));
        k.wait_semaphore(cx, ctx.sem, FOREVER)?;
        ctx.rec.record("T1-resumed");
        Ok(())
    }

    k.create_task(t1, user, 1).unwrap();

    // T1 suspends immediately: free_count starts at 0.
    k.run_ready_task().unwrap();
    assert_eq!(rec.snapshot(), vec!["T1-wait"]);

    // An ISR signals the semaphore.
    k.send_semaphore(sem).unwrap();

    // T1 resumes, consumes the one permit it was given, and completes.
    k.run_ready_task().unwrap();
    assert_eq!(rec.snapshot(), vec!["T1-wait", "T1-resumed"]);
}

#[test]
fn s4_message_box_fan_out_recv_free() {
    let k: Kernel<8> = Kernel::with_owned_heap(4096).unwrap();
    let rec = Recorder::new();

    let mut cell = None;
    k.create_event(EventKind::MessageBox, 0, &mut cell).unwrap();
    let msg_box = cell.unwrap();

    struct Ctx {
        rec: &'static Recorder,
        msg_box: EventId,
        received_lens: Mutex<Vec<usize>>,
    }
    let ctx = Box::leak(Box::new(Ctx {
        rec,
        msg_box,
        received_lens: Mutex::new(Vec::new()),
    }));
    let user = ctx as *const Ctx as usize;

    fn waiter(tag: &'static str) -> fn(&Kernel<8>, &mut TaskCx, usize) -> OsResult<()> {
        // Each waiter needs a distinct fn item so it can log its own tag;
        // a tiny macro would do this more tersely, but two call sites don't
        // earn one.
        match tag {
            "T1" => t1,
            _ => t2,
        }
    }

    fn t1(k: &Kernel<8>, cx: &mut TaskCx, user: usize) -> OsResult<()> {
        let ctx = unsafe { &*(user as *const Ctx) };
        cx.set_resume_point(ResumePoint(1));
        let received = k.wait_message_box(cx, ctx.msg_box, FOREVER)?;
        if let Some((p, len)) = received {
            ctx.received_lens.lock().unwrap().push(len);
            k.free(p).unwrap();
        }
        ctx.rec.record("T1-resumed");
        Ok(())
    }
    fn t2(k: &Kernel<8>, cx: &mut TaskCx, user: usize) -> OsResult<()> {
        let ctx = unsafe { &*(user as *const Ctx) };
        cx.set_resume_point(ResumePoint(1));
        let received = k.wait_message_box(cx, ctx.msg_box, FOREVER)?;
        if let Some((p, len)) = received {
            ctx.received_lens.lock().unwrap().push(len);
            k.free(p).unwrap();
        }
        ctx.rec.record("T2-resumed");
        Ok(())
    }

    k.create_task(waiter("T1"), user, 1).unwrap();
    k.create_task(waiter("T2"), user, 2).unwrap();

    k.run_ready_task().unwrap(); // T1 suspends
    k.run_ready_task().unwrap(); // T2 suspends

    let payload = k.alloc(5).unwrap();
    unsafe { payload.as_ptr().write_bytes(0x42, 5) };
    k.send_message_box(msg_box, MsgKind::RecvFree, payload, 5)
        .unwrap();

    k.run_ready_task().unwrap(); // T1 resumes with its own copy
    k.run_ready_task().unwrap(); // T2 resumes with its own copy, frees the original

    assert_eq!(rec.snapshot(), vec!["T1-resumed", "T2-resumed"]);
    assert_eq!(*ctx.received_lens.lock().unwrap(), vec![5, 5]);
}

#[test]
fn s5_delay_tick_defers_wakes() {
    let k: Kernel<4> = Kernel::with_owned_heap(1024).unwrap();
    let rec = Recorder::new();

    let mut cell = None;
    k.create_event(EventKind::Semaphore, 0, &mut cell).unwrap();
    let sem = cell.unwrap();

    struct Ctx {
        rec: &'static Recorder,
        sem: EventId,
    }
    let ctx = Box::leak(Box::new(Ctx { rec, sem }));
    let user = ctx as *const Ctx as usize;

    fn t1(k: &Kernel<4>, cx: &mut TaskCx, user: usize) -> OsResult<()> {
        let ctx = unsafe { &*(user as *const Ctx) };
        cx.set_resume_point(ResumePoint(1));
        match k.wait_semaphore(cx, ctx.sem, 3) {
            Err(OsError::Pended) => Err(OsError::Pended),
            other => {
                ctx.rec.record("T1-resumed");
                other
            }
        }
    }

    k.create_task(t1, user, 1).unwrap();
    k.run_ready_task().unwrap(); // T1 suspends with a 3-tick timeout

    k.begin_delay_tick(5).unwrap();
    for _ in 0..3 {
        k.on_sys_tick().unwrap();
    }
    // The timeout fired at tick 3, but the delay (5 ticks) is still
    // pending, so the wake must have been deferred rather than applied.
    assert!(rec.snapshot().is_empty());

    for _ in 0..2 {
        k.on_sys_tick().unwrap();
    }
    assert!(k.is_delay_complete().unwrap());
    k.end_delay_tick().unwrap();

    k.run_ready_task().unwrap();
    assert_eq!(rec.snapshot(), vec!["T1-resumed"]);
}

#[test]
fn s6_event_deletion_wakes_waiters() {
    let k: Kernel<8> = Kernel::with_owned_heap(1024).unwrap();
    let rec = Recorder::new();

    let mut cell = None;
    k.create_event(EventKind::MessageBox, 0, &mut cell).unwrap();
    let msg_box = cell.unwrap();

    struct Ctx {
        rec: &'static Recorder,
        msg_box: EventId,
    }
    let ctx = Box::leak(Box::new(Ctx { rec, msg_box }));
    let user = ctx as *const Ctx as usize;

    fn waiter(k: &Kernel<8>, cx: &mut TaskCx, user: usize) -> OsResult<()> {
        let ctx = unsafe { &*(user as *const Ctx) };
        cx.set_resume_point(ResumePoint(1));
        let result = k.wait_message_box(cx, ctx.msg_box, FOREVER);
        // A deleted event surfaces as `NullEvt` with no payload, matching
        // how a timed-out/cancelled wait is reported.
        assert!(matches!(result, Err(OsError::NullEvt) | Ok(None)));
        ctx.rec.record("woken");
        Ok(())
    }

    k.create_task(waiter, user, 1).unwrap();
    k.create_task(waiter, user, 2).unwrap();
    k.create_task(waiter, user, 3).unwrap();
    for _ in 0..3 {
        k.run_ready_task().unwrap(); // all three suspend
    }
    assert!(rec.snapshot().is_empty());

    let mut delete_cell = Some(msg_box);
    k.delete_event(&mut delete_cell).unwrap();
    assert!(delete_cell.is_none());

    assert_eq!(k.run_ready_task().unwrap(), 1);
    assert_eq!(k.run_ready_task().unwrap(), 2);
    assert_eq!(k.run_ready_task().unwrap(), 3);
    assert_eq!(rec.snapshot(), vec!["woken", "woken", "woken"]);
}
