//! A minimal cooperative real-time kernel: a fixed-capacity priority
//! scheduler, counting semaphores, message boxes, tick timeouts, and the
//! first-fit heap allocator that backs message payloads.
//!
//! Build a [`kernel::Kernel`], create tasks and events on it, then drive it
//! with [`kernel::Kernel::run_ready_task`] and
//! [`kernel::Kernel::on_sys_tick`] from your platform's main loop and tick
//! ISR respectively. See `nos_host` for a hosted binding that wires these up
//! against `std::thread`.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod event;
pub mod heap;
pub mod kernel;
pub mod klock;
pub mod platform;
pub mod sched;
pub mod task;

pub use error::{OsError, OsResult};
pub use event::{EventId, EventKind, MsgKind};
pub use heap::Heap;
pub use kernel::Kernel;
pub use platform::Platform;
pub use task::{Priority, ResumePoint, TaskCx, TaskEntry, Tick};
