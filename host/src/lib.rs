//! Hosted platform binding for `nos_kernel`: a [`platform::HostPlatform`]
//! critical section faked on top of `spin`, a [`driver::TickDriver`]
//! background thread, and a process-wide [`global`] convenience accessor.
//!
//! Mirrors `r3_port_std`'s role: a hosted simulation of a platform port,
//! used both for testing the portable kernel and as a ready-made binding
//! for host-side demonstrations.

mod driver;
mod platform;

pub use driver::{drive_delay_tick, run_until, TickDriver};
pub use nos_kernel::{Kernel, OsError, OsResult};
pub use platform::{HostPlatform, HostPlatformBuilder, IrqFlags};

use once_cell::sync::OnceCell;

/// Task-table capacity of the process-wide singleton returned by
/// [`global`], matching the kernel's own default `MAX_TASKS`.
pub const GLOBAL_MAX_TASKS: usize = 10;

/// Heap size in bytes for the process-wide singleton, large enough for a
/// handful of small message-box payloads; applications with larger needs
/// should build their own `Kernel` instead of using this convenience
/// accessor.
pub const GLOBAL_HEAP_SIZE: usize = 4096;

static GLOBAL: OnceCell<Kernel<GLOBAL_MAX_TASKS>> = OnceCell::new();

/// A process-wide `Kernel<10>`, initialized on first access.
///
/// This exists for applications that want the ambient-singleton ergonomics
/// the original C API assumed (a single implicit kernel instance); the
/// primary, recommended API remains instance-based (`Kernel::new` /
/// `&Kernel`), which is what every test in this workspace uses so that many
/// independent kernels can run concurrently.
pub fn global() -> &'static Kernel<GLOBAL_MAX_TASKS> {
    GLOBAL.get_or_init(|| {
        log::debug!("initializing global kernel instance ({GLOBAL_HEAP_SIZE} byte heap)");
        Kernel::with_owned_heap(GLOBAL_HEAP_SIZE).expect("global heap allocation failed")
    })
}

/// Initialize `env_logger` from `RUST_LOG`, matching `r3_port_std`'s own
/// test/example setup. A no-op if a logger is already installed.
pub fn init_logger() {
    let _ = env_logger::try_init();
}
