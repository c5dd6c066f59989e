//! The interface the kernel consumes from its host platform.
//!
//! Grounded on `r3_kernel::PortThreading`'s role: the kernel core is generic
//! over anything implementing this trait, and `r3_port_std` (this crate's
//! `host` counterpart) is one concrete implementation among many a real
//! deployment could swap in (a bare-metal interrupt controller, for
//! instance).

/// A reentrant-safe critical-section primitive: save-and-disable,
/// restore-from-saved-flags.
///
/// Implementations must support nested `irq_save`/`irq_restore` pairs, i.e.
/// behave like the classic `local_irq_save`/`local_irq_restore` idiom rather
/// than a bare disable/enable, so that a platform ISR which itself calls
/// into the kernel cannot accidentally re-enable interrupts a caller further
/// up the stack still expects disabled.
pub trait Platform {
    /// Opaque saved interrupt state, returned by `irq_save` and consumed by
    /// the matching `irq_restore`.
    type Flags: Copy;

    /// Disable interrupts, returning whatever state is needed to restore
    /// them later.
    fn irq_save(&self) -> Self::Flags;

    /// Restore interrupts to the state captured by `irq_save`.
    fn irq_restore(&self, flags: Self::Flags);
}
