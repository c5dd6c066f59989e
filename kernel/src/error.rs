//! Error codes returned by every kernel API call.

use core::fmt;

/// The result of a kernel call that did not run to completion.
///
/// Mirrors the flat `NOS_Error_e` taxonomy of the original kernel: every
/// public operation returns `Result<T, OsError>` instead of the source's
/// `int` status code, but the set of conditions is the same one spec §6
/// and §7 enumerate.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsError {
    /// The TCB referenced by the call does not exist (e.g. no current task,
    /// or an operation targeting a dead task).
    NullTcb,
    /// A required pointer/handle argument was null or otherwise absent.
    NullPointer,
    /// The heap could not satisfy an allocation the call needed to make.
    NullMemory,
    /// A stack-shaped resource (task-local state) was unexpectedly absent.
    NullStack,
    /// `create_task` was given no entry function.
    NullTaskFunc,
    /// The event referenced by the call does not exist, or a timed-out wait
    /// found no event to consume.
    NullEvt,
    /// The requested priority is out of range or already in use.
    WrongPrio,
    /// An argument failed validation unrelated to priority or nullness.
    WrongParm,
    /// The task table has no free slot.
    FullTaskList,
    /// The target was not found in the list it was expected to be in.
    NotInList,
    /// Not a real error: the caller must suspend and later resume.
    Pended,
    /// The call is not valid in the current context (e.g. from an ISR, or
    /// while the scheduler is not running).
    InvalidOper,
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OsError::NullTcb => "no such task",
            OsError::NullPointer => "null pointer argument",
            OsError::NullMemory => "out of heap memory",
            OsError::NullStack => "missing task-local state",
            OsError::NullTaskFunc => "missing task entry function",
            OsError::NullEvt => "no such event",
            OsError::WrongPrio => "invalid or duplicate priority",
            OsError::WrongParm => "invalid parameter",
            OsError::FullTaskList => "task table is full",
            OsError::NotInList => "not found in expected list",
            OsError::Pended => "task suspended, scheduler must yield",
            OsError::InvalidOper => "operation not valid in this context",
        };
        f.write_str(s)
    }
}

/// Convenience alias used throughout the kernel.
pub type OsResult<T> = Result<T, OsError>;
