// SPDX-License-Identifier: MIT

//! Final classification of a supervised execution.

use nix::sys::wait::WaitStatus;

use super::watchdog::Exceeded;

/// Exit status the child reports when the sandbox could not be brought
/// up to the exec point. Reserved: a normal program exiting with this
/// status is indistinguishable and also reported as a sandbox failure.
pub(crate) const BOOTSTRAP_FAILED: i32 = 254;

/// The verdict for one sandboxed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The program ran to a normal exit and no limit was breached.
    Ok,

    /// The program was killed by a signal and no limit was breached.
    RuntimeError,

    MemExceeded,
    TimeExceeded,
    TaskExceeded,

    /// The sandbox itself failed; the verdict says nothing about the
    /// program.
    Failure,
}

/// A breached limit dominates the raw wait status, except that a child
/// reporting the bootstrap sentinel always means the sandbox failed.
pub(crate) fn classify(status: WaitStatus, exceeded: Exceeded) -> Outcome {
    if let WaitStatus::Exited(_, code) = status {
        if code == BOOTSTRAP_FAILED {
            return Outcome::Failure;
        }
    }
    match exceeded {
        Exceeded::Memory => Outcome::MemExceeded,
        Exceeded::Time => Outcome::TimeExceeded,
        Exceeded::Tasks => Outcome::TaskExceeded,
        Exceeded::Fatal => Outcome::Failure,
        Exceeded::None => match status {
            WaitStatus::Exited(_, _) => Outcome::Ok,
            WaitStatus::Signaled(_, _, _) => Outcome::RuntimeError,
            _ => Outcome::Failure,
        },
    }
}
