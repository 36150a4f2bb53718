// SPDX-License-Identifier: MIT

//! # jailexec
//!
//! The execution core of a programming-contest judge: one invocation
//! runs one untrusted native program against a fixed input under
//! enforced bounds on wall and CPU time, resident memory, and task
//! count, with no access to the host filesystem, the host PID
//! namespace, or any syscall outside a curated whitelist.

#[cfg(target_os = "linux")]
pub mod sandbox;

#[cfg(target_os = "linux")]
pub use sandbox::{CgroupMounts, ExecRequest, Outcome, ResourceLimits, SandboxError, execute};
