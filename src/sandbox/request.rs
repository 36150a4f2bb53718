// SPDX-License-Identifier: MIT

//! Caller-facing description of one sandboxed execution.

use std::path::PathBuf;
use std::time::Duration;

/// Describes one program to run inside the jail.
///
/// The jail directory, its contents, and the whitelist file are prepared
/// by the caller; the request only points at them.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Path of the executable as the child sees it after the root change.
    pub exec_path: PathBuf,

    /// Directory that becomes the child's root.
    pub jail_dir: PathBuf,

    /// Host file bound to the child's stdin.
    pub input_file: PathBuf,

    /// Host file that receives the child's stdout verbatim.
    /// Truncated on every invocation.
    pub output_file: PathBuf,

    /// Host file listing the allowed syscalls, one name per line.
    pub whitelist: PathBuf,

    /// Low-privilege identity the child assumes before exec.
    pub uid: u32,
    pub gid: u32,

    pub limits: ResourceLimits,
    pub cgroups: CgroupMounts,
}

/// The bounds enforced on the child and everything it spawns.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    /// Resident memory cap in bytes.
    pub memory_bytes: u64,

    /// Cap on concurrent tasks (processes and threads).
    pub max_tasks: u64,

    /// Accumulated CPU time the invocation may charge.
    pub cpu_time: Duration,

    /// Wall-clock deadline, counted from the moment the limits are armed.
    pub wall_time: Duration,
}

/// Per-controller cgroup directories under which one subdirectory per
/// invocation is created and later removed.
///
/// The directories must exist and be writable by the supervisor. A
/// unified hierarchy may be handed in as the same path three times.
#[derive(Debug, Clone)]
pub struct CgroupMounts {
    pub memory: PathBuf,
    pub pids: PathBuf,
    pub cpu: PathBuf,
}
