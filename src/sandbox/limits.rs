// SPDX-License-Identifier: MIT

//! The resource-limit controller: caps written, child attached, watchers
//! started.

use std::sync::Arc;

use nix::unistd::Pid;
use tracing::debug;

use super::cgroup::JailCgroup;
use super::error::SandboxError;
use super::request::{CgroupMounts, ResourceLimits};
use super::watchdog::Watchdog;

/// Arm every bound for `pid`.
///
/// Returns only once the caps are written, the pid is attached, and both
/// watchers are running, so the caller can release the child knowing it
/// cannot execute a single instruction of the untrusted image unbounded.
/// Any failure unwinds the cgroup directories created here.
pub(crate) fn arm(
    pid: Pid,
    limits: &ResourceLimits,
    mounts: &CgroupMounts,
) -> Result<Watchdog, SandboxError> {
    let cgroup = JailCgroup::create(mounts, pid)?;
    if let Err(err) = cgroup.apply(limits).and_then(|()| cgroup.attach(pid)) {
        cgroup.remove();
        return Err(err);
    }
    let cgroup = Arc::new(cgroup);
    match Watchdog::spawn(pid, limits, Arc::clone(&cgroup)) {
        Ok(watchdog) => {
            debug!(%pid, ?limits, "resource limits armed");
            Ok(watchdog)
        }
        Err(err) => {
            cgroup.remove();
            Err(err)
        }
    }
}
