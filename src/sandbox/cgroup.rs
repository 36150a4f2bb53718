// SPDX-License-Identifier: MIT

//! Per-invocation cgroup directories and the controller files behind them.
//!
//! The supervisor hands in the controller mount points and never sees the
//! file layout; both cgroup generations are supported behind the same
//! surface. The host hierarchy itself is an input: it is neither mounted
//! nor garbage-collected here.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use nix::unistd::Pid;
use tracing::warn;

use super::error::SandboxError;
use super::request::{CgroupMounts, ResourceLimits};

/// Distinguishes per-invocation directory names across PID reuse, which
/// a fresh PID namespace makes more likely than usual.
static INVOCATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Attempts before a busy directory is left to the external janitor.
const REMOVE_RETRIES: u32 = 20;

/// Controller-file layout differences between the two cgroup generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    V1,
    V2,
}

impl Flavor {
    /// A unified-hierarchy directory always exposes `cgroup.controllers`.
    fn detect(mount: &Path) -> Flavor {
        if mount.join("cgroup.controllers").exists() {
            Flavor::V2
        } else {
            Flavor::V1
        }
    }
}

/// One controller directory created for a single invocation.
#[derive(Debug)]
struct ControllerDir {
    dir: PathBuf,
    flavor: Flavor,
    /// False when this controller aliases a directory another controller
    /// already created (unified hierarchy handed in as identical mounts).
    created: bool,
}

/// The per-invocation slice of the host cgroup hierarchy.
#[derive(Debug)]
pub(crate) struct JailCgroup {
    memory: ControllerDir,
    pids: ControllerDir,
    cpu: ControllerDir,
}

impl JailCgroup {
    /// Create the per-invocation subdirectory under each controller
    /// mount. Partial creation is unwound before the error is returned.
    pub(crate) fn create(mounts: &CgroupMounts, pid: Pid) -> Result<JailCgroup, SandboxError> {
        let token = format!(
            "{}-{}",
            pid,
            INVOCATION_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let mut made: Vec<PathBuf> = Vec::new();
        let result = (|| {
            let memory = make_controller_dir(&mounts.memory, &token, &mut made)?;
            let pids = make_controller_dir(&mounts.pids, &token, &mut made)?;
            let cpu = make_controller_dir(&mounts.cpu, &token, &mut made)?;
            Ok(JailCgroup { memory, pids, cpu })
        })();
        if result.is_err() {
            for dir in made.iter().rev() {
                let _ = fs::remove_dir(dir);
            }
        }
        result
    }

    /// Write the memory and task caps. The CPU bound has no writable cap
    /// in either generation; the wall watcher enforces it from the usage
    /// accounting below.
    pub(crate) fn apply(&self, limits: &ResourceLimits) -> Result<(), SandboxError> {
        let memory_cap = match self.memory.flavor {
            Flavor::V1 => "memory.limit_in_bytes",
            Flavor::V2 => "memory.max",
        };
        write_control(
            &self.memory.dir.join(memory_cap),
            &limits.memory_bytes.to_string(),
        )?;
        write_control(
            &self.pids.dir.join("pids.max"),
            &limits.max_tasks.to_string(),
        )?;
        Ok(())
    }

    /// Move `pid` into every controller directory.
    pub(crate) fn attach(&self, pid: Pid) -> Result<(), SandboxError> {
        for controller in [&self.memory, &self.pids, &self.cpu] {
            if controller.created {
                write_control(&controller.dir.join("cgroup.procs"), &pid.to_string())?;
            }
        }
        Ok(())
    }

    /// True once the kernel has OOM-killed inside the memory controller.
    pub(crate) fn memory_breached(&self) -> Result<bool, SandboxError> {
        match self.memory.flavor {
            Flavor::V2 => {
                let events = read_control(&self.memory.dir.join("memory.events"))?;
                Ok(field(&events, "oom_kill") > 0 || field(&events, "oom") > 0)
            }
            Flavor::V1 => {
                let control = read_control(&self.memory.dir.join("memory.oom_control"))?;
                Ok(field(&control, "oom_kill") > 0 || field(&control, "under_oom") > 0)
            }
        }
    }

    /// True once a fork or thread creation was refused by the task cap.
    pub(crate) fn tasks_breached(&self) -> Result<bool, SandboxError> {
        let events = read_control(&self.pids.dir.join("pids.events"))?;
        Ok(field(&events, "max") > 0)
    }

    /// Accumulated CPU time charged to the invocation.
    pub(crate) fn cpu_usage(&self) -> Result<Duration, SandboxError> {
        match self.cpu.flavor {
            Flavor::V2 => {
                let stat = read_control(&self.cpu.dir.join("cpu.stat"))?;
                Ok(Duration::from_micros(field(&stat, "usage_usec")))
            }
            Flavor::V1 => {
                let raw = read_control(&self.cpu.dir.join("cpuacct.usage"))?;
                let nanos: u64 = raw.trim().parse().unwrap_or(0);
                Ok(Duration::from_nanos(nanos))
            }
        }
    }

    /// Remove the per-invocation directories, after the child is reaped.
    ///
    /// The kernel can briefly hold a directory busy past the reap, so
    /// EBUSY is retried; anything still stuck is logged and left to the
    /// external janitor.
    pub(crate) fn remove(&self) {
        for controller in [&self.cpu, &self.pids, &self.memory] {
            if !controller.created {
                continue;
            }
            remove_with_retry(&controller.dir);
        }
    }
}

fn make_controller_dir(
    mount: &Path,
    token: &str,
    made: &mut Vec<PathBuf>,
) -> Result<ControllerDir, SandboxError> {
    let dir = mount.join(token);
    let created = if made.contains(&dir) {
        false
    } else {
        fs::create_dir(&dir).map_err(|source| SandboxError::Cgroup {
            path: dir.clone(),
            source,
        })?;
        made.push(dir.clone());
        true
    };
    Ok(ControllerDir {
        flavor: Flavor::detect(mount),
        dir,
        created,
    })
}

fn write_control(path: &Path, value: &str) -> Result<(), SandboxError> {
    fs::write(path, value).map_err(|source| SandboxError::Cgroup {
        path: path.to_path_buf(),
        source,
    })
}

fn read_control(path: &Path) -> Result<String, SandboxError> {
    fs::read_to_string(path).map_err(|source| SandboxError::Cgroup {
        path: path.to_path_buf(),
        source,
    })
}

/// Pull a `name value` counter out of a flat controller file; absent
/// fields read as zero.
fn field(text: &str, name: &str) -> u64 {
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        if parts.next() == Some(name) {
            return parts
                .next()
                .and_then(|value| value.parse().ok())
                .unwrap_or(0);
        }
    }
    0
}

fn remove_with_retry(dir: &Path) {
    for attempt in 0..REMOVE_RETRIES {
        match fs::remove_dir(dir) {
            Ok(()) => return,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err)
                if err.raw_os_error() == Some(nix::libc::EBUSY)
                    && attempt + 1 < REMOVE_RETRIES =>
            {
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => {
                warn!(
                    path = %dir.display(),
                    %err,
                    "leaving cgroup directory to the janitor"
                );
                return;
            }
        }
    }
}
