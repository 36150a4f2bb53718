// SPDX-License-Identifier: MIT

//! The watchers, the shared exceeded indicator, and the terminator.
//!
//! Each invocation arms two watcher threads: one polling the memory and
//! task controllers for breach events, one holding the wall-clock
//! deadline and the CPU-time bound. The first breach claims the
//! indicator, kills the child, and raises a halt flag so the sibling
//! winds down; the supervisor joins both after the reap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::cgroup::JailCgroup;
use super::error::SandboxError;
use super::request::ResourceLimits;

/// How often the watchers inspect controller state and the halt flag.
const POLL_TICK: Duration = Duration::from_millis(20);

/// Which bound, if any, was breached. One-shot: the first transition out
/// of `None` is the only one ever recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Exceeded {
    None = 0,
    Memory = 1,
    Time = 2,
    Tasks = 3,
    /// A watcher failed internally; the run cannot be trusted.
    Fatal = 4,
}

/// The indicator cell shared between both watchers and the supervisor.
pub(crate) struct ExceededCell(AtomicU8);

impl ExceededCell {
    fn new() -> Self {
        ExceededCell(AtomicU8::new(Exceeded::None as u8))
    }

    /// Record a breach. Only the first claim wins, so concurrent
    /// breaches linearize to a single observable transition.
    pub(crate) fn trip(&self, kind: Exceeded) -> bool {
        self.0
            .compare_exchange(
                Exceeded::None as u8,
                kind as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn get(&self) -> Exceeded {
        match self.0.load(Ordering::Acquire) {
            1 => Exceeded::Memory,
            2 => Exceeded::Time,
            3 => Exceeded::Tasks,
            4 => Exceeded::Fatal,
            _ => Exceeded::None,
        }
    }
}

/// Coordinates the single kill of the sandboxed child.
pub(crate) struct Terminator {
    victim: Pid,
    fired: AtomicBool,
    reaped: AtomicBool,
    halt: AtomicBool,
}

impl Terminator {
    fn new(victim: Pid) -> Self {
        Terminator {
            victim,
            fired: AtomicBool::new(false),
            reaped: AtomicBool::new(false),
            halt: AtomicBool::new(false),
        }
    }

    /// One-shot: the first breaching watcher kills the victim and raises
    /// the halt flag so the sibling winds down at its next tick. Once
    /// the parent has observed the exit the victim pid may already be
    /// recycled, so no signal is sent past that point.
    pub(crate) fn fire(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.halt.store(true, Ordering::SeqCst);
        if !self.reaped.load(Ordering::SeqCst) {
            if let Err(err) = kill(self.victim, Signal::SIGKILL) {
                warn!(victim = %self.victim, %err, "failed to kill sandboxed child");
            }
        }
    }

    pub(crate) fn halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    /// The supervisor has reaped the child; watchers must not signal
    /// again and should wind down.
    fn observe_exit(&self) {
        self.reaped.store(true, Ordering::SeqCst);
        self.halt.store(true, Ordering::SeqCst);
    }
}

/// The armed pair of watchers for one invocation.
///
/// Owns the cgroup slice for the lifetime of the run; `disarm` joins the
/// watchers and removes the directories once the child is reaped.
pub(crate) struct Watchdog {
    exceeded: Arc<ExceededCell>,
    terminator: Arc<Terminator>,
    cgroup: Arc<JailCgroup>,
    watchers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("exceeded", &self.exceeded.get())
            .field("cgroup", &self.cgroup)
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

impl Watchdog {
    pub(crate) fn spawn(
        pid: Pid,
        limits: &ResourceLimits,
        cgroup: Arc<JailCgroup>,
    ) -> Result<Watchdog, SandboxError> {
        let exceeded = Arc::new(ExceededCell::new());
        let terminator = Arc::new(Terminator::new(pid));

        let breach_watcher = {
            let exceeded = Arc::clone(&exceeded);
            let terminator = Arc::clone(&terminator);
            let cgroup = Arc::clone(&cgroup);
            thread::Builder::new()
                .name("sandbox-breach".into())
                .spawn(move || watch_breaches(&exceeded, &terminator, &cgroup))
                .map_err(|source| SandboxError::Watcher {
                    op: "spawn breach watcher",
                    source,
                })?
        };

        let clock_watcher = {
            let exceeded = Arc::clone(&exceeded);
            let terminator = Arc::clone(&terminator);
            let cgroup = Arc::clone(&cgroup);
            let cpu_time = limits.cpu_time;
            let wall_time = limits.wall_time;
            let terminator_for_err = Arc::clone(&terminator);
            let spawned = thread::Builder::new()
                .name("sandbox-clock".into())
                .spawn(move || watch_clocks(&exceeded, &terminator, &cgroup, cpu_time, wall_time));
            match spawned {
                Ok(handle) => handle,
                Err(source) => {
                    terminator_for_err.observe_exit();
                    let _ = breach_watcher.join();
                    return Err(SandboxError::Watcher {
                        op: "spawn clock watcher",
                        source,
                    });
                }
            }
        };

        Ok(Watchdog {
            exceeded,
            terminator,
            cgroup,
            watchers: vec![breach_watcher, clock_watcher],
        })
    }

    /// Called after the child is reaped: stops both watchers, waits for
    /// a fired terminator to finish, removes the cgroup directories, and
    /// yields the final indicator value.
    pub(crate) fn disarm(mut self) -> Result<Exceeded, SandboxError> {
        self.terminator.observe_exit();
        let mut panicked = false;
        for handle in self.watchers.drain(..) {
            if handle.join().is_err() {
                panicked = true;
            }
        }
        self.cgroup.remove();
        if panicked {
            return Err(SandboxError::WatcherPanic);
        }
        Ok(self.exceeded.get())
    }
}

/// Poll the memory and task controllers until a breach or the halt flag.
///
/// The breach checks run before the halt check so a breach that already
/// killed the child is still attributed after the parent reaps it.
fn watch_breaches(exceeded: &ExceededCell, terminator: &Terminator, cgroup: &JailCgroup) {
    loop {
        match cgroup.memory_breached() {
            Ok(true) => {
                if exceeded.trip(Exceeded::Memory) {
                    debug!("memory bound breached");
                }
                terminator.fire();
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%err, "memory watcher lost its controller");
                exceeded.trip(Exceeded::Fatal);
                terminator.fire();
                return;
            }
        }
        match cgroup.tasks_breached() {
            Ok(true) => {
                if exceeded.trip(Exceeded::Tasks) {
                    debug!("task bound breached");
                }
                terminator.fire();
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%err, "task watcher lost its controller");
                exceeded.trip(Exceeded::Fatal);
                terminator.fire();
                return;
            }
        }
        if terminator.halted() {
            return;
        }
        thread::sleep(POLL_TICK);
    }
}

/// Hold the wall-clock deadline and the CPU-time bound. CPU overshoot is
/// attributed to TIME, the same as a wall expiry.
fn watch_clocks(
    exceeded: &ExceededCell,
    terminator: &Terminator,
    cgroup: &JailCgroup,
    cpu_time: Duration,
    wall_time: Duration,
) {
    let deadline = Instant::now() + wall_time;
    loop {
        match cgroup.cpu_usage() {
            Ok(used) if used > cpu_time => {
                if exceeded.trip(Exceeded::Time) {
                    debug!(?used, "cpu bound breached");
                }
                terminator.fire();
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "clock watcher lost its controller");
                exceeded.trip(Exceeded::Fatal);
                terminator.fire();
                return;
            }
        }
        if terminator.halted() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            if exceeded.trip(Exceeded::Time) {
                debug!("wall bound breached");
            }
            terminator.fire();
            return;
        }
        thread::sleep(POLL_TICK.min(deadline - now));
    }
}
