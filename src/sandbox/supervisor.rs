// SPDX-License-Identifier: MIT

//! The sandbox supervisor: isolation bring-up, the two-phase handshake,
//! supervision, and outcome classification.
//!
//! Ordering is the point of this module. The child is cloned into a
//! fresh PID namespace and parks after redirecting its stdio; only after
//! the resource limits are armed does the parent release it to jail
//! itself and exec. The child therefore cannot run a single instruction
//! of the untrusted image before its bounds are in force.

use nix::sched::{CloneCb, CloneFlags, clone};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::child::{self, ChildContext};
use super::edge::Edge;
use super::error::SandboxError;
use super::limits;
use super::outcome::{Outcome, classify};
use super::request::ExecRequest;

/// Stack handed to `clone` for the child's bring-up. The untrusted image
/// replaces it at exec, so bring-up depth is all it has to cover.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// How often the ready-wait looks in on a silent child.
const HANDSHAKE_TICK_MS: u16 = 50;

/// Run one untrusted program to completion under the request's bounds.
///
/// Total over all internal failure modes: anything that goes wrong
/// before or during supervision is logged and reported as
/// [`Outcome::Failure`]; nothing panics and nothing leaks past the
/// return.
pub fn execute(request: &ExecRequest) -> Outcome {
    match supervise(request) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, "sandbox failure");
            Outcome::Failure
        }
    }
}

fn supervise(request: &ExecRequest) -> Result<Outcome, SandboxError> {
    let ready = Edge::new()?;
    let go = Edge::new()?;
    let ctx = ChildContext::prepare(request, &ready, &go)?;
    let mut stack = vec![0u8; CHILD_STACK_SIZE];

    // New PID namespace: the child is pid 1 inside it, so the kernel
    // tears down every descendant when it dies.
    let pid = {
        let cb: CloneCb = Box::new(|| child::bootstrap(&ctx));
        unsafe {
            clone(
                cb,
                &mut stack,
                CloneFlags::CLONE_NEWPID,
                Some(Signal::SIGCHLD as i32),
            )
        }
        .map_err(|source| SandboxError::Os {
            op: "clone",
            source,
        })?
    };
    debug!(%pid, "sandbox child spawned");

    if let Err(err) = await_ready(&ready, pid) {
        reap(pid);
        return Err(err);
    }
    let watchdog = match limits::arm(pid, &request.limits, &request.cgroups) {
        Ok(watchdog) => watchdog,
        Err(err) => {
            reap(pid);
            return Err(err);
        }
    };
    if let Err(err) = go.signal() {
        reap(pid);
        let _ = watchdog.disarm();
        return Err(err);
    }
    drop(ctx);
    drop(ready);
    drop(go);

    let status = match waitpid(pid, None) {
        Ok(status) => status,
        Err(source) => {
            let _ = watchdog.disarm();
            return Err(SandboxError::Os {
                op: "waitpid",
                source,
            });
        }
    };
    let exceeded = watchdog.disarm()?;

    let outcome = classify(status, exceeded);
    debug!(?status, ?exceeded, ?outcome, "sandbox child reaped");
    Ok(outcome)
}

/// Wait for the child's ready wake. The redirect steps before the wake
/// can fail and an eventfd never reports a dead writer, so a child that
/// exits without posting it is noticed between poll ticks instead of
/// hanging the supervisor.
fn await_ready(ready: &Edge, pid: Pid) -> Result<(), SandboxError> {
    loop {
        if ready.readable_within(HANDSHAKE_TICK_MS)? {
            return ready.wait();
        }
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(_) => return Err(SandboxError::EarlyExit),
            Err(source) => {
                return Err(SandboxError::Os {
                    op: "waitpid",
                    source,
                });
            }
        }
    }
}

/// Best-effort teardown for parent-side failure paths. The child cannot
/// handle signals yet, so kill it hard and reap it; nothing in the jail
/// outlives the supervisor.
fn reap(pid: Pid) {
    let _ = kill(pid, Signal::SIGKILL);
    let _ = waitpid(pid, None);
}
