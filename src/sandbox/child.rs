// SPDX-License-Identifier: MIT

//! Bring-up of the sandboxed child, from clone to exec.
//!
//! Runs in the cloned process: redirect stdio, handshake with the parent
//! so the limits are armed first, then jail, drop privileges, install the
//! syscall filter, and exec the untrusted image. Any failure is reported
//! through the bootstrap sentinel; the parent maps it to a failure
//! verdict.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt as _;
use std::os::unix::fs::OpenOptionsExt as _;

use nix::libc;
use nix::unistd::{self, Gid, Uid};

use super::edge::Edge;
use super::error::{ResultExt as _, SandboxError};
use super::filter;
use super::outcome::BOOTSTRAP_FAILED;
use super::request::ExecRequest;

/// Everything the child needs, prepared on the parent side.
///
/// The exec path is converted ahead of the clone; inside the new process
/// only system calls, `File` opens, and the whitelist parse remain.
pub(crate) struct ChildContext<'a> {
    request: &'a ExecRequest,
    exec_path: CString,
    ready: &'a Edge,
    go: &'a Edge,
}

impl<'a> ChildContext<'a> {
    pub(crate) fn prepare(
        request: &'a ExecRequest,
        ready: &'a Edge,
        go: &'a Edge,
    ) -> Result<Self, SandboxError> {
        let exec_path =
            CString::new(request.exec_path.as_os_str().as_bytes()).map_err(|_| {
                SandboxError::BadPath {
                    path: request.exec_path.clone(),
                }
            })?;
        Ok(ChildContext {
            request,
            exec_path,
            ready,
            go,
        })
    }
}

/// Entry point of the cloned process. On success this never returns; any
/// failure is written to the inherited stderr and converted to the
/// sentinel exit status.
pub(crate) fn bootstrap(ctx: &ChildContext) -> isize {
    match run(ctx) {
        Ok(never) => match never {},
        Err(err) => {
            // stderr is still the supervisor's; stdout already belongs
            // to the output file.
            let _ = writeln!(std::io::stderr(), "sandbox bootstrap: {err}");
            BOOTSTRAP_FAILED as isize
        }
    }
}

fn run(ctx: &ChildContext) -> Result<Infallible, SandboxError> {
    let request = ctx.request;

    let input = File::open(&request.input_file).map_err(|source| SandboxError::Io {
        op: "open input",
        path: request.input_file.clone(),
        source,
    })?;
    let output = File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&request.output_file)
        .map_err(|source| SandboxError::Io {
            op: "open output",
            path: request.output_file.clone(),
            source,
        })?;
    redirect(input.as_raw_fd(), libc::STDIN_FILENO)?;
    redirect(output.as_raw_fd(), libc::STDOUT_FILENO)?;
    drop(input);
    drop(output);

    // Tell the parent the redirections are in place, then stay parked
    // until the limits are armed.
    ctx.ready.signal()?;
    ctx.go.wait()?;
    ctx.ready.close_in_child();
    ctx.go.close_in_child();

    // The whitelist lives on the host filesystem, so it must be opened
    // before the root changes.
    let whitelist = File::options()
        .read(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(&request.whitelist)
        .map_err(|source| SandboxError::Io {
            op: "open whitelist",
            path: request.whitelist.clone(),
            source,
        })?;

    unistd::chdir(&request.jail_dir).op("chdir")?;
    unistd::chroot("./").op("chroot")?;

    // gid first: dropping the uid first would shed the capability needed
    // to change groups.
    unistd::setgid(Gid::from_raw(request.gid)).op("setgid")?;
    unistd::setuid(Uid::from_raw(request.uid)).op("setuid")?;

    filter::install(whitelist)?;

    Err(match unistd::execv(&ctx.exec_path, &[ctx.exec_path.as_c_str()]) {
        Ok(never) => match never {},
        Err(source) => SandboxError::Os {
            op: "execv",
            source,
        },
    })
}

/// Point a standard descriptor at `fd`, leaving `fd` for the caller to
/// close. Raw dup2: the safe wrappers refuse an arbitrary target.
fn redirect(fd: i32, stdio: i32) -> Result<(), SandboxError> {
    if unsafe { libc::dup2(fd, stdio) } < 0 {
        return Err(SandboxError::Os {
            op: "dup2",
            source: nix::errno::Errno::last(),
        });
    }
    Ok(())
}
