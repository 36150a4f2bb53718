// SPDX-License-Identifier: MIT

//! One-shot wake edges for the parent/child handshake.

use std::os::fd::{AsFd, AsRawFd};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::eventfd::{EfdFlags, EventFd};
use nix::unistd;

use super::error::{ResultExt as _, SandboxError};

/// A single-writer, single-reader wake carried over an eventfd.
///
/// Two edges make up the handshake: child→parent ("stdio is redirected,
/// attach me") and parent→child ("limits armed, go"). Each edge is
/// written at most once per invocation.
pub(crate) struct Edge {
    fd: EventFd,
}

impl Edge {
    pub(crate) fn new() -> Result<Self, SandboxError> {
        let fd = EventFd::from_value_and_flags(0, EfdFlags::empty()).op("eventfd")?;
        Ok(Edge { fd })
    }

    /// Post the single wake for this edge.
    pub(crate) fn signal(&self) -> Result<(), SandboxError> {
        let one = 1u64.to_ne_bytes();
        unistd::write(&self.fd, &one).op("eventfd write")?;
        Ok(())
    }

    /// Block until the peer posts its wake.
    pub(crate) fn wait(&self) -> Result<(), SandboxError> {
        let mut counter = [0u8; 8];
        unistd::read(&self.fd, &mut counter).op("eventfd read")?;
        Ok(())
    }

    /// True once the wake can be read without blocking, false when
    /// `timeout_ms` elapses first. An eventfd never signals the death of
    /// its peer, so callers that cannot assume the writer is alive poll
    /// through this and check on the writer between ticks.
    pub(crate) fn readable_within(&self, timeout_ms: u16) -> Result<bool, SandboxError> {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(timeout_ms)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(fds[0]
                .revents()
                .is_some_and(|revents| revents.contains(PollFlags::POLLIN))),
            Err(Errno::EINTR) => Ok(false),
            Err(source) => Err(SandboxError::Os {
                op: "poll",
                source,
            }),
        }
    }

    /// Close the child's copy of the descriptor after the handshake.
    ///
    /// The cloned child shares this struct's memory image but owns a
    /// separate descriptor table; a raw close drops its entry while the
    /// parent's stays open for `Drop` to handle.
    pub(crate) fn close_in_child(&self) {
        unsafe { nix::libc::close(self.fd.as_fd().as_raw_fd()) };
    }
}
