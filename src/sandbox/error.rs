//! Common error type.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while bringing up or supervising a
/// sandboxed child.
///
/// Variants carry the failing operation so a report reads like the call
/// that produced it. Inside the child these collapse to the bootstrap
/// sentinel; in the parent they collapse to `Outcome::Failure`. No error
/// escapes `execute`.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// A system call failed.
    #[error("{op}: {source}")]
    Os {
        op: &'static str,
        source: nix::Error,
    },

    /// File I/O on a host path failed.
    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A cgroup controller file or directory could not be created,
    /// written, or read.
    #[error("cgroup {path:?}: {source}")]
    Cgroup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A path in the request cannot be handed to the OS.
    #[error("path {path:?} contains an interior NUL byte")]
    BadPath { path: PathBuf },

    /// The child died before completing the handshake, so it never
    /// reached the untrusted image.
    #[error("sandbox child exited before completing the handshake")]
    EarlyExit,

    #[error("seccomp: {0}")]
    Seccomp(#[from] libseccomp::error::SeccompError),

    /// The whitelist file could not be read.
    #[error("whitelist line {line}: {source}")]
    Whitelist {
        line: usize,
        #[source]
        source: io::Error,
    },

    /// The whitelist names a syscall the kernel does not know.
    #[error("whitelist entry {name:?} is not a known syscall")]
    UnknownSyscall { name: String },

    /// A watcher thread could not be started.
    #[error("{op}: {source}")]
    Watcher {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A watcher thread panicked before it could be joined.
    #[error("a limit watcher panicked")]
    WatcherPanic,
}

/// Maps `nix` results into [`SandboxError::Os`] with the failing call name.
pub(crate) trait ResultExt<T> {
    fn op(self, op: &'static str) -> Result<T, SandboxError>;
}

impl<T> ResultExt<T> for Result<T, nix::Error> {
    fn op(self, op: &'static str) -> Result<T, SandboxError> {
        self.map_err(|source| SandboxError::Os { op, source })
    }
}
