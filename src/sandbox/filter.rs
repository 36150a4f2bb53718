// SPDX-License-Identifier: MIT

//! Syscall whitelist loading and the seccomp filter built from it.
//!
//! The whitelist is short and curated; any syscall outside it is treated
//! as a compromise attempt, so the filter's default action kills the
//! process rather than failing the call.

use std::fs::File;
use std::io::{BufRead, BufReader};

use libseccomp::{ScmpAction, ScmpFilterContext, ScmpSyscall};

use super::error::SandboxError;

/// Parse one syscall name per line. Blank lines and `#` comments are
/// permitted.
pub(crate) fn parse_whitelist<R: BufRead>(reader: R) -> Result<Vec<String>, SandboxError> {
    let mut names = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| SandboxError::Whitelist {
            line: idx + 1,
            source,
        })?;
        let name = line.trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        names.push(name.to_string());
    }
    Ok(names)
}

/// Build a filter that allows exactly the named syscalls, unconditionally,
/// and kills the process on anything else.
pub(crate) fn build_filter(names: &[String]) -> Result<ScmpFilterContext, SandboxError> {
    let mut filter = ScmpFilterContext::new_filter(ScmpAction::KillProcess)?;
    for name in names {
        let syscall = ScmpSyscall::from_name(name)
            .map_err(|_| SandboxError::UnknownSyscall { name: name.clone() })?;
        filter.add_rule(ScmpAction::Allow, syscall)?;
    }
    Ok(filter)
}

/// Load the filter described by an open whitelist file into the kernel.
///
/// Runs in the child as the last step before exec; the descriptor is
/// consumed and closed here.
pub(crate) fn install(whitelist: File) -> Result<(), SandboxError> {
    let names = parse_whitelist(BufReader::new(whitelist))?;
    let filter = build_filter(&names)?;
    filter.load()?;
    Ok(())
}
