//! Utility helpers for running the scenarios.

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt as _;
use std::path::Path;
use std::process::Command;

use nix::unistd::Uid;
use tempfile::TempDir;

use crate::{CgroupMounts, ExecRequest, ResourceLimits};

/// Unprivileged identity the jailed program drops to.
const JAIL_UID: u32 = 65534;
const JAIL_GID: u32 = 65534;

/// Syscalls a static libc binary needs to run the scenarios, plus fork
/// and thread plumbing for the task-breach case. Deliberately generous;
/// each scenario is about the bound it breaches, not the filter. Network
/// syscalls are deliberately absent.
const SCENARIO_WHITELIST: &str = "\
read
write
readv
writev
open
openat
close
fstat
newfstatat
statx
lseek
mmap
munmap
mprotect
mremap
madvise
brk
rt_sigaction
rt_sigprocmask
rt_sigreturn
sigaltstack
ioctl
access
faccessat
arch_prctl
set_tid_address
set_robust_list
futex
rseq
getpid
gettid
getuid
getgid
geteuid
getegid
getrandom
clock_gettime
clock_nanosleep
nanosleep
gettimeofday
uname
readlink
readlinkat
getcwd
prlimit64
getrlimit
sched_getaffinity
sched_yield
exit
exit_group
clone
clone3
fork
vfork
wait4
pause
poll
ppoll
dup
dup2
pipe2
execve
";

/// A prepared jail plus the request pointing into it. The tempdir keeps
/// the jail alive for the duration of the scenario.
pub struct Scenario {
    #[allow(dead_code)]
    jail: TempDir,
    pub request: ExecRequest,
}

/// Build a jail with `program` compiled from `source`, feed it `input`,
/// and bound it by `limits`.
///
/// Returns `None`, after a note on stderr, when the environment cannot
/// host the scenario: not root, no usable cgroup hierarchy configured,
/// or no C compiler that links statically.
pub fn scenario(
    program: &str,
    source: &str,
    input: &str,
    limits: ResourceLimits,
) -> Option<Scenario> {
    let cgroups = cgroup_mounts()?;
    if !Uid::effective().is_root() {
        eprintln!("skipping: sandbox scenarios need root");
        return None;
    }

    let jail = tempfile::tempdir().expect("failed to create jail directory");
    // The dropped uid must be able to enter the jail and read the binary.
    fs::set_permissions(jail.path(), fs::Permissions::from_mode(0o755)).unwrap();
    compile_static(source, &jail.path().join(program))?;

    let input_file = jail.path().join("input.txt");
    fs::write(&input_file, input).unwrap();
    let whitelist = jail.path().join("whitelist.txt");
    fs::write(&whitelist, SCENARIO_WHITELIST).unwrap();

    let request = ExecRequest {
        exec_path: Path::new("/").join(program),
        jail_dir: jail.path().to_path_buf(),
        input_file,
        output_file: jail.path().join("output.txt"),
        whitelist,
        uid: JAIL_UID,
        gid: JAIL_GID,
        limits,
        cgroups,
    };
    Some(Scenario { jail, request })
}

/// The controller mounts come from the environment because the host
/// hierarchy is an input here: either one unified directory, or
/// `memory,pids,cpu` comma-separated.
pub fn cgroup_mounts() -> Option<CgroupMounts> {
    let raw = match env::var("JAILEXEC_TEST_CGROUPS") {
        Ok(raw) => raw,
        Err(_) => {
            eprintln!("skipping: JAILEXEC_TEST_CGROUPS not set");
            return None;
        }
    };
    let parts: Vec<&str> = raw.split(',').collect();
    match parts.as_slice() {
        [unified] => Some(CgroupMounts {
            memory: unified.into(),
            pids: unified.into(),
            cpu: unified.into(),
        }),
        [memory, pids, cpu] => Some(CgroupMounts {
            memory: memory.into(),
            pids: pids.into(),
            cpu: cpu.into(),
        }),
        _ => {
            eprintln!("skipping: JAILEXEC_TEST_CGROUPS must name 1 or 3 directories");
            None
        }
    }
}

/// Compile a scenario program statically so the jail needs no loader or
/// shared libraries.
fn compile_static(source: &str, dest: &Path) -> Option<()> {
    let src_file = dest.with_extension("c");
    fs::write(&src_file, source).unwrap();
    let status = Command::new("cc")
        .arg("-static")
        .arg("-O1")
        .arg("-o")
        .arg(dest)
        .arg(&src_file)
        .status();
    let _ = fs::remove_file(&src_file);
    match status {
        Ok(status) if status.success() => {
            fs::set_permissions(dest, fs::Permissions::from_mode(0o755)).unwrap();
            Some(())
        }
        _ => {
            eprintln!("skipping: `cc -static` unavailable");
            None
        }
    }
}
