//! The end-to-end scenarios, one per behavior the engine must classify.

use std::fs;
use std::time::Duration;

use crate::{ExecRequest, Outcome, ResourceLimits, execute};

use super::util;

/// Copies stdin to stdout and exits cleanly.
const ECHO_C: &str = r#"
#include <unistd.h>
int main(void) {
    char buf[4096];
    ssize_t n;
    while ((n = read(0, buf, sizeof buf)) > 0) {
        if (write(1, buf, (size_t)n) != n) return 2;
    }
    return n == 0 ? 0 : 1;
}
"#;

/// Touches 200 MiB so the resident bound is really exercised.
const HOG_C: &str = r#"
#include <stdlib.h>
#include <string.h>
int main(void) {
    size_t total = 200u * 1024 * 1024;
    char *p = malloc(total);
    if (!p) return 3;
    memset(p, 0xab, total);
    return 0;
}
"#;

const SLEEPER_C: &str = r#"
#include <unistd.h>
int main(void) {
    sleep(5);
    return 0;
}
"#;

/// Forks well past the task bound, parking every process it manages to
/// create.
const SPAWNER_C: &str = r#"
#include <unistd.h>
int main(void) {
    for (int i = 0; i < 64; i++) {
        pid_t pid = fork();
        if (pid == 0) {
            pause();
            _exit(0);
        }
    }
    pause();
    return 0;
}
"#;

/// Asks for a network socket, which the whitelist does not carry.
const OUTLAW_C: &str = r#"
#include <sys/syscall.h>
#include <unistd.h>
int main(void) {
    syscall(SYS_socket, 2, 1, 0);
    return 0;
}
"#;

const CRASHER_C: &str = r#"
int main(void) {
    volatile int *p = 0;
    *p = 42;
    return 0;
}
"#;

fn generous() -> ResourceLimits {
    ResourceLimits {
        memory_bytes: 64 * 1024 * 1024,
        max_tasks: 8,
        cpu_time: Duration::from_secs(5),
        wall_time: Duration::from_secs(10),
    }
}

#[test]
fn s1_echo_runs_clean() {
    let limits = ResourceLimits {
        memory_bytes: 64 * 1024 * 1024,
        max_tasks: 1,
        cpu_time: Duration::from_secs(1),
        wall_time: Duration::from_secs(2),
    };
    let Some(scenario) = util::scenario("echo", ECHO_C, "hello\n", limits) else {
        return;
    };
    assert_eq!(execute(&scenario.request), Outcome::Ok);
    assert_eq!(
        fs::read_to_string(&scenario.request.output_file).unwrap(),
        "hello\n"
    );
}

/// A program that copies stdin to stdout must produce a byte-identical
/// output file, and nothing from the supervisor may leak into it.
#[test]
fn echo_round_trips_bytes() {
    let input: String = "0123456789abcdef\n".repeat(4096);
    let Some(scenario) = util::scenario("echo", ECHO_C, &input, generous()) else {
        return;
    };
    assert_eq!(execute(&scenario.request), Outcome::Ok);
    assert_eq!(
        fs::read(&scenario.request.output_file).unwrap(),
        input.as_bytes()
    );
}

#[test]
fn s2_memory_breach() {
    let Some(scenario) = util::scenario("hog", HOG_C, "", generous()) else {
        return;
    };
    assert_eq!(execute(&scenario.request), Outcome::MemExceeded);
}

#[test]
fn s3_wall_time_breach() {
    let limits = ResourceLimits {
        wall_time: Duration::from_secs(1),
        ..generous()
    };
    let Some(scenario) = util::scenario("sleeper", SLEEPER_C, "", limits) else {
        return;
    };
    assert_eq!(execute(&scenario.request), Outcome::TimeExceeded);
}

#[test]
fn s4_task_breach() {
    let Some(scenario) = util::scenario("spawner", SPAWNER_C, "", generous()) else {
        return;
    };
    assert_eq!(execute(&scenario.request), Outcome::TaskExceeded);
}

/// A syscall outside the whitelist kills the program; no limit was
/// breached, so this reads as a runtime error, not a sandbox failure.
#[test]
fn s5_disallowed_syscall() {
    let Some(scenario) = util::scenario("outlaw", OUTLAW_C, "", generous()) else {
        return;
    };
    assert_eq!(execute(&scenario.request), Outcome::RuntimeError);
}

#[test]
fn s6_runtime_crash() {
    let Some(scenario) = util::scenario("crasher", CRASHER_C, "", generous()) else {
        return;
    };
    assert_eq!(execute(&scenario.request), Outcome::RuntimeError);
}

/// A missing executable dies inside bootstrap, which must surface as a
/// sandbox failure rather than any program verdict.
#[test]
fn missing_executable_is_failure() {
    let Some(mut scenario) = util::scenario("echo", ECHO_C, "", generous()) else {
        return;
    };
    scenario.request.exec_path = "/no-such-program".into();
    assert_eq!(execute(&scenario.request), Outcome::Failure);
}

/// `execute` is total even when nothing about the request is usable:
/// without privileges the clone is refused; with them the child dies on
/// the missing input before ever posting its ready wake. Runs
/// everywhere, no environment needed.
#[test]
fn unusable_request_reports_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let request = ExecRequest {
        exec_path: "/no-such-program".into(),
        jail_dir: scratch.path().to_path_buf(),
        input_file: scratch.path().join("missing-input"),
        output_file: scratch.path().join("output"),
        whitelist: scratch.path().join("missing-whitelist"),
        uid: 65534,
        gid: 65534,
        limits: generous(),
        cgroups: crate::CgroupMounts {
            memory: scratch.path().join("missing-cgroup"),
            pids: scratch.path().join("missing-cgroup"),
            cpu: scratch.path().join("missing-cgroup"),
        },
    };
    assert_eq!(execute(&request), Outcome::Failure);
}
