//! Termination signals sent to the testgate binary reach the running test.
#![cfg(unix)]

use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

fn wait_for_file(path: &Path, limit: Duration) -> String {
    let start = Instant::now();
    loop {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if contents.ends_with('\n') {
                return contents.trim().to_string();
            }
        }
        assert!(start.elapsed() < limit, "{:?} never appeared", path);
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn wait_for_exit(child: &mut Child, limit: Duration) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if start.elapsed() > limit {
            child.kill().ok();
            panic!("testgate did not exit after SIGTERM");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Alive means present and not a zombie waiting to be reaped.
fn process_alive(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !matches!(
            stat.rsplit(')').next().map(str::trim_start),
            Some(rest) if rest.starts_with('Z')
        ),
        Err(_) => Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false),
    }
}

fn send_signal(signal: &str, pid: u32) {
    let status = Command::new("kill")
        .args([signal, &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

fn assert_child_reaped_after(signal: &str) {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("child.pid");
    std::fs::write(
        dir.path().join("hang.sh"),
        format!("echo $$ > {}\nexec sleep 30\n", pid_file.display()),
    )
    .unwrap();

    let mut testgate = Command::new(env!("CARGO_BIN_EXE_testgate"))
        .args(["burn-in", "-n", "1", "--command", "sh hang.sh"])
        .current_dir(dir.path())
        .env_remove("TESTGATE_CONFIG")
        .env_remove("BURN_IN_ITERATIONS")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let child_pid = wait_for_file(&pid_file, Duration::from_secs(10));
    std::thread::sleep(Duration::from_millis(200));
    send_signal(signal, testgate.id());

    let status = wait_for_exit(&mut testgate, Duration::from_secs(10));
    assert_eq!(status.code(), Some(1), "interrupted run exits 1");

    let start = Instant::now();
    while process_alive(&child_pid) {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "test process {child_pid} outlived testgate after {signal}"
        );
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_sigterm_kills_running_test_process() {
    assert_child_reaped_after("-TERM");
}

#[test]
fn test_sigint_kills_running_test_process() {
    assert_child_reaped_after("-INT");
}
