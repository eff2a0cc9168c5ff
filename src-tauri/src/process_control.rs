#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;
use std::{
    io,
    process::{Child, Command, ExitStatus, Stdio},
    time::Duration,
};

const FORCE_STOP_WAIT_MIN_MS: u64 = 200;
#[cfg(target_os = "windows")]
const WINDOWS_GRACEFUL_STOP_NONZERO_WAIT_MS: u64 = 350;
#[cfg(target_os = "windows")]
const FORCE_STOP_WAIT_MAX_MS: u64 = 2_200;
#[cfg(not(target_os = "windows"))]
const FORCE_STOP_WAIT_MAX_MS: u64 = 1_500;
#[cfg(target_os = "windows")]
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(target_os = "windows")]
pub const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

#[cfg(target_os = "windows")]
const GRACEFUL_STOP_LABEL: &str = "taskkill graceful stop";
#[cfg(not(target_os = "windows"))]
const GRACEFUL_STOP_LABEL: &str = "kill -TERM";
#[cfg(target_os = "windows")]
const FORCE_STOP_LABEL: &str = "taskkill force stop";
#[cfg(not(target_os = "windows"))]
const FORCE_STOP_LABEL: &str = "kill -KILL";

fn run_stop_command<F>(
    pid: u32,
    label: &str,
    program: &str,
    args: &[&str],
    log: &F,
) -> io::Result<ExitStatus>
where
    F: Fn(&str) + ?Sized,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .stdin(Stdio::null());
    #[cfg(target_os = "windows")]
    {
        // Avoid flashing transient black console windows when invoking taskkill.
        command.creation_flags(CREATE_NO_WINDOW);
    }
    let status = command.status();

    match &status {
        Ok(exit_status) if exit_status.success() => {}
        Ok(exit_status) => log(&format!(
            "{label} returned non-zero: pid={pid}, status={exit_status:?}"
        )),
        Err(error) => log(&format!(
            "{label} failed to start: pid={pid}, error={error}"
        )),
    }

    status
}

fn compute_followup_wait(timeout: Duration, max_extra_wait: Duration) -> Duration {
    if timeout.is_zero() {
        Duration::ZERO
    } else {
        (timeout / 4)
            .max(Duration::from_millis(FORCE_STOP_WAIT_MIN_MS))
            .min(max_extra_wait)
    }
}

fn resolve_graceful_wait_timeout<F>(
    pid: u32,
    timeout: Duration,
    non_success_wait_cap: Duration,
    graceful_status: &io::Result<ExitStatus>,
    command_label: &str,
    log: &F,
) -> Duration
where
    F: Fn(&str) + ?Sized,
{
    match graceful_status {
        Ok(status) if status.success() => timeout,
        _ => {
            let shortened_wait = timeout.min(non_success_wait_cap);
            if shortened_wait < timeout {
                let outcome = match graceful_status {
                    Ok(status) => format!("status={status:?}"),
                    Err(error) => format!("error={error}"),
                };
                log(&format!(
                    "{command_label} not successful; shorten graceful wait: pid={pid}, {outcome}, requested_wait_ms={}, effective_wait_ms={}",
                    timeout.as_millis(),
                    shortened_wait.as_millis()
                ));
            }
            shortened_wait
        }
    }
}

#[cfg(target_os = "windows")]
fn graceful_failure_wait_cap(_grace: Duration) -> Duration {
    Duration::from_millis(WINDOWS_GRACEFUL_STOP_NONZERO_WAIT_MS)
}

// A failed `kill -TERM` usually means the process is already gone; the
// monitor thread will observe it, so the full grace period is kept.
#[cfg(not(target_os = "windows"))]
fn graceful_failure_wait_cap(grace: Duration) -> Duration {
    grace
}

#[cfg(target_os = "windows")]
fn send_graceful_signal<F>(pid: u32, log: &F) -> io::Result<ExitStatus>
where
    F: Fn(&str) + ?Sized,
{
    let pid_arg = pid.to_string();
    run_stop_command(
        pid,
        GRACEFUL_STOP_LABEL,
        "taskkill",
        &["/pid", &pid_arg, "/t"],
        log,
    )
}

#[cfg(not(target_os = "windows"))]
fn send_graceful_signal<F>(pid: u32, log: &F) -> io::Result<ExitStatus>
where
    F: Fn(&str) + ?Sized,
{
    let pid_arg = pid.to_string();
    run_stop_command(pid, GRACEFUL_STOP_LABEL, "kill", &["-TERM", &pid_arg], log)
}

#[cfg(target_os = "windows")]
fn send_force_signal<F>(pid: u32, log: &F) -> io::Result<ExitStatus>
where
    F: Fn(&str) + ?Sized,
{
    let pid_arg = pid.to_string();
    run_stop_command(
        pid,
        FORCE_STOP_LABEL,
        "taskkill",
        &["/pid", &pid_arg, "/t", "/f"],
        log,
    )
}

#[cfg(not(target_os = "windows"))]
fn send_force_signal<F>(pid: u32, log: &F) -> io::Result<ExitStatus>
where
    F: Fn(&str) + ?Sized,
{
    let pid_arg = pid.to_string();
    run_stop_command(pid, FORCE_STOP_LABEL, "kill", &["-KILL", &pid_arg], log)
}

/// Asks the process (tree, on Windows) to exit and returns how long to wait
/// before escalating to a forced kill.
pub fn request_graceful_stop<F>(pid: u32, grace: Duration, log: &F) -> Duration
where
    F: Fn(&str) + ?Sized,
{
    let status = send_graceful_signal(pid, log);
    resolve_graceful_wait_timeout(
        pid,
        grace,
        graceful_failure_wait_cap(grace),
        &status,
        GRACEFUL_STOP_LABEL,
        log,
    )
}

/// Kills the process tree, falling back to `Child::kill` when the OS command
/// cannot be run.
pub fn force_kill<F>(child: &mut Child, log: &F)
where
    F: Fn(&str) + ?Sized,
{
    let pid = child.id();
    let status = send_force_signal(pid, log);
    if matches!(&status, Ok(exit_status) if exit_status.success()) {
        return;
    }
    if let Err(error) = child.kill() {
        if error.kind() != io::ErrorKind::InvalidInput {
            log(&format!(
                "child kill fallback failed: pid={pid}, force={status:?}, error={error}"
            ));
        }
    }
}

/// Upper bound for waiting on a backend after `stop(grace)`: the grace period
/// plus time for a forced kill to take effect.
pub fn shutdown_wait_budget(grace: Duration) -> Duration {
    grace + compute_followup_wait(grace, Duration::from_millis(FORCE_STOP_WAIT_MAX_MS))
}
