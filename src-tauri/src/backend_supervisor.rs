#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;
use std::{
    fmt,
    io::{BufRead, BufReader, Read},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{mpsc::Sender, Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};

use crate::{
    error::SupervisorError,
    launch_plan::LaunchPlan,
    logging::{DesktopLogCategory, LogSink},
    process_control,
};

/// Exit code recorded when the OS refuses to spawn the backend at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    NotStarted,
    Starting,
    Running,
    Exited(i32),
    Killed,
}

impl BackendState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited(_) | Self::Killed)
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Killed => f.write_str("killed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendExit {
    pub pid: u32,
    pub code: i32,
    pub state: BackendState,
    pub stop_requested: bool,
    pub force_killed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Spawned { pid: u32 },
    SpawnFailed { message: String },
    ForceKillSent { pid: u32 },
    Exited(BackendExit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    AlreadyPending,
    Stopping { pid: u32, grace: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub state: BackendState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Local>>,
}

struct ProcessSlot {
    state: BackendState,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<DateTime<Local>>,
    stop_requested: bool,
    force_killed: bool,
    generation: u64,
}

struct Shared {
    slot: Mutex<ProcessSlot>,
    changed: Condvar,
    events: Sender<SupervisorEvent>,
    log: LogSink,
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, ProcessSlot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                (self.log)(
                    DesktopLogCategory::Runtime,
                    "backend process slot lock poisoned, recovering",
                );
                poisoned.into_inner()
            }
        }
    }

    fn log(&self, category: DesktopLogCategory, message: &str) {
        (self.log)(category, message);
    }

    fn emit(&self, event: SupervisorEvent) {
        // The receiver only disappears while the shell is tearing down.
        let _ = self.events.send(event);
    }
}

/// Owns at most one backend child process and reports its lifecycle as
/// [`SupervisorEvent`]s.
pub struct BackendSupervisor {
    shared: Arc<Shared>,
}

impl BackendSupervisor {
    pub fn new(events: Sender<SupervisorEvent>, log: LogSink) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(ProcessSlot {
                    state: BackendState::NotStarted,
                    child: None,
                    pid: None,
                    started_at: None,
                    stop_requested: false,
                    force_killed: false,
                    generation: 0,
                }),
                changed: Condvar::new(),
                events,
                log,
            }),
        }
    }

    pub fn status(&self) -> BackendStatus {
        let slot = self.shared.lock_slot();
        BackendStatus {
            state: slot.state,
            pid: slot.pid,
            started_at: slot.started_at,
        }
    }

    /// Spawns the backend described by `plan`. Never waits for readiness.
    pub fn start(&self, plan: &LaunchPlan) -> Result<u32, SupervisorError> {
        let mut slot = self.shared.lock_slot();
        if slot.state.is_live() {
            self.shared.log(
                DesktopLogCategory::Backend,
                &format!(
                    "backend start rejected: already {} (pid {:?})",
                    slot.state, slot.pid
                ),
            );
            return Err(SupervisorError::AlreadyRunning {
                state: slot.state,
                pid: slot.pid,
            });
        }

        slot.generation += 1;
        let generation = slot.generation;
        slot.state = BackendState::Starting;
        slot.pid = None;
        slot.stop_requested = false;
        slot.force_killed = false;
        slot.started_at = Some(Local::now());

        let mut child = match backend_command(plan).spawn() {
            Ok(child) => child,
            Err(source) => {
                slot.state = BackendState::Exited(SPAWN_FAILURE_EXIT_CODE);
                self.shared.changed.notify_all();
                drop(slot);

                let error = SupervisorError::Spawn {
                    command: plan.debug_command(),
                    source,
                };
                let message = error.to_string();
                self.shared.log(DesktopLogCategory::Backend, &message);
                self.shared.emit(SupervisorEvent::SpawnFailed { message });
                return Err(error);
            }
        };

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        slot.child = Some(child);
        slot.pid = Some(pid);
        slot.state = BackendState::Running;
        self.shared.changed.notify_all();
        drop(slot);

        self.shared.log(
            DesktopLogCategory::Backend,
            &format!(
                "spawned backend: pid={pid}, cmd={:?}, cwd={}",
                plan.debug_command(),
                plan.cwd.display()
            ),
        );
        self.shared.emit(SupervisorEvent::Spawned { pid });

        if let Some(stdout) = stdout {
            spawn_output_reader(stdout, "stdout", Arc::clone(&self.shared.log));
        }
        if let Some(stderr) = stderr {
            spawn_output_reader(stderr, "stderr", Arc::clone(&self.shared.log));
        }

        let shared = Arc::clone(&self.shared);
        if let Err(error) = thread::Builder::new()
            .name("backend-exit-monitor".to_string())
            .spawn(move || monitor_exit(&shared, generation, pid))
        {
            self.shared.log(
                DesktopLogCategory::Backend,
                &format!("failed to start backend exit monitor: pid={pid}, error={error}"),
            );
        }

        Ok(pid)
    }

    /// Requests a graceful stop and arms a forced kill after `grace`.
    ///
    /// Returns immediately. Calling it again while a stop is pending does not
    /// restart the grace timer.
    pub fn stop(&self, grace: Duration) -> StopOutcome {
        let mut slot = self.shared.lock_slot();
        if !slot.state.is_live() {
            return StopOutcome::NotRunning;
        }
        if slot.stop_requested {
            return StopOutcome::AlreadyPending;
        }
        let Some(pid) = slot.pid else {
            return StopOutcome::NotRunning;
        };
        slot.stop_requested = true;
        let generation = slot.generation;
        drop(slot);

        self.shared.log(
            DesktopLogCategory::Shutdown,
            &format!(
                "stopping backend: pid={pid}, grace_ms={}",
                grace.as_millis()
            ),
        );

        let shared = Arc::clone(&self.shared);
        if let Err(error) = thread::Builder::new()
            .name("backend-stop-escalation".to_string())
            .spawn(move || escalate_stop(&shared, generation, pid, grace))
        {
            self.shared.log(
                DesktopLogCategory::Shutdown,
                &format!("failed to start stop escalation: pid={pid}, error={error}"),
            );
        }

        StopOutcome::Stopping { pid, grace }
    }

    pub fn exit_waiter(&self) -> BackendExitWaiter {
        BackendExitWaiter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Blocks until no backend process is live or `timeout` elapses.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        self.exit_waiter().wait(timeout)
    }
}

impl Drop for BackendSupervisor {
    fn drop(&mut self) {
        let mut slot = self.shared.lock_slot();
        if !slot.state.is_live() {
            return;
        }
        slot.stop_requested = true;
        slot.force_killed = true;
        let log = |message: &str| self.shared.log(DesktopLogCategory::Shutdown, message);
        if let Some(child) = slot.child.as_mut() {
            log(&format!(
                "supervisor dropped with live backend, killing pid={}",
                child.id()
            ));
            process_control::force_kill(child, &log);
        }
    }
}

/// Handle that can wait for backend termination without borrowing the
/// supervisor, so the wait can run off the UI thread.
#[derive(Clone)]
pub struct BackendExitWaiter {
    shared: Arc<Shared>,
}

impl BackendExitWaiter {
    pub fn wait(&self, timeout: Duration) -> bool {
        let slot = self.shared.lock_slot();
        let (slot, _) = self
            .shared
            .changed
            .wait_timeout_while(slot, timeout, |slot| slot.state.is_live())
            .unwrap_or_else(PoisonError::into_inner);
        !slot.state.is_live()
    }
}

impl fmt::Debug for BackendExitWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendExitWaiter").finish_non_exhaustive()
    }
}

fn backend_command(plan: &LaunchPlan) -> Command {
    let mut command = Command::new(&plan.program);
    command
        .args(plan.args())
        .current_dir(&plan.cwd)
        .env_clear()
        .envs(plan.env.iter())
        .env("PYTHONUNBUFFERED", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(target_os = "windows")]
    {
        // Keep packaged backend fully backgrounded; keep console visible for local/dev debugging.
        if plan.packaged_mode {
            command.creation_flags(
                process_control::CREATE_NO_WINDOW | process_control::CREATE_NEW_PROCESS_GROUP,
            );
        }
    }
    command
}

fn spawn_output_reader<R>(stream: R, label: &'static str, log: LogSink)
where
    R: Read + Send + 'static,
{
    let result = thread::Builder::new()
        .name(format!("backend-{label}"))
        .spawn({
            let log = Arc::clone(&log);
            move || {
                let mut reader = BufReader::new(stream);
                let mut buffer = Vec::new();
                loop {
                    buffer.clear();
                    match reader.read_until(b'\n', &mut buffer) {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buffer);
                            let line = line.trim_end_matches(['\r', '\n']);
                            log(DesktopLogCategory::Backend, &format!("{label} | {line}"));
                        }
                        Err(error) => {
                            log(
                                DesktopLogCategory::Backend,
                                &format!("backend {label} read failed: {error}"),
                            );
                            break;
                        }
                    }
                }
            }
        });
    if let Err(error) = result {
        log(
            DesktopLogCategory::Backend,
            &format!("failed to start backend {label} reader: {error}"),
        );
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    SPAWN_FAILURE_EXIT_CODE
}

fn monitor_exit(shared: &Shared, generation: u64, pid: u32) {
    let mut reported_wait_error = false;
    loop {
        let mut slot = shared.lock_slot();
        if slot.generation != generation {
            return;
        }
        let Some(child) = slot.child.as_mut() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                let code = exit_code(status);
                let state = if slot.force_killed {
                    BackendState::Killed
                } else {
                    BackendState::Exited(code)
                };
                slot.state = state;
                slot.child = None;
                let exit = BackendExit {
                    pid,
                    code,
                    state,
                    stop_requested: slot.stop_requested,
                    force_killed: slot.force_killed,
                };
                let uptime = slot
                    .started_at
                    .map(|started| (Local::now() - started).num_milliseconds())
                    .unwrap_or_default();
                shared.changed.notify_all();
                drop(slot);

                shared.log(
                    DesktopLogCategory::Backend,
                    &format!(
                        "backend exited: pid={pid}, state={state}, stop_requested={}, force_killed={}, uptime_ms={uptime}",
                        exit.stop_requested, exit.force_killed
                    ),
                );
                shared.emit(SupervisorEvent::Exited(exit));
                return;
            }
            Ok(None) => drop(slot),
            Err(error) => {
                drop(slot);
                if !reported_wait_error {
                    reported_wait_error = true;
                    shared.log(
                        DesktopLogCategory::Backend,
                        &format!("failed to poll backend process status: pid={pid}, error={error}"),
                    );
                }
            }
        }

        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

fn escalate_stop(shared: &Shared, generation: u64, pid: u32, grace: Duration) {
    let log = |message: &str| shared.log(DesktopLogCategory::Shutdown, message);
    let wait = process_control::request_graceful_stop(pid, grace, &log);
    let requested_at = Instant::now();

    let slot = shared.lock_slot();
    let (mut slot, _) = shared
        .changed
        .wait_timeout_while(slot, wait, |slot| {
            slot.generation == generation && slot.state.is_live()
        })
        .unwrap_or_else(PoisonError::into_inner);
    if slot.generation != generation || !slot.state.is_live() {
        return;
    }

    slot.force_killed = true;
    if let Some(child) = slot.child.as_mut() {
        log(&format!(
            "backend did not exit within grace period, force-killing: pid={pid}, waited_ms={}",
            requested_at.elapsed().as_millis()
        ));
        process_control::force_kill(child, &log);
        shared.emit(SupervisorEvent::ForceKillSent { pid });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backend_env::EnvironmentOverlay;
    use std::{
        env,
        path::PathBuf,
        sync::mpsc::{self, Receiver},
    };

    const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

    fn capture_log() -> (LogSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        let sink: LogSink = Arc::new(move |category, message| {
            sink_lines
                .lock()
                .expect("lock captured log")
                .push(format!("[{category}] {message}"));
        });
        (sink, lines)
    }

    fn supervisor() -> (
        BackendSupervisor,
        Receiver<SupervisorEvent>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let (tx, rx) = mpsc::channel();
        let (sink, lines) = capture_log();
        (BackendSupervisor::new(tx, sink), rx, lines)
    }

    fn shell_plan(script: &str) -> LaunchPlan {
        LaunchPlan {
            program: "sh".into(),
            prefix_args: vec!["-c".to_string(), script.to_string()],
            entry_point: PathBuf::from("zvd-test-backend"),
            cwd: env::temp_dir(),
            env: EnvironmentOverlay::inherit(env::vars_os()),
            packaged_mode: false,
        }
    }

    fn wait_for_line(lines: &Mutex<Vec<String>>, needle: &str) {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        while Instant::now() < deadline {
            if lines
                .lock()
                .expect("lock captured log")
                .iter()
                .any(|line| line.contains(needle))
            {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("log line containing '{needle}' never appeared");
    }

    fn next_exit(rx: &Receiver<SupervisorEvent>) -> (BackendExit, Vec<SupervisorEvent>) {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv_timeout(EVENT_TIMEOUT).expect("supervisor event");
            if let SupervisorEvent::Exited(exit) = &event {
                return (exit.clone(), seen);
            }
            seen.push(event);
        }
    }

    #[test]
    fn term_ignoring_backend_is_force_killed_after_grace() {
        let (supervisor, rx, lines) = supervisor();
        let pid = supervisor
            .start(&shell_plan("trap '' TERM; echo ready; exec sleep 30"))
            .expect("start backend");
        wait_for_line(&lines, "stdout | ready");

        let grace = Duration::from_millis(300);
        let requested = Instant::now();
        assert_eq!(supervisor.stop(grace), StopOutcome::Stopping { pid, grace });

        let (exit, seen) = next_exit(&rx);
        assert!(requested.elapsed() >= grace);
        assert!(requested.elapsed() < grace + Duration::from_secs(3));
        assert_eq!(exit.state, BackendState::Killed);
        assert!(exit.force_killed);
        assert!(exit.stop_requested);
        assert!(seen.contains(&SupervisorEvent::ForceKillSent { pid }));
        assert_eq!(supervisor.status().state, BackendState::Killed);
    }

    #[test]
    fn cooperative_backend_exits_on_term_without_force_kill() {
        let (supervisor, rx, lines) = supervisor();
        let pid = supervisor
            .start(&shell_plan("echo ready; exec sleep 30"))
            .expect("start backend");
        wait_for_line(&lines, "stdout | ready");

        supervisor.stop(Duration::from_secs(2));
        let (exit, seen) = next_exit(&rx);

        assert_eq!(exit.pid, pid);
        assert_eq!(exit.state, BackendState::Exited(143));
        assert!(!exit.force_killed);
        assert!(!seen
            .iter()
            .any(|event| matches!(event, SupervisorEvent::ForceKillSent { .. })));
        assert!(supervisor.wait_for_exit(Duration::from_millis(100)));
    }

    #[test]
    fn second_start_is_rejected_and_first_process_survives() {
        let (supervisor, rx, _lines) = supervisor();
        let pid = supervisor
            .start(&shell_plan("exec sleep 30"))
            .expect("start backend");

        let error = supervisor
            .start(&shell_plan("exec sleep 30"))
            .expect_err("second start must be rejected");
        assert!(matches!(
            error,
            SupervisorError::AlreadyRunning {
                state: BackendState::Running,
                pid: Some(existing)
            } if existing == pid
        ));
        let status = supervisor.status();
        assert_eq!(status.state, BackendState::Running);
        assert_eq!(status.pid, Some(pid));
        assert!(status.started_at.is_some());

        supervisor.stop(Duration::from_millis(500));
        let (exit, _) = next_exit(&rx);
        assert_eq!(exit.pid, pid);
    }

    #[test]
    fn stop_is_idempotent() {
        let (supervisor, rx, _lines) = supervisor();
        assert_eq!(
            supervisor.stop(Duration::from_millis(500)),
            StopOutcome::NotRunning
        );

        supervisor
            .start(&shell_plan("exec sleep 30"))
            .expect("start backend");
        assert!(matches!(
            supervisor.stop(Duration::from_millis(500)),
            StopOutcome::Stopping { .. }
        ));
        assert_eq!(
            supervisor.stop(Duration::from_millis(500)),
            StopOutcome::AlreadyPending
        );

        next_exit(&rx);
        assert_eq!(
            supervisor.stop(Duration::from_millis(500)),
            StopOutcome::NotRunning
        );
    }

    #[test]
    fn unexpected_termination_is_reported_without_stop_request() {
        let (supervisor, rx, _lines) = supervisor();
        let pid = supervisor
            .start(&shell_plan("exec sleep 30"))
            .expect("start backend");

        let status = Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .status()
            .expect("run kill");
        assert!(status.success());

        let (exit, _) = next_exit(&rx);
        assert_eq!(exit.state, BackendState::Exited(137));
        assert!(!exit.stop_requested);
        assert!(!exit.force_killed);
    }

    #[test]
    fn spawn_failure_records_synthetic_exit_code() {
        let (supervisor, rx, _lines) = supervisor();
        let mut plan = shell_plan("");
        plan.program = "/nonexistent/zvd-python".into();

        let error = supervisor.start(&plan).expect_err("spawn must fail");
        assert!(matches!(error, SupervisorError::Spawn { .. }));
        assert_eq!(
            supervisor.status().state,
            BackendState::Exited(SPAWN_FAILURE_EXIT_CODE)
        );
        match rx.recv_timeout(EVENT_TIMEOUT).expect("spawn failure event") {
            SupervisorEvent::SpawnFailed { message } => {
                assert!(message.contains("/nonexistent/zvd-python"))
            }
            other => panic!("unexpected event: {other:?}"),
        }

        supervisor
            .start(&shell_plan("exit 0"))
            .expect("start after terminal state");
        let (exit, _) = next_exit(&rx);
        assert_eq!(exit.state, BackendState::Exited(0));
    }

    #[test]
    fn backend_output_is_forwarded_line_by_line() {
        let (supervisor, rx, lines) = supervisor();
        supervisor
            .start(&shell_plan("echo first; echo second; echo oops 1>&2"))
            .expect("start backend");
        next_exit(&rx);

        wait_for_line(&lines, "[backend] stdout | first");
        wait_for_line(&lines, "[backend] stdout | second");
        wait_for_line(&lines, "[backend] stderr | oops");
    }

    #[test]
    fn exit_waiter_times_out_while_backend_runs() {
        let (supervisor, rx, _lines) = supervisor();
        supervisor
            .start(&shell_plan("exec sleep 30"))
            .expect("start backend");

        let waiter = supervisor.exit_waiter();
        assert!(!waiter.wait(Duration::from_millis(100)));

        supervisor.stop(Duration::from_millis(500));
        assert!(waiter.wait(EVENT_TIMEOUT));
        next_exit(&rx);
    }
}
