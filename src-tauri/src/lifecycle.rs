use std::{env, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    backend_supervisor::{
        BackendExit, BackendExitWaiter, BackendState, BackendSupervisor, StopOutcome,
        SupervisorEvent,
    },
    config::ShellConfig,
    deployment::{DeploymentMode, Platform},
    error::ShellError,
    launch_plan,
    logging::{DesktopLogCategory, LogSink},
    path_resolver::{FsProbe, ResourceKind, ShellLayout},
    process_control,
    shutdown_state::ShutdownStateMachine,
    ui_loader::{self, LoadFailure, LoadPlan, LoadTarget, ReloadBudget},
};

pub const BACKEND_ERROR_EVENT: &str = "backend-error";
pub const LOAD_ERROR_EVENT: &str = "load-error";

/// Fire-and-forget message for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiNotice {
    #[serde(skip)]
    pub event: &'static str,
    pub kind: &'static str,
    pub message: String,
}

impl UiNotice {
    fn backend_error(kind: &'static str, message: String) -> Self {
        Self {
            event: BACKEND_ERROR_EVENT,
            kind,
            message,
        }
    }

    fn load_error(message: String) -> Self {
        Self {
            event: LOAD_ERROR_EVENT,
            kind: "persistent",
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledTask {
    CreateSurface,
    ReloadSurface(LoadTarget),
}

/// Everything the controller reacts to, whatever its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellSignal {
    Ready,
    AllWindowsClosed,
    BeforeQuit,
    Activate,
    SecondInstance,
    UncaughtError(String),
    Backend(SupervisorEvent),
    Scheduled(ScheduledTask),
    ShutdownComplete { backend_stopped: bool },
    ExitFallback,
}

impl ShellSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::AllWindowsClosed => "all-windows-closed",
            Self::BeforeQuit => "before-quit",
            Self::Activate => "activate",
            Self::SecondInstance => "second-instance",
            Self::UncaughtError(_) => "uncaught-error",
            Self::Backend(_) => "backend",
            Self::Scheduled(_) => "scheduled",
            Self::ShutdownComplete { .. } => "shutdown-complete",
            Self::ExitFallback => "exit-fallback",
        }
    }
}

/// Window-system side of the shell.
pub trait ShellHost {
    fn has_surface(&self) -> bool;
    fn create_surface(&mut self, target: &LoadTarget) -> Result<(), String>;
    fn navigate_surface(&mut self, target: &LoadTarget) -> Result<(), String>;
    fn reload_surface(&mut self) -> Result<(), String>;
    fn focus_surface(&mut self) -> Result<(), String>;
    fn notify_ui(&mut self, notice: &UiNotice) -> Result<(), String>;
    /// Delivers `ShellSignal::Scheduled(task)` after `delay`.
    fn schedule(&mut self, delay: Duration, task: ScheduledTask);
    /// Waits off the event loop and delivers `ShellSignal::ShutdownComplete`.
    fn await_backend_exit(&mut self, waiter: BackendExitWaiter, budget: Duration);
    fn exit(&mut self, code: i32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClassification {
    ExpectedExit,
    RuntimeCrash,
    CleanExit,
}

pub fn classify_exit(exit: &BackendExit, quitting: bool) -> ExitClassification {
    if quitting || exit.stop_requested {
        ExitClassification::ExpectedExit
    } else if exit.code != 0 || exit.state == BackendState::Killed {
        ExitClassification::RuntimeCrash
    } else {
        ExitClassification::CleanExit
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellContext {
    pub mode: DeploymentMode,
    pub platform: Platform,
    pub layout: ShellLayout,
}

pub type TargetProbe = fn(&LoadTarget, Duration) -> Result<(), LoadFailure>;

pub struct LifecycleController<H: ShellHost> {
    host: H,
    supervisor: BackendSupervisor,
    shutdown: ShutdownStateMachine,
    context: ShellContext,
    config: ShellConfig,
    reload_budget: ReloadBudget,
    startup_failure: Option<LoadTarget>,
    pending_notices: Vec<UiNotice>,
    exit_scheduled: bool,
    target_probe: TargetProbe,
    log: LogSink,
}

impl<H: ShellHost> LifecycleController<H> {
    pub fn new(
        host: H,
        supervisor: BackendSupervisor,
        context: ShellContext,
        config: ShellConfig,
        log: LogSink,
    ) -> Self {
        Self {
            host,
            supervisor,
            shutdown: ShutdownStateMachine::default(),
            context,
            config,
            reload_budget: ReloadBudget::once(),
            startup_failure: None,
            pending_notices: Vec::new(),
            exit_scheduled: false,
            target_probe: ui_loader::probe_target,
            log,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.shutdown.is_terminated()
    }

    pub fn handle(&mut self, signal: ShellSignal) {
        match signal {
            ShellSignal::Ready => self.on_ready(),
            ShellSignal::AllWindowsClosed => self.on_all_windows_closed(),
            ShellSignal::BeforeQuit => self.begin_shutdown("quit requested"),
            ShellSignal::Activate | ShellSignal::SecondInstance => self.on_activate(),
            ShellSignal::UncaughtError(message) => self.log(
                DesktopLogCategory::Runtime,
                &format!("uncaught error: {message}"),
            ),
            ShellSignal::Backend(event) => self.on_backend_event(event),
            ShellSignal::Scheduled(ScheduledTask::CreateSurface) => self.on_create_surface(),
            ShellSignal::Scheduled(ScheduledTask::ReloadSurface(target)) => {
                self.on_reload_surface(target)
            }
            ShellSignal::ShutdownComplete { backend_stopped } => {
                self.finish_shutdown(backend_stopped)
            }
            ShellSignal::ExitFallback => self.on_exit_fallback(),
        }
    }

    fn log(&self, category: DesktopLogCategory, message: &str) {
        (self.log)(category, message);
    }

    fn on_ready(&mut self) {
        let ShellContext {
            mode,
            platform,
            layout,
        } = &self.context;
        self.log(
            DesktopLogCategory::Startup,
            &format!(
                "shell starting: mode={mode}, platform={platform}, source_root={}, resources={}",
                layout.source_root.display(),
                layout.resources_dir.display()
            ),
        );

        let log = Arc::clone(&self.log);
        let plan = launch_plan::build_launch_plan(
            &FsProbe,
            *mode,
            *platform,
            layout,
            env::vars_os(),
            self.config.interpreter_override.as_deref(),
            |message| log(DesktopLogCategory::Startup, &message),
        );

        match plan {
            Ok(plan) => {
                // Spawn failures come back as `SupervisorEvent::SpawnFailed`.
                if let Err(error) = self.supervisor.start(&plan) {
                    self.log(
                        DesktopLogCategory::Startup,
                        &format!("backend start failed: {error}"),
                    );
                }
            }
            Err(ShellError::Resolve(error)) => {
                self.log(
                    DesktopLogCategory::Startup,
                    &format!("backend will not be started: {error}"),
                );
                self.startup_failure = Some(LoadTarget::Diagnostic(
                    ui_loader::render_missing_resource_page(
                        ResourceKind::BackendEntry,
                        error.checked(),
                    ),
                ));
            }
            Err(error) => {
                self.log(
                    DesktopLogCategory::Startup,
                    &format!("backend will not be started: {error}"),
                );
                self.queue_notice(UiNotice::backend_error("launch-failed", error.to_string()));
            }
        }

        self.host
            .schedule(self.config.settle_delay, ScheduledTask::CreateSurface);
    }

    fn on_create_surface(&mut self) {
        if self.shutdown.is_quitting() {
            self.log(
                DesktopLogCategory::Runtime,
                "surface creation skipped: shell is shutting down",
            );
            return;
        }
        if self.host.has_surface() {
            if let Err(error) = self.host.focus_surface() {
                self.log(
                    DesktopLogCategory::Runtime,
                    &format!("failed to focus existing surface: {error}"),
                );
            }
            return;
        }

        let target = match &self.startup_failure {
            Some(page) => page.clone(),
            None => {
                let log = Arc::clone(&self.log);
                ui_loader::resolve_load_target(
                    &FsProbe,
                    self.context.mode,
                    &self.context.layout,
                    &self.config.dev_server_url,
                    |message| log(DesktopLogCategory::Startup, &message),
                )
            }
        };

        self.reload_budget = ReloadBudget::once();
        let plan = if matches!(target, LoadTarget::Diagnostic(_)) {
            LoadPlan::Load(target)
        } else {
            let outcome = (self.target_probe)(&target, ui_loader::PROBE_TIMEOUT);
            ui_loader::plan_initial_load(target, outcome, &mut self.reload_budget)
        };

        match plan {
            LoadPlan::Load(target) => {
                self.create_surface(&target);
            }
            LoadPlan::LoadWithRetry(target) => {
                self.log(
                    DesktopLogCategory::Runtime,
                    &format!(
                        "{} not reachable yet, loading anyway and reloading in {}ms",
                        target.describe(),
                        self.config.reload_delay.as_millis()
                    ),
                );
                if self.create_surface(&target) {
                    self.host
                        .schedule(self.config.reload_delay, ScheduledTask::ReloadSurface(target));
                }
            }
            LoadPlan::ErrorPage { page, failure } => {
                self.log(
                    DesktopLogCategory::Runtime,
                    &format!("UI load failed: {failure}"),
                );
                self.create_surface(&page);
            }
        }
    }

    fn create_surface(&mut self, target: &LoadTarget) -> bool {
        match self.host.create_surface(target) {
            Ok(()) => {
                self.log(
                    DesktopLogCategory::Runtime,
                    &format!("main window created: {}", target.describe()),
                );
                for notice in std::mem::take(&mut self.pending_notices) {
                    self.deliver_notice(&notice);
                }
                true
            }
            Err(error) => {
                self.log(
                    DesktopLogCategory::Runtime,
                    &format!("failed to create main window: {error}"),
                );
                false
            }
        }
    }

    fn on_reload_surface(&mut self, target: LoadTarget) {
        if self.shutdown.is_quitting() || !self.host.has_surface() {
            return;
        }

        match (self.target_probe)(&target, ui_loader::PROBE_TIMEOUT) {
            Ok(()) => {
                self.log(
                    DesktopLogCategory::Runtime,
                    &format!("reloading main window: {}", target.describe()),
                );
                if let Err(error) = self.host.reload_surface() {
                    self.log(
                        DesktopLogCategory::Runtime,
                        &format!("failed to reload main window: {error}"),
                    );
                }
            }
            Err(failure) => {
                let message = format!("{} still unreachable after retry: {failure}", target.describe());
                self.log(DesktopLogCategory::Runtime, &message);
                self.deliver_notice(&UiNotice::load_error(message));
                let page = LoadTarget::Diagnostic(ui_loader::render_load_error_page(&target, &failure));
                if let Err(error) = self.host.navigate_surface(&page) {
                    self.log(
                        DesktopLogCategory::Runtime,
                        &format!("failed to show load error page: {error}"),
                    );
                }
            }
        }
    }

    fn on_activate(&mut self) {
        if self.shutdown.is_quitting() {
            return;
        }
        if self.host.has_surface() {
            if let Err(error) = self.host.focus_surface() {
                self.log(
                    DesktopLogCategory::Runtime,
                    &format!("failed to focus main window: {error}"),
                );
            }
            return;
        }
        self.log(DesktopLogCategory::Runtime, "recreating main window");
        self.on_create_surface();
    }

    fn on_backend_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Spawned { pid } => self.log(
                DesktopLogCategory::Startup,
                &format!(
                    "backend running: pid={pid}, ui in {}ms",
                    self.config.settle_delay.as_millis()
                ),
            ),
            SupervisorEvent::SpawnFailed { message } => {
                self.queue_notice(UiNotice::backend_error("spawn-failed", message));
            }
            SupervisorEvent::ForceKillSent { pid } => self.log(
                DesktopLogCategory::Shutdown,
                &format!("backend force kill sent: pid={pid}"),
            ),
            SupervisorEvent::Exited(exit) => {
                match classify_exit(&exit, self.shutdown.is_quitting()) {
                    ExitClassification::ExpectedExit => self.log(
                        DesktopLogCategory::Shutdown,
                        &format!(
                            "backend stopped: pid={}, state={}, force_killed={}",
                            exit.pid, exit.state, exit.force_killed
                        ),
                    ),
                    ExitClassification::RuntimeCrash => {
                        let message = format!(
                            "Backend exited unexpectedly ({}). Restart the application to continue.",
                            exit.state
                        );
                        self.log(
                            DesktopLogCategory::Backend,
                            &format!("backend crashed: pid={}, code={}", exit.pid, exit.code),
                        );
                        self.queue_notice(UiNotice::backend_error("crashed", message));
                    }
                    ExitClassification::CleanExit => self.log(
                        DesktopLogCategory::Backend,
                        &format!("backend exited cleanly while shell is running: pid={}", exit.pid),
                    ),
                }
            }
        }
    }

    fn queue_notice(&mut self, notice: UiNotice) {
        if self.host.has_surface() {
            self.deliver_notice(&notice);
        } else {
            self.pending_notices.push(notice);
        }
    }

    fn deliver_notice(&mut self, notice: &UiNotice) {
        if let Err(error) = self.host.notify_ui(notice) {
            self.log(
                DesktopLogCategory::Runtime,
                &format!("failed to emit {}: {error}", notice.event),
            );
        }
    }

    fn on_all_windows_closed(&mut self) {
        if !self.context.platform.quits_when_last_window_closed() {
            self.log(
                DesktopLogCategory::Runtime,
                "all windows closed, staying resident",
            );
            return;
        }
        self.begin_shutdown("all windows closed");
    }

    fn begin_shutdown(&mut self, reason: &str) {
        if self.shutdown.is_terminated() {
            return;
        }
        if self.shutdown.mark_quitting() {
            self.log(
                DesktopLogCategory::Shutdown,
                &format!("{reason}, shutting down"),
            );
        }

        let grace = self.config.stop_grace;
        let outcome = self.supervisor.stop(grace);
        if self.exit_scheduled {
            return;
        }
        match outcome {
            StopOutcome::NotRunning => self.finish_shutdown(true),
            StopOutcome::AlreadyPending | StopOutcome::Stopping { .. } => {
                if let StopOutcome::Stopping { pid, grace } = outcome {
                    self.log(
                        DesktopLogCategory::Shutdown,
                        &format!(
                            "waiting for backend pid={pid}, force kill after {}ms",
                            grace.as_millis()
                        ),
                    );
                }
                self.shutdown.mark_force_kill_scheduled();
                self.exit_scheduled = true;
                self.host.await_backend_exit(
                    self.supervisor.exit_waiter(),
                    process_control::shutdown_wait_budget(grace),
                );
            }
        }
    }

    fn finish_shutdown(&mut self, backend_stopped: bool) {
        if self.shutdown.is_terminated() {
            return;
        }
        if !backend_stopped {
            let status = self.supervisor.status();
            self.log(
                DesktopLogCategory::Shutdown,
                &format!(
                    "backend still {} after shutdown budget, exiting anyway: pid={:?}, started_at={}",
                    status.state,
                    status.pid,
                    status
                        .started_at
                        .map(|started| started.to_rfc3339())
                        .unwrap_or_default()
                ),
            );
        }
        self.shutdown.mark_terminated();
        self.log(DesktopLogCategory::Shutdown, "shutdown complete, exiting shell");
        self.host.exit(0);
    }

    fn on_exit_fallback(&mut self) {
        if self.shutdown.is_terminated() {
            return;
        }
        self.log(
            DesktopLogCategory::Shutdown,
            "exit event triggered fallback backend cleanup",
        );
        self.shutdown.mark_quitting();
        let grace = self.config.stop_grace;
        if !matches!(self.supervisor.stop(grace), StopOutcome::NotRunning) {
            self.supervisor
                .wait_for_exit(process_control::shutdown_wait_budget(grace));
        }
        let state = self.supervisor.status().state;
        if !state.is_terminal() && state != BackendState::NotStarted {
            self.log(
                DesktopLogCategory::Shutdown,
                &format!("backend fallback stop timed out: backend {state}"),
            );
        }
        self.shutdown.mark_terminated();
    }

    #[cfg(test)]
    fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[cfg(test)]
    fn shutdown_state(&self) -> crate::shutdown_state::ShutdownState {
        self.shutdown.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shutdown_state::ShutdownState, ui_loader::LoadFailureClass};
    use std::{
        fs,
        path::{Path, PathBuf},
        sync::{
            mpsc::{self, Receiver},
            Mutex,
        },
    };

    #[derive(Default)]
    struct FakeHost {
        surface: Option<LoadTarget>,
        created: Vec<LoadTarget>,
        navigated: Vec<LoadTarget>,
        reloads: usize,
        focuses: usize,
        notices: Vec<UiNotice>,
        scheduled: Vec<(Duration, ScheduledTask)>,
        awaiting: Vec<(BackendExitWaiter, Duration)>,
        exits: Vec<i32>,
    }

    impl ShellHost for FakeHost {
        fn has_surface(&self) -> bool {
            self.surface.is_some()
        }

        fn create_surface(&mut self, target: &LoadTarget) -> Result<(), String> {
            self.surface = Some(target.clone());
            self.created.push(target.clone());
            Ok(())
        }

        fn navigate_surface(&mut self, target: &LoadTarget) -> Result<(), String> {
            self.surface = Some(target.clone());
            self.navigated.push(target.clone());
            Ok(())
        }

        fn reload_surface(&mut self) -> Result<(), String> {
            self.reloads += 1;
            Ok(())
        }

        fn focus_surface(&mut self) -> Result<(), String> {
            self.focuses += 1;
            Ok(())
        }

        fn notify_ui(&mut self, notice: &UiNotice) -> Result<(), String> {
            self.notices.push(notice.clone());
            Ok(())
        }

        fn schedule(&mut self, delay: Duration, task: ScheduledTask) {
            self.scheduled.push((delay, task));
        }

        fn await_backend_exit(&mut self, waiter: BackendExitWaiter, budget: Duration) {
            self.awaiting.push((waiter, budget));
        }

        fn exit(&mut self, code: i32) {
            self.exits.push(code);
        }
    }

    struct Harness {
        controller: LifecycleController<FakeHost>,
        events: Receiver<SupervisorEvent>,
        logs: Arc<Mutex<Vec<String>>>,
        _dirs: Vec<tempfile::TempDir>,
    }

    impl Harness {
        fn new(mode: DeploymentMode, platform: Platform, config: ShellConfig) -> Self {
            let source = tempfile::tempdir().expect("create source dir");
            let resources = tempfile::tempdir().expect("create resources dir");
            let layout = ShellLayout {
                source_root: source.path().to_path_buf(),
                resources_dir: resources.path().to_path_buf(),
                app_root: resources.path().join("app"),
            };

            let logs = Arc::new(Mutex::new(Vec::new()));
            let sink_logs = Arc::clone(&logs);
            let sink: LogSink = Arc::new(move |category: DesktopLogCategory, message: &str| {
                sink_logs
                    .lock()
                    .expect("lock logs")
                    .push(format!("[{category}] {message}"));
            });
            let (tx, rx) = mpsc::channel();
            let supervisor = BackendSupervisor::new(tx, Arc::clone(&sink));
            let mut controller = LifecycleController::new(
                FakeHost::default(),
                supervisor,
                ShellContext {
                    mode,
                    platform,
                    layout,
                },
                config,
                sink,
            );
            controller.target_probe = |_, _| Ok(());

            Self {
                controller,
                events: rx,
                logs,
                _dirs: vec![source, resources],
            }
        }

        fn layout(&self) -> &ShellLayout {
            &self.controller.context.layout
        }

        fn write_backend(&self, root: &Path, script: &str) -> PathBuf {
            let entry = root.join("backend").join("app.py");
            fs::create_dir_all(entry.parent().expect("entry parent")).expect("create backend dir");
            fs::write(&entry, script).expect("write backend script");
            entry
        }

        fn host(&mut self) -> &mut FakeHost {
            self.controller.host_mut()
        }

        fn drain_backend_events(&mut self, until_exit: bool) {
            loop {
                let event = self
                    .events
                    .recv_timeout(Duration::from_secs(5))
                    .expect("supervisor event");
                let is_exit = matches!(event, SupervisorEvent::Exited(_));
                self.controller.handle(ShellSignal::Backend(event));
                if !until_exit || is_exit {
                    return;
                }
            }
        }

        fn logged(&self, needle: &str) -> bool {
            self.logs
                .lock()
                .expect("lock logs")
                .iter()
                .any(|line| line.contains(needle))
        }
    }

    fn test_config() -> ShellConfig {
        ShellConfig {
            stop_grace: Duration::from_millis(500),
            interpreter_override: Some("sh".to_string()),
            ..ShellConfig::default()
        }
    }

    fn exit_with(code: i32, state: BackendState, stop_requested: bool) -> BackendExit {
        BackendExit {
            pid: 4242,
            code,
            state,
            stop_requested,
            force_killed: state == BackendState::Killed,
        }
    }

    #[test]
    fn exit_classification_separates_crashes_from_expected_exits() {
        let crash = exit_with(1, BackendState::Exited(1), false);
        assert_eq!(classify_exit(&crash, false), ExitClassification::RuntimeCrash);
        assert_eq!(classify_exit(&crash, true), ExitClassification::ExpectedExit);

        let stopped = exit_with(143, BackendState::Exited(143), true);
        assert_eq!(classify_exit(&stopped, false), ExitClassification::ExpectedExit);

        let killed = exit_with(137, BackendState::Killed, true);
        assert_eq!(classify_exit(&killed, false), ExitClassification::ExpectedExit);

        let clean = exit_with(0, BackendState::Exited(0), false);
        assert_eq!(classify_exit(&clean, false), ExitClassification::CleanExit);
    }

    #[cfg(unix)]
    #[test]
    fn development_session_starts_backend_loads_dev_server_and_shuts_down() {
        let mut harness = Harness::new(DeploymentMode::Development, Platform::Linux, test_config());
        let source_root = harness.layout().source_root.clone();
        harness.write_backend(&source_root, "echo backend-up; exec sleep 30");

        harness.controller.handle(ShellSignal::Ready);
        harness.drain_backend_events(false);
        assert_eq!(
            harness.controller.supervisor.status().state,
            BackendState::Running
        );
        assert_eq!(
            harness.host().scheduled,
            vec![(Duration::from_millis(2_000), ScheduledTask::CreateSurface)]
        );

        harness
            .controller
            .handle(ShellSignal::Scheduled(ScheduledTask::CreateSurface));
        assert_eq!(
            harness.host().created,
            vec![LoadTarget::DevServer(ShellConfig::default().dev_server_url)]
        );

        harness.host().surface = None;
        harness.controller.handle(ShellSignal::AllWindowsClosed);
        assert_eq!(
            harness.controller.shutdown_state(),
            ShutdownState::ForceKillScheduled
        );
        let (waiter, budget) = harness.host().awaiting.pop().expect("exit wait scheduled");
        assert!(budget >= Duration::from_millis(500));
        assert!(waiter.wait(Duration::from_secs(5)));

        harness.drain_backend_events(true);
        harness
            .controller
            .handle(ShellSignal::ShutdownComplete { backend_stopped: true });

        assert_eq!(harness.host().exits, vec![0]);
        assert!(harness.controller.is_terminated());
        assert!(harness.host().notices.is_empty());
        assert!(harness.logged("[backend] stdout | backend-up"));
        assert!(harness.logged("backend stopped"));
    }

    #[test]
    fn missing_backend_entry_shows_diagnostic_page_without_spawning() {
        let mut harness = Harness::new(DeploymentMode::Packaged, Platform::Windows, test_config());
        let expected = harness
            .layout()
            .resources_dir
            .join("backend")
            .join("app.py");

        harness.controller.handle(ShellSignal::Ready);
        assert_eq!(
            harness.controller.supervisor.status().state,
            BackendState::NotStarted
        );
        assert!(harness.events.try_recv().is_err());

        harness
            .controller
            .handle(ShellSignal::Scheduled(ScheduledTask::CreateSurface));
        let created = harness.host().created.clone();
        assert_eq!(created.len(), 1);
        let LoadTarget::Diagnostic(html) = &created[0] else {
            panic!("expected diagnostic page");
        };
        assert!(html.contains(&ui_loader::escape_html(&expected.display().to_string())));
        assert!(harness.logged("backend entry point not found"));
    }

    #[test]
    fn crash_notice_is_held_until_the_window_exists() {
        let mut harness = Harness::new(DeploymentMode::Development, Platform::Linux, test_config());
        harness.controller.handle(ShellSignal::Backend(SupervisorEvent::Exited(
            exit_with(1, BackendState::Exited(1), false),
        )));
        assert!(harness.host().notices.is_empty());

        harness
            .controller
            .handle(ShellSignal::Scheduled(ScheduledTask::CreateSurface));
        let notices = harness.host().notices.clone();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].event, BACKEND_ERROR_EVENT);
        assert_eq!(notices[0].kind, "crashed");

        harness.controller.handle(ShellSignal::Backend(SupervisorEvent::SpawnFailed {
            message: "no interpreter".to_string(),
        }));
        assert_eq!(harness.host().notices.len(), 2);
        assert_eq!(harness.host().notices[1].kind, "spawn-failed");

        let payload = serde_json::to_value(&harness.host().notices[1]).expect("serialize notice");
        assert_eq!(
            payload,
            serde_json::json!({ "kind": "spawn-failed", "message": "no interpreter" })
        );
    }

    #[test]
    fn expected_exit_during_shutdown_is_not_reported() {
        let mut harness = Harness::new(DeploymentMode::Development, Platform::Linux, test_config());
        harness
            .controller
            .handle(ShellSignal::Scheduled(ScheduledTask::CreateSurface));
        harness.controller.handle(ShellSignal::BeforeQuit);
        assert_eq!(harness.host().exits, vec![0]);

        harness.controller.handle(ShellSignal::Backend(SupervisorEvent::Exited(
            exit_with(1, BackendState::Exited(1), false),
        )));
        assert!(harness.host().notices.is_empty());
    }

    #[test]
    fn macos_stays_resident_and_recreates_window_on_activate() {
        let mut harness = Harness::new(DeploymentMode::Development, Platform::MacOs, test_config());
        harness
            .controller
            .handle(ShellSignal::Scheduled(ScheduledTask::CreateSurface));

        harness.host().surface = None;
        harness.controller.handle(ShellSignal::AllWindowsClosed);
        assert_eq!(harness.controller.shutdown_state(), ShutdownState::Running);
        assert!(harness.host().exits.is_empty());

        harness.controller.handle(ShellSignal::Activate);
        assert_eq!(harness.host().created.len(), 2);
        harness.controller.handle(ShellSignal::SecondInstance);
        assert_eq!(harness.host().created.len(), 2);
        assert_eq!(harness.host().focuses, 1);
        assert_eq!(
            harness.controller.supervisor.status().state,
            BackendState::NotStarted
        );
    }

    #[test]
    fn quit_without_backend_exits_once() {
        let mut harness = Harness::new(DeploymentMode::Development, Platform::Linux, test_config());
        harness.controller.handle(ShellSignal::BeforeQuit);
        harness.controller.handle(ShellSignal::BeforeQuit);
        harness.controller.handle(ShellSignal::AllWindowsClosed);

        assert_eq!(harness.host().exits, vec![0]);
        assert!(harness.host().awaiting.is_empty());
        assert_eq!(harness.controller.shutdown_state(), ShutdownState::Terminated);

        harness
            .controller
            .handle(ShellSignal::Scheduled(ScheduledTask::CreateSurface));
        assert!(harness.host().created.is_empty());
    }

    fn refused(_: &LoadTarget, _: Duration) -> Result<(), LoadFailure> {
        Err(LoadFailure {
            class: LoadFailureClass::NotYetReachable,
            message: "connection refused".to_string(),
        })
    }

    #[test]
    fn unreachable_dev_server_is_reloaded_once_then_reported() {
        let mut harness = Harness::new(DeploymentMode::Development, Platform::Linux, test_config());
        harness.controller.target_probe = refused;

        harness
            .controller
            .handle(ShellSignal::Scheduled(ScheduledTask::CreateSurface));
        let dev_target = LoadTarget::DevServer(ShellConfig::default().dev_server_url);
        assert_eq!(harness.host().created, vec![dev_target.clone()]);
        assert_eq!(
            harness.host().scheduled,
            vec![(
                Duration::from_millis(2_000),
                ScheduledTask::ReloadSurface(dev_target.clone())
            )]
        );

        harness
            .controller
            .handle(ShellSignal::Scheduled(ScheduledTask::ReloadSurface(
                dev_target.clone(),
            )));
        assert_eq!(harness.host().reloads, 0);
        assert_eq!(harness.host().notices.len(), 1);
        assert_eq!(harness.host().notices[0].event, LOAD_ERROR_EVENT);
        assert_eq!(harness.host().navigated.len(), 1);

        harness.controller.target_probe = |_, _| Ok(());
        harness
            .controller
            .handle(ShellSignal::Scheduled(ScheduledTask::ReloadSurface(dev_target)));
        assert_eq!(harness.host().reloads, 1);
    }

    #[test]
    fn uncaught_errors_are_only_logged() {
        let mut harness = Harness::new(DeploymentMode::Development, Platform::Linux, test_config());
        harness
            .controller
            .handle(ShellSignal::UncaughtError("boom in handler".to_string()));
        assert!(harness.logged("[runtime] uncaught error: boom in handler"));
        assert!(harness.host().exits.is_empty());
        assert_eq!(harness.controller.shutdown_state(), ShutdownState::Running);
    }

    #[cfg(unix)]
    #[test]
    fn exit_fallback_stops_a_live_backend_synchronously() {
        let mut harness = Harness::new(DeploymentMode::Development, Platform::Linux, test_config());
        let source_root = harness.layout().source_root.clone();
        harness.write_backend(&source_root, "exec sleep 30");

        harness.controller.handle(ShellSignal::Ready);
        harness.drain_backend_events(false);
        harness.controller.handle(ShellSignal::ExitFallback);

        assert!(harness.controller.supervisor.status().state.is_terminal());
        assert!(harness.controller.is_terminated());
        assert!(harness.host().exits.is_empty());
    }
}
