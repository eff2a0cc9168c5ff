use std::{
    sync::{Mutex, MutexGuard},
    thread,
    time::Duration,
};

use tauri::{AppHandle, Emitter, Manager, WebviewUrl, WebviewWindow, WebviewWindowBuilder};

use crate::{
    app_helpers::append_desktop_log,
    backend_supervisor::BackendExitWaiter,
    lifecycle::{LifecycleController, ScheduledTask, ShellHost, ShellSignal, UiNotice},
    ui_dispatch,
    ui_loader::LoadTarget,
};

pub const MAIN_WINDOW_LABEL: &str = "main";
const MAIN_WINDOW_TITLE: &str = "ZVD Area Calculator";
const MAIN_WINDOW_SIZE: (f64, f64) = (1400.0, 900.0);
const MAIN_WINDOW_MIN_SIZE: (f64, f64) = (1000.0, 700.0);

/// [`ShellHost`] backed by the Tauri main window.
pub struct TauriHost {
    app: AppHandle,
}

impl TauriHost {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }

    fn main_window(&self) -> Result<WebviewWindow, String> {
        self.app
            .get_webview_window(MAIN_WINDOW_LABEL)
            .ok_or_else(|| "Main window is unavailable.".to_string())
    }
}

impl ShellHost for TauriHost {
    fn has_surface(&self) -> bool {
        self.app.get_webview_window(MAIN_WINDOW_LABEL).is_some()
    }

    fn create_surface(&mut self, target: &LoadTarget) -> Result<(), String> {
        let url = target.to_url()?;
        WebviewWindowBuilder::new(&self.app, MAIN_WINDOW_LABEL, WebviewUrl::External(url))
            .title(MAIN_WINDOW_TITLE)
            .inner_size(MAIN_WINDOW_SIZE.0, MAIN_WINDOW_SIZE.1)
            .min_inner_size(MAIN_WINDOW_MIN_SIZE.0, MAIN_WINDOW_MIN_SIZE.1)
            .center()
            .build()
            .map(|_| ())
            .map_err(|error| format!("Failed to create main window: {error}"))
    }

    fn navigate_surface(&mut self, target: &LoadTarget) -> Result<(), String> {
        let url = target.to_url()?;
        let url_json = serde_json::to_string(url.as_str())
            .map_err(|error| format!("Failed to encode navigation target: {error}"))?;
        self.main_window()?
            .eval(&format!("window.location.replace({url_json});"))
            .map_err(|error| format!("Failed to navigate main window: {error}"))
    }

    fn reload_surface(&mut self) -> Result<(), String> {
        self.main_window()?
            .reload()
            .map_err(|error| format!("Failed to reload main window: {error}"))
    }

    fn focus_surface(&mut self) -> Result<(), String> {
        let window = self.main_window()?;
        if let Err(error) = window.unminimize() {
            append_desktop_log(&format!("failed to unminimize main window: {error}"));
        }
        window
            .show()
            .and_then(|()| window.set_focus())
            .map_err(|error| format!("Failed to focus main window: {error}"))
    }

    fn notify_ui(&mut self, notice: &UiNotice) -> Result<(), String> {
        self.app
            .emit_to(MAIN_WINDOW_LABEL, notice.event, notice)
            .map_err(|error| format!("Failed to emit {}: {error}", notice.event))
    }

    fn schedule(&mut self, delay: Duration, task: ScheduledTask) {
        let app = self.app.clone();
        let spawned = thread::Builder::new()
            .name("shell-timer".to_string())
            .spawn(move || {
                thread::sleep(delay);
                ui_dispatch::dispatch_signal(&app, ShellSignal::Scheduled(task));
            });
        if let Err(error) = spawned {
            append_desktop_log(&format!("failed to start shell timer: {error}"));
        }
    }

    fn await_backend_exit(&mut self, waiter: BackendExitWaiter, budget: Duration) {
        let app = self.app.clone();
        tauri::async_runtime::spawn_blocking(move || {
            let backend_stopped = waiter.wait(budget);
            ui_dispatch::dispatch_signal(&app, ShellSignal::ShutdownComplete { backend_stopped });
        });
    }

    fn exit(&mut self, code: i32) {
        self.app.exit(code);
    }
}

/// Tauri managed state holding the single lifecycle controller.
pub struct ShellState {
    controller: Mutex<LifecycleController<TauriHost>>,
}

impl ShellState {
    pub fn new(controller: LifecycleController<TauriHost>) -> Self {
        Self {
            controller: Mutex::new(controller),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleController<TauriHost>> {
        match self.controller.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                append_desktop_log("lifecycle controller lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn with_controller<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut LifecycleController<TauriHost>) -> R,
    {
        let mut guard = self.lock();
        f(&mut *guard)
    }
}
