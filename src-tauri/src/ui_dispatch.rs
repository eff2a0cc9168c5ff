use std::{sync::mpsc::Receiver, thread};

use tauri::{AppHandle, Manager};

use crate::{
    app_helpers::{append_desktop_log, append_startup_log},
    backend_supervisor::SupervisorEvent,
    lifecycle::ShellSignal,
    tauri_host::ShellState,
};

pub fn run_on_main_thread_dispatch<F>(
    app_handle: &AppHandle,
    task_name: &str,
    task: F,
) -> Result<(), String>
where
    F: FnOnce(&AppHandle) + Send + 'static,
{
    let app_handle_for_thread = app_handle.clone();
    app_handle
        .run_on_main_thread(move || {
            task(&app_handle_for_thread);
        })
        .map_err(|error| format!("Failed to dispatch '{task_name}' on main thread: {error}"))
}

/// Feeds `signal` to the lifecycle controller. Must run on the main thread.
pub fn handle_signal(app_handle: &AppHandle, signal: ShellSignal) {
    let Some(state) = app_handle.try_state::<ShellState>() else {
        append_startup_log(&format!(
            "signal '{}' dropped: shell state is not initialized yet",
            signal.name()
        ));
        return;
    };
    state.with_controller(|controller| controller.handle(signal));
}

/// Queues `signal` for the controller from any thread.
pub fn dispatch_signal(app_handle: &AppHandle, signal: ShellSignal) {
    let name = signal.name();
    if let Err(error) = run_on_main_thread_dispatch(app_handle, name, move |main_app| {
        handle_signal(main_app, signal);
    }) {
        append_desktop_log(&error);
    }
}

pub fn forward_supervisor_events(app_handle: AppHandle, events: Receiver<SupervisorEvent>) {
    let spawned = thread::Builder::new()
        .name("backend-events".to_string())
        .spawn(move || {
            for event in events {
                dispatch_signal(&app_handle, ShellSignal::Backend(event));
            }
        });
    if let Err(error) = spawned {
        append_startup_log(&format!("failed to start backend event forwarder: {error}"));
    }
}
