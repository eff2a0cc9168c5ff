#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app_helpers;
mod backend_env;
mod backend_supervisor;
mod config;
mod deployment;
mod error;
mod exit_events;
mod launch_plan;
mod lifecycle;
mod logging;
mod path_resolver;
mod process_control;
mod runtime_paths;
mod shutdown_state;
mod tauri_host;
mod ui_dispatch;
mod ui_loader;

use std::{env, sync::mpsc};

use tauri::{AppHandle, Manager, RunEvent};

use crate::{
    app_helpers::{append_startup_log, desktop_log_path, desktop_log_sink},
    backend_supervisor::BackendSupervisor,
    deployment::Platform,
    lifecycle::{LifecycleController, ShellContext, ShellSignal},
    tauri_host::{ShellState, TauriHost},
};

fn install_panic_hook(app_handle: AppHandle) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = info.to_string();
        app_helpers::append_desktop_log(&format!("panic: {message}"));
        ui_dispatch::dispatch_signal(&app_handle, ShellSignal::UncaughtError(message));
        previous(info);
    }));
}

fn setup_shell(app_handle: &AppHandle) {
    let (mode, mode_message) = deployment::resolve_deployment_mode(
        env::var(deployment::DEV_MODE_ENV).ok().as_deref(),
        !tauri::is_dev(),
    );
    if let Some(message) = mode_message {
        append_startup_log(&message);
    }

    let config = config::load_shell_config(
        |name| env::var(name).ok(),
        |message| append_startup_log(&message),
    );
    let layout = runtime_paths::resolve_shell_layout(app_handle, &config, append_startup_log);

    let (events_tx, events_rx) = mpsc::channel();
    let supervisor = BackendSupervisor::new(events_tx, desktop_log_sink());
    let controller = LifecycleController::new(
        TauriHost::new(app_handle.clone()),
        supervisor,
        ShellContext {
            mode,
            platform: Platform::current(),
            layout,
        },
        config,
        desktop_log_sink(),
    );

    app_handle.manage(ShellState::new(controller));
    ui_dispatch::forward_supervisor_events(app_handle.clone(), events_rx);
    ui_dispatch::dispatch_signal(app_handle, ShellSignal::Ready);
}

fn main() {
    append_startup_log("desktop process starting");
    append_startup_log(&format!(
        "desktop log path: {}",
        desktop_log_path().display()
    ));
    tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app_handle, _argv, _cwd| {
            ui_dispatch::dispatch_signal(app_handle, ShellSignal::SecondInstance);
        }))
        .setup(|app| {
            let app_handle = app.handle().clone();
            install_panic_hook(app_handle.clone());
            setup_shell(&app_handle);
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app_handle, event| match event {
            RunEvent::ExitRequested { api, code, .. } => {
                exit_events::handle_exit_requested(app_handle, &api, code);
            }
            RunEvent::Exit => exit_events::handle_exit_event(app_handle),
            #[cfg(target_os = "macos")]
            RunEvent::Reopen { .. } => ui_dispatch::handle_signal(app_handle, ShellSignal::Activate),
            _ => {}
        });
}
