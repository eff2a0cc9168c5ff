use tauri::{AppHandle, ExitRequestApi, Manager};

use crate::{
    app_helpers::append_shutdown_log, lifecycle::ShellSignal, tauri_host::ShellState,
    ui_dispatch,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExitRequestedDecision {
    AllowImmediateExit,
    RunShutdownFirst(ShellSignal),
}

// `code` is `None` when the last window closed and `Some` for explicit exits.
fn decide_exit_requested_flow(terminated: bool, code: Option<i32>) -> ExitRequestedDecision {
    if terminated {
        return ExitRequestedDecision::AllowImmediateExit;
    }
    match code {
        None => ExitRequestedDecision::RunShutdownFirst(ShellSignal::AllWindowsClosed),
        Some(_) => ExitRequestedDecision::RunShutdownFirst(ShellSignal::BeforeQuit),
    }
}

pub fn handle_exit_requested(app_handle: &AppHandle, api: &ExitRequestApi, code: Option<i32>) {
    let terminated = app_handle
        .try_state::<ShellState>()
        .map(|state| state.with_controller(|controller| controller.is_terminated()))
        .unwrap_or(true);

    match decide_exit_requested_flow(terminated, code) {
        ExitRequestedDecision::AllowImmediateExit => {
            append_shutdown_log("exit request allowed to pass through after backend cleanup");
        }
        ExitRequestedDecision::RunShutdownFirst(signal) => {
            // The controller exits explicitly once the backend is gone.
            api.prevent_exit();
            ui_dispatch::handle_signal(app_handle, signal);
        }
    }
}

pub fn handle_exit_event(app_handle: &AppHandle) {
    ui_dispatch::handle_signal(app_handle, ShellSignal::ExitFallback);
}
