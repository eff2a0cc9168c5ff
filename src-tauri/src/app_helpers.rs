use std::{
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock},
};

use crate::logging::{self, DesktopLogCategory, LogSink};

const DESKTOP_LOG_FILE: &str = "desktop.log";
const DESKTOP_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const LOG_BACKUP_COUNT: usize = 5;

static DESKTOP_LOG_WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
static DESKTOP_LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

pub(crate) fn default_data_root_dir() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".zvd-desktop"))
}

pub(crate) fn desktop_log_path() -> &'static PathBuf {
    DESKTOP_LOG_PATH.get_or_init(|| {
        logging::resolve_desktop_log_path(default_data_root_dir(), DESKTOP_LOG_FILE)
    })
}

pub(crate) fn append_desktop_log(message: &str) {
    append_desktop_log_with_category(DesktopLogCategory::Runtime, message);
}

pub(crate) fn append_startup_log(message: &str) {
    append_desktop_log_with_category(DesktopLogCategory::Startup, message);
}

pub(crate) fn append_shutdown_log(message: &str) {
    append_desktop_log_with_category(DesktopLogCategory::Shutdown, message);
}

pub(crate) fn append_desktop_log_with_category(category: DesktopLogCategory, message: &str) {
    eprintln!("[{category}] {message}");
    logging::append_log_line(
        desktop_log_path(),
        category,
        message,
        DESKTOP_LOG_MAX_BYTES,
        LOG_BACKUP_COUNT,
        &DESKTOP_LOG_WRITE_LOCK,
    )
}

pub(crate) fn desktop_log_sink() -> LogSink {
    Arc::new(append_desktop_log_with_category)
}
