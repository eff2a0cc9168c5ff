use std::{path::PathBuf, time::Duration};

use url::Url;

pub const SETTLE_DELAY_ENV: &str = "ZVD_DESKTOP_SETTLE_DELAY_MS";
pub const STOP_GRACE_ENV: &str = "ZVD_DESKTOP_STOP_GRACE_MS";
pub const RELOAD_DELAY_ENV: &str = "ZVD_DESKTOP_RELOAD_DELAY_MS";
pub const DEV_SERVER_URL_ENV: &str = "ZVD_DESKTOP_DEV_SERVER_URL";
pub const SOURCE_DIR_ENV: &str = "ZVD_DESKTOP_SOURCE_DIR";
pub const INTERPRETER_ENV: &str = "ZVD_DESKTOP_PYTHON";

pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_STOP_GRACE_MS: u64 = 2_000;
pub const DEFAULT_RELOAD_DELAY_MS: u64 = 2_000;
pub const DEFAULT_DEV_SERVER_URL: &str = "http://localhost:5173/";

const SETTLE_DELAY_MIN_MS: u64 = 50;
const STOP_GRACE_MIN_MS: u64 = 100;
const RELOAD_DELAY_MIN_MS: u64 = 100;
const DELAY_MAX_MS: u64 = 60_000;

/// Tunables of the shell lifecycle.
///
/// `settle_delay` is a best-effort wait between spawning the backend and
/// creating the window; it does not guarantee the backend is listening. The
/// reload-once policy of the UI loader covers the cases where it is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub settle_delay: Duration,
    pub stop_grace: Duration,
    pub reload_delay: Duration,
    pub dev_server_url: Url,
    pub source_dir_override: Option<PathBuf>,
    pub interpreter_override: Option<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
            reload_delay: Duration::from_millis(DEFAULT_RELOAD_DELAY_MS),
            dev_server_url: default_dev_server_url(),
            source_dir_override: None,
            interpreter_override: None,
        }
    }
}

fn default_dev_server_url() -> Url {
    Url::parse(DEFAULT_DEV_SERVER_URL).expect("default dev server url is valid")
}

pub fn parse_clamped_timeout_env<F>(
    raw: &str,
    env_name: &str,
    fallback_ms: u64,
    min_ms: u64,
    max_ms: u64,
    mut log: F,
) -> u64
where
    F: FnMut(String),
{
    match raw.trim().parse::<u128>() {
        Ok(parsed) if parsed > 0 => {
            if parsed < min_ms as u128 {
                log(format!(
                    "{}='{}' is below minimum {}ms, clamped to {}ms",
                    env_name, raw, min_ms, min_ms
                ));
                min_ms
            } else if parsed > max_ms as u128 {
                log(format!(
                    "{}='{}' is above maximum {}ms, clamped to {}ms",
                    env_name, raw, max_ms, max_ms
                ));
                max_ms
            } else {
                parsed as u64
            }
        }
        _ => {
            log(format!(
                "invalid {}='{}', fallback to {}ms",
                env_name, raw, fallback_ms
            ));
            fallback_ms
        }
    }
}

pub fn resolve_dev_server_url<F>(raw: Option<&str>, mut log: F) -> Url
where
    F: FnMut(String),
{
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return default_dev_server_url();
    };

    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => url,
        Ok(url) => {
            log(format!(
                "{DEV_SERVER_URL_ENV}='{raw}' must be an http(s) url with a host (got scheme '{}'), fallback to {DEFAULT_DEV_SERVER_URL}",
                url.scheme()
            ));
            default_dev_server_url()
        }
        Err(error) => {
            log(format!(
                "invalid {DEV_SERVER_URL_ENV}='{raw}': {error}, fallback to {DEFAULT_DEV_SERVER_URL}"
            ));
            default_dev_server_url()
        }
    }
}

fn resolve_delay<L, F>(
    lookup: &L,
    env_name: &str,
    fallback_ms: u64,
    min_ms: u64,
    log: &mut F,
) -> Duration
where
    L: Fn(&str) -> Option<String>,
    F: FnMut(String),
{
    let millis = match lookup(env_name) {
        Some(raw) => {
            parse_clamped_timeout_env(&raw, env_name, fallback_ms, min_ms, DELAY_MAX_MS, &mut *log)
        }
        None => fallback_ms,
    };
    Duration::from_millis(millis)
}

/// Builds the shell configuration from environment-style lookups.
pub fn load_shell_config<L, F>(lookup: L, mut log: F) -> ShellConfig
where
    L: Fn(&str) -> Option<String>,
    F: FnMut(String),
{
    let settle_delay = resolve_delay(
        &lookup,
        SETTLE_DELAY_ENV,
        DEFAULT_SETTLE_DELAY_MS,
        SETTLE_DELAY_MIN_MS,
        &mut log,
    );
    let stop_grace = resolve_delay(
        &lookup,
        STOP_GRACE_ENV,
        DEFAULT_STOP_GRACE_MS,
        STOP_GRACE_MIN_MS,
        &mut log,
    );
    let reload_delay = resolve_delay(
        &lookup,
        RELOAD_DELAY_ENV,
        DEFAULT_RELOAD_DELAY_MS,
        RELOAD_DELAY_MIN_MS,
        &mut log,
    );
    let dev_server_url = resolve_dev_server_url(lookup(DEV_SERVER_URL_ENV).as_deref(), &mut log);

    let source_dir_override = lookup(SOURCE_DIR_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    let interpreter_override = lookup(INTERPRETER_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    ShellConfig {
        settle_delay,
        stop_grace,
        reload_delay,
        dev_server_url,
        source_dir_override,
        interpreter_override,
    }
}
