use std::{
    fmt,
    fs::File,
    io::{self, ErrorKind},
    net::{TcpStream, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use url::Url;

use crate::{
    deployment::DeploymentMode,
    path_resolver::{self, CandidatePath, PathProbe, ResourceKind, ShellLayout},
};

pub const PROBE_TIMEOUT: Duration = Duration::from_millis(800);
const PAGE_TITLE: &str = "ZVD Area Calculator";

/// What the main window should display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadTarget {
    DevServer(Url),
    Bundle(PathBuf),
    /// Self-contained HTML document rendered by the shell itself.
    Diagnostic(String),
}

impl LoadTarget {
    pub fn to_url(&self) -> Result<Url, String> {
        match self {
            Self::DevServer(url) => Ok(url.clone()),
            Self::Bundle(path) => Url::from_file_path(path)
                .map_err(|_| format!("UI bundle path is not absolute: {}", path.display())),
            Self::Diagnostic(html) => {
                let data_url = format!(
                    "data:text/html;charset=utf-8;base64,{}",
                    STANDARD.encode(html.as_bytes())
                );
                Url::parse(&data_url)
                    .map_err(|error| format!("failed to build diagnostic page url: {error}"))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::DevServer(url) => format!("dev server {url}"),
            Self::Bundle(path) => format!("bundle {}", path.display()),
            Self::Diagnostic(_) => "inline diagnostic page".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailureClass {
    /// The target may still come up (server starting, socket not bound yet).
    NotYetReachable,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub class: LoadFailureClass,
    pub message: String,
}

impl LoadFailure {
    fn from_io(context: String, error: &io::Error) -> Self {
        Self {
            class: classify_io_error(error),
            message: format!("{context}: {error}"),
        }
    }

    fn unavailable(message: String) -> Self {
        Self {
            class: LoadFailureClass::Unavailable,
            message,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == LoadFailureClass::NotYetReachable
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub fn classify_io_error(error: &io::Error) -> LoadFailureClass {
    match error.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::TimedOut
        | ErrorKind::NotConnected => LoadFailureClass::NotYetReachable,
        _ => LoadFailureClass::Unavailable,
    }
}

/// Checks that a target can be loaded right now without loading it.
pub fn probe_target(target: &LoadTarget, timeout: Duration) -> Result<(), LoadFailure> {
    match target {
        LoadTarget::DevServer(url) => probe_url(url, timeout),
        LoadTarget::Bundle(path) => File::open(path)
            .map(|_| ())
            .map_err(|error| LoadFailure::from_io(format!("cannot read {}", path.display()), &error)),
        LoadTarget::Diagnostic(_) => Ok(()),
    }
}

fn probe_url(url: &Url, timeout: Duration) -> Result<(), LoadFailure> {
    let Some(host) = url.host_str() else {
        return Err(LoadFailure::unavailable(format!("{url} has no host")));
    };
    let port = url.port_or_known_default().unwrap_or(80);
    let addresses = (host, port)
        .to_socket_addrs()
        .map_err(|error| LoadFailure::unavailable(format!("cannot resolve {host}:{port}: {error}")))?
        .collect::<Vec<_>>();

    let mut last_error = None;
    for address in &addresses {
        match TcpStream::connect_timeout(address, timeout) {
            Ok(_) => return Ok(()),
            Err(error) => last_error = Some(error),
        }
    }
    match last_error {
        Some(error) => Err(LoadFailure::from_io(format!("cannot connect to {url}"), &error)),
        None => Err(LoadFailure::unavailable(format!(
            "{host}:{port} resolved to no addresses"
        ))),
    }
}

/// Picks the dev server in development, otherwise the resolved bundle or a
/// diagnostic page listing every location that was checked.
pub fn resolve_load_target<P, F>(
    probe: &P,
    mode: DeploymentMode,
    layout: &ShellLayout,
    dev_server_url: &Url,
    mut log: F,
) -> LoadTarget
where
    P: PathProbe + ?Sized,
    F: FnMut(String),
{
    if mode == DeploymentMode::Development {
        return LoadTarget::DevServer(dev_server_url.clone());
    }

    match path_resolver::resolve_with(probe, ResourceKind::UiBundle, mode, layout) {
        Ok(resolved) => {
            log(format!(
                "UI bundle resolved from {}: {}",
                resolved.candidate.description,
                resolved.path().display()
            ));
            LoadTarget::Bundle(resolved.candidate.path)
        }
        Err(error) => {
            log(error.to_string());
            LoadTarget::Diagnostic(render_missing_resource_page(
                ResourceKind::UiBundle,
                error.checked(),
            ))
        }
    }
}

/// Automatic reloads left for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadBudget {
    remaining: u32,
}

impl ReloadBudget {
    pub fn once() -> Self {
        Self { remaining: 1 }
    }

    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

impl Default for ReloadBudget {
    fn default() -> Self {
        Self::once()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadPlan {
    Load(LoadTarget),
    /// Load now and schedule one reload.
    LoadWithRetry(LoadTarget),
    ErrorPage { page: LoadTarget, failure: LoadFailure },
}

pub fn plan_initial_load(
    target: LoadTarget,
    probe_outcome: Result<(), LoadFailure>,
    budget: &mut ReloadBudget,
) -> LoadPlan {
    match probe_outcome {
        Ok(()) => LoadPlan::Load(target),
        Err(failure) if failure.is_transient() => {
            if budget.try_consume() {
                LoadPlan::LoadWithRetry(target)
            } else {
                LoadPlan::Load(target)
            }
        }
        Err(failure) => LoadPlan::ErrorPage {
            page: LoadTarget::Diagnostic(render_load_error_page(&target, &failure)),
            failure,
        },
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn render_page(heading: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title>\
<style>body{{font-family:system-ui,sans-serif;margin:40px;color:#222}}\
code{{background:#f2f2f2;padding:2px 4px;word-break:break-all}}li{{margin:6px 0}}</style>\
</head><body><h1>{heading}</h1>{body}</body></html>",
        title = PAGE_TITLE,
        heading = escape_html(heading),
    )
}

pub fn render_missing_resource_page(kind: ResourceKind, checked: &[CandidatePath]) -> String {
    let items = checked
        .iter()
        .map(|candidate| {
            format!(
                "<li><code>{}</code> ({})</li>",
                escape_html(&candidate.path.display().to_string()),
                escape_html(candidate.description)
            )
        })
        .collect::<String>();
    render_page(
        &format!("{PAGE_TITLE} cannot start"),
        &format!(
            "<p>The {} was not found. Checked locations:</p><ol>{items}</ol>\
<p>Reinstall the application or rebuild the missing resources.</p>",
            escape_html(kind.as_str())
        ),
    )
}

pub fn render_load_error_page(target: &LoadTarget, failure: &LoadFailure) -> String {
    render_page(
        &format!("{PAGE_TITLE} failed to load"),
        &format!(
            "<p>Could not load the {}.</p><p><code>{}</code></p>",
            escape_html(&target.describe()),
            escape_html(&failure.message)
        ),
    )
}
