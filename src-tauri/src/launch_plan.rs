use std::{
    ffi::{OsStr, OsString},
    path::PathBuf,
};

use crate::{
    backend_env::{self, EnvironmentOverlay},
    deployment::{DeploymentMode, Platform},
    error::ShellError,
    path_resolver::{self, PathProbe, ResourceKind, ShellLayout},
};

/// Everything needed to spawn one backend process.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: OsString,
    pub prefix_args: Vec<String>,
    pub entry_point: PathBuf,
    pub cwd: PathBuf,
    pub env: EnvironmentOverlay,
    pub packaged_mode: bool,
}

impl LaunchPlan {
    pub fn args(&self) -> Vec<&OsStr> {
        self.prefix_args
            .iter()
            .map(OsStr::new)
            .chain(std::iter::once(self.entry_point.as_os_str()))
            .collect()
    }

    pub fn debug_command(&self) -> Vec<String> {
        std::iter::once(self.program.as_os_str())
            .chain(self.args())
            .map(|part| part.to_string_lossy().to_string())
            .collect()
    }
}

/// Splits an interpreter override such as `uv run python` into program and
/// leading arguments.
pub fn parse_interpreter_override(raw: &str) -> Result<(String, Vec<String>), ShellError> {
    let mut pieces = shlex::split(raw).ok_or_else(|| ShellError::InvalidInterpreter {
        value: raw.to_string(),
    })?;
    if pieces.is_empty() {
        return Err(ShellError::InvalidInterpreter {
            value: raw.to_string(),
        });
    }
    let program = pieces.remove(0);
    Ok((program, pieces))
}

#[allow(clippy::too_many_arguments)]
pub fn build_launch_plan<P, I, F>(
    probe: &P,
    mode: DeploymentMode,
    platform: Platform,
    layout: &ShellLayout,
    parent_env: I,
    interpreter_override: Option<&str>,
    mut log: F,
) -> Result<LaunchPlan, ShellError>
where
    P: PathProbe + ?Sized,
    I: IntoIterator<Item = (OsString, OsString)>,
    F: FnMut(String),
{
    let entry = path_resolver::resolve_with(probe, ResourceKind::BackendEntry, mode, layout)?;
    log(format!(
        "backend entry point resolved from {} (candidate {}): {}",
        entry.candidate.description,
        entry.index + 1,
        entry.path().display()
    ));

    let runtime = match mode {
        DeploymentMode::Packaged => {
            backend_env::detect_embedded_runtime(probe, &layout.resources_dir, platform)
        }
        DeploymentMode::Development => None,
    };

    let (program, prefix_args) = match interpreter_override {
        Some(raw) => {
            let (program, prefix_args) = parse_interpreter_override(raw)?;
            log(format!("backend interpreter overridden: {raw}"));
            (OsString::from(program), prefix_args)
        }
        None => match &runtime {
            Some(runtime) => {
                log(format!(
                    "using embedded runtime interpreter: {}",
                    runtime.interpreter.display()
                ));
                (runtime.interpreter.clone().into_os_string(), Vec::new())
            }
            None => {
                let interpreter = backend_env::system_interpreter(platform);
                log(format!(
                    "using system interpreter '{interpreter}' (Python 3.8+ must be installed)"
                ));
                (OsString::from(interpreter), Vec::new())
            }
        },
    };

    let env = EnvironmentOverlay::build(parent_env, runtime.as_ref(), platform, &mut log);
    let cwd = match mode {
        DeploymentMode::Development => layout.source_root.clone(),
        DeploymentMode::Packaged => layout.resources_dir.clone(),
    };

    Ok(LaunchPlan {
        program,
        prefix_args,
        entry_point: entry.candidate.path,
        cwd,
        env,
        packaged_mode: mode.is_packaged(),
    })
}
