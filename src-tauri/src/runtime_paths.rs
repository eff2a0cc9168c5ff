use std::{
    env,
    path::{Path, PathBuf},
};

use tauri::{AppHandle, Manager};

use crate::{config::ShellConfig, deployment::Platform, path_resolver::ShellLayout};

pub fn workspace_root_dir() -> PathBuf {
    let candidate = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..");
    candidate
        .canonicalize()
        .unwrap_or_else(|_| candidate.to_path_buf())
}

pub fn detect_source_root<F>(explicit_source_dir: Option<PathBuf>, log: F) -> PathBuf
where
    F: Fn(&str),
{
    detect_source_root_with(workspace_root_dir(), explicit_source_dir, log)
}

fn detect_source_root_with<F>(
    workspace_root: PathBuf,
    explicit_source_dir: Option<PathBuf>,
    log: F,
) -> PathBuf
where
    F: Fn(&str),
{
    if let Some(candidate) = explicit_source_dir {
        if candidate.is_dir() {
            return candidate.canonicalize().unwrap_or(candidate);
        }
        log(&format!(
            "source dir override {} is not a directory, using {}",
            candidate.display(),
            workspace_root.display()
        ));
    }
    workspace_root
}

// Mirrors where bundlers place resources relative to the executable.
fn exe_relative_resources_dir(exe_dir: &Path, platform: Platform) -> PathBuf {
    match platform {
        Platform::MacOs => exe_dir.join("..").join("Resources"),
        Platform::Windows | Platform::Linux => exe_dir.to_path_buf(),
    }
}

fn current_exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

pub fn resolve_resources_dir<F>(app: &AppHandle, fallback_root: &Path, log: F) -> PathBuf
where
    F: Fn(&str),
{
    match app.path().resource_dir() {
        Ok(path) => path,
        Err(error) => {
            let fallback = current_exe_dir()
                .map(|exe_dir| exe_relative_resources_dir(&exe_dir, Platform::current()))
                .unwrap_or_else(|| fallback_root.to_path_buf());
            log(&format!(
                "failed to resolve resource dir: {error}; using {}",
                fallback.display()
            ));
            fallback
        }
    }
}

pub fn resolve_shell_layout<F>(app: &AppHandle, config: &ShellConfig, log: F) -> ShellLayout
where
    F: Fn(&str) + Copy,
{
    let source_root = detect_source_root(config.source_dir_override.clone(), log);
    let resources_dir = resolve_resources_dir(app, &source_root, log);
    let app_root = current_exe_dir().unwrap_or_else(|| resources_dir.clone());
    ShellLayout {
        source_root,
        resources_dir,
        app_root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn explicit_source_dir_wins_when_it_exists() {
        let workspace = tempfile::tempdir().expect("create workspace dir");
        let explicit = tempfile::tempdir().expect("create explicit dir");

        let detected = detect_source_root_with(
            workspace.path().to_path_buf(),
            Some(explicit.path().to_path_buf()),
            |_| {},
        );
        assert_eq!(
            detected,
            explicit
                .path()
                .canonicalize()
                .expect("canonicalize explicit source dir")
        );
    }

    #[test]
    fn missing_source_dir_override_falls_back_to_workspace() {
        let workspace = tempfile::tempdir().expect("create workspace dir");
        let logs = RefCell::new(Vec::new());

        let detected = detect_source_root_with(
            workspace.path().to_path_buf(),
            Some(workspace.path().join("does-not-exist")),
            |message| logs.borrow_mut().push(message.to_string()),
        );
        assert_eq!(detected, workspace.path());
        assert!(logs.borrow()[0].contains("is not a directory"));
    }

    #[test]
    fn macos_resources_live_beside_the_executable_dir() {
        let exe_dir = PathBuf::from("/Applications/ZVD.app/Contents/MacOS");
        assert_eq!(
            exe_relative_resources_dir(&exe_dir, Platform::MacOs),
            exe_dir.join("..").join("Resources")
        );
        assert_eq!(exe_relative_resources_dir(&exe_dir, Platform::Linux), exe_dir);
    }

    #[test]
    fn workspace_root_contains_the_shell_crate() {
        assert!(workspace_root_dir().join("src-tauri").join("Cargo.toml").is_file());
    }
}
