use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

use crate::{deployment::Platform, path_resolver::PathProbe};

pub const EMBEDDED_RUNTIME_DIR: &str = "python";
pub const SEARCH_PATH_VAR: &str = "PATH";
pub const MODULE_PATH_VAR: &str = "PYTHONPATH";

/// A self-contained Python interpreter shipped next to the packaged shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedRuntime {
    pub interpreter: PathBuf,
    pub bin_dir: PathBuf,
    pub site_packages: PathBuf,
}

impl EmbeddedRuntime {
    fn layout(resources_dir: &Path, platform: Platform) -> Self {
        let root = resources_dir.join(EMBEDDED_RUNTIME_DIR);
        let (interpreter, bin_dir) = match platform {
            Platform::Windows => (root.join("python.exe"), root.clone()),
            Platform::MacOs | Platform::Linux => {
                let bin_dir = root.join("bin");
                (bin_dir.join("python3"), bin_dir)
            }
        };
        Self {
            interpreter,
            bin_dir,
            site_packages: root.join("lib").join("site-packages"),
        }
    }
}

/// Looks for the embedded runtime at its fixed location under `resources_dir`.
pub fn detect_embedded_runtime<P>(
    probe: &P,
    resources_dir: &Path,
    platform: Platform,
) -> Option<EmbeddedRuntime>
where
    P: PathProbe + ?Sized,
{
    let runtime = EmbeddedRuntime::layout(resources_dir, platform);
    probe.exists(&runtime.interpreter).then_some(runtime)
}

pub fn system_interpreter(platform: Platform) -> &'static str {
    match platform {
        Platform::Windows => "py",
        Platform::MacOs | Platform::Linux => "python3",
    }
}

/// Full environment handed to the backend: the parent environment plus the
/// embedded-runtime overrides, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOverlay {
    vars: BTreeMap<OsString, OsString>,
}

impl EnvironmentOverlay {
    pub fn inherit<I>(parent: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        Self {
            vars: parent.into_iter().collect(),
        }
    }

    pub fn build<I, F>(
        parent: I,
        runtime: Option<&EmbeddedRuntime>,
        platform: Platform,
        mut log: F,
    ) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
        F: FnMut(String),
    {
        let mut overlay = Self::inherit(parent);
        let Some(runtime) = runtime else {
            return overlay;
        };

        overlay.prepend_search_path(&runtime.bin_dir, platform);
        let module_key = overlay.key_for(MODULE_PATH_VAR, platform);
        overlay
            .vars
            .insert(module_key, runtime.site_packages.clone().into_os_string());
        log(format!(
            "backend environment uses embedded runtime: {} prepended to {SEARCH_PATH_VAR}, {MODULE_PATH_VAR}={}",
            runtime.bin_dir.display(),
            runtime.site_packages.display()
        ));
        overlay
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(name)).map(OsString::as_os_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars
            .iter()
            .map(|(key, value)| (key.as_os_str(), value.as_os_str()))
    }

    // Windows treats variable names case-insensitively (`Path` vs `PATH`).
    fn key_for(&self, name: &str, platform: Platform) -> OsString {
        if platform == Platform::Windows {
            if let Some(existing) = self
                .vars
                .keys()
                .find(|key| key.to_string_lossy().eq_ignore_ascii_case(name))
            {
                return existing.clone();
            }
        }
        OsString::from(name)
    }

    fn prepend_search_path(&mut self, dir: &Path, platform: Platform) {
        let key = self.key_for(SEARCH_PATH_VAR, platform);
        let mut value = dir.as_os_str().to_os_string();
        if let Some(existing) = self.vars.get(&key).filter(|existing| !existing.is_empty()) {
            value.push(platform.path_list_separator().to_string());
            value.push(existing);
        }
        self.vars.insert(key, value);
    }
}
