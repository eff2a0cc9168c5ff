use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{deployment::DeploymentMode, error::ResolveError};

pub const BACKEND_DIR: &str = "backend";
pub const BACKEND_ENTRY_FILE: &str = "app.py";
pub const UI_DIST_DIR: &str = "dist";
pub const UI_INDEX_FILE: &str = "index.html";
// Bundler destination for resources declared relative to the parent of the crate.
pub const RELOCATED_RESOURCES_DIR: &str = "_up_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    BackendEntry,
    UiBundle,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackendEntry => "backend entry point",
            Self::UiBundle => "UI asset bundle",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filesystem anchors of one shell installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLayout {
    /// Root of the shell's source checkout (development builds).
    pub source_root: PathBuf,
    /// Platform-specific directory holding bundled resources.
    pub resources_dir: PathBuf,
    /// Directory the running application reports as its own root.
    pub app_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePath {
    pub description: &'static str,
    pub path: PathBuf,
}

impl CandidatePath {
    fn new(description: &'static str, path: PathBuf) -> Self {
        Self { description, path }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub index: usize,
    pub candidate: CandidatePath,
}

impl ResolvedPath {
    pub fn path(&self) -> &Path {
        &self.candidate.path
    }
}

pub trait PathProbe {
    fn exists(&self, path: &Path) -> bool;
}

/// Probes the real filesystem; candidates must be regular files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl PathProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

fn ui_index_under(dir: &Path) -> PathBuf {
    dir.join(UI_DIST_DIR).join(UI_INDEX_FILE)
}

/// Ordered candidates for `kind`; earlier entries take priority.
pub fn candidates(kind: ResourceKind, mode: DeploymentMode, layout: &ShellLayout) -> Vec<CandidatePath> {
    match kind {
        ResourceKind::BackendEntry => match mode {
            DeploymentMode::Development => vec![CandidatePath::new(
                "development source tree",
                layout.source_root.join(BACKEND_DIR).join(BACKEND_ENTRY_FILE),
            )],
            DeploymentMode::Packaged => vec![CandidatePath::new(
                "packaged resources",
                layout.resources_dir.join(BACKEND_DIR).join(BACKEND_ENTRY_FILE),
            )],
        },
        ResourceKind::UiBundle => vec![
            CandidatePath::new("application root", ui_index_under(&layout.app_root)),
            CandidatePath::new(
                "archived application resources",
                ui_index_under(&layout.resources_dir.join(RELOCATED_RESOURCES_DIR)),
            ),
            CandidatePath::new(
                "unarchived application resources",
                ui_index_under(&layout.resources_dir),
            ),
            CandidatePath::new("shell source tree", ui_index_under(&layout.source_root)),
        ],
    }
}

pub fn resolve_with<P>(
    probe: &P,
    kind: ResourceKind,
    mode: DeploymentMode,
    layout: &ShellLayout,
) -> Result<ResolvedPath, ResolveError>
where
    P: PathProbe + ?Sized,
{
    let checked = candidates(kind, mode, layout);
    match checked
        .iter()
        .position(|candidate| probe.exists(&candidate.path))
    {
        Some(index) => Ok(ResolvedPath {
            index,
            candidate: checked[index].clone(),
        }),
        None => Err(ResolveError::NotFound { kind, checked }),
    }
}
