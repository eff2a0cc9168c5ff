use std::io;

use thiserror::Error;

use crate::{
    backend_supervisor::BackendState,
    path_resolver::{CandidatePath, ResourceKind},
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{kind} not found; checked: {}", format_checked(.checked))]
    NotFound {
        kind: ResourceKind,
        checked: Vec<CandidatePath>,
    },
}

impl ResolveError {
    pub fn checked(&self) -> &[CandidatePath] {
        match self {
            Self::NotFound { checked, .. } => checked,
        }
    }
}

fn format_checked(checked: &[CandidatePath]) -> String {
    checked
        .iter()
        .map(|candidate| candidate.path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("backend process is already {state} (pid {pid:?})")]
    AlreadyRunning {
        state: BackendState,
        pid: Option<u32>,
    },
    #[error("failed to spawn backend process with command {command:?}: {source}")]
    Spawn {
        command: Vec<String>,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("invalid interpreter command '{value}'")]
    InvalidInterpreter { value: String },
}
