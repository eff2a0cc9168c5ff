use std::fmt;

pub const DEV_MODE_ENV: &str = "ZVD_DESKTOP_ENV";
pub const DEV_MODE_VALUE: &str = "development";
const PRODUCTION_MODE_VALUE: &str = "production";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    Development,
    Packaged,
}

impl DeploymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Packaged => "packaged",
        }
    }

    pub fn is_packaged(self) -> bool {
        self == Self::Packaged
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    #[cfg(test)]
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::MacOs, Platform::Linux];

    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
        }
    }

    pub fn path_list_separator(self) -> char {
        match self {
            Self::Windows => ';',
            Self::MacOs | Self::Linux => ':',
        }
    }

    /// macOS apps stay resident after their last window closes.
    pub fn quits_when_last_window_closed(self) -> bool {
        self != Self::MacOs
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides the deployment mode once at startup.
///
/// The development flag wins; otherwise an unpackaged build is still treated
/// as development so a `cargo run` shell uses the source tree.
pub fn resolve_deployment_mode(
    raw_flag: Option<&str>,
    packaged: bool,
) -> (DeploymentMode, Option<String>) {
    let normalized = raw_flag.map(str::trim).unwrap_or_default();
    if normalized.eq_ignore_ascii_case(DEV_MODE_VALUE) {
        return (
            DeploymentMode::Development,
            Some(format!("deployment mode forced to development by {DEV_MODE_ENV}")),
        );
    }

    let message = if !normalized.is_empty() && !normalized.eq_ignore_ascii_case(PRODUCTION_MODE_VALUE)
    {
        Some(format!(
            "unrecognized {DEV_MODE_ENV}='{normalized}', ignoring it"
        ))
    } else {
        None
    };

    if packaged {
        (DeploymentMode::Packaged, message)
    } else {
        (DeploymentMode::Development, message)
    }
}
