//! Runtime discovery: finding the .NET installation root and listing the
//! runtimes installed under it.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

/// Architecture-specific home override, checked first.
#[cfg(target_pointer_width = "64")]
pub const ENV_ARCH_HOME: &str = "DOTNETHOME_X64";
#[cfg(not(target_pointer_width = "64"))]
pub const ENV_ARCH_HOME: &str = "DOTNETHOME_X86";
/// Generic home override.
pub const ENV_HOME: &str = "DOTNETHOME";
/// Generic root override, the variable the .NET tooling itself honours.
pub const ENV_ROOT: &str = "DOTNET_ROOT";
/// Pins the runtime version and bypasses the version scan.
pub const ENV_RUNTIME_VERSION: &str = "DOTNETRUNTIMEVERSION";

/// Name of the runtime launcher executable.
pub fn launcher_name() -> &'static str {
    if cfg!(windows) {
        "dotnet.exe"
    } else {
        "dotnet"
    }
}

/// A snapshot of the process environment the locator and selector read from.
///
/// Capturing once keeps the lookup deterministic and lets callers inject
/// overrides without touching the real process environment.
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
    vars: HashMap<String, String>,
    search_path: Option<OsString>,
}

impl HostEnvironment {
    /// Captures the current process environment.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
            search_path: std::env::var_os("PATH"),
        }
    }

    /// An environment with no variables and an empty search path.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_var(key, value);
        self
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Pinned runtime version, if any.
    pub fn runtime_version_override(&self) -> Option<&str> {
        self.var(ENV_RUNTIME_VERSION).filter(|v| !v.is_empty())
    }

    /// Finds the launcher executable on the captured search path.
    pub fn find_launcher(&self) -> Option<PathBuf> {
        let search_path = self.search_path.as_ref()?;
        let cwd = std::env::current_dir().ok()?;
        which::which_in(launcher_name(), Some(search_path), cwd).ok()
    }
}

/// One line of the launcher's runtime listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    /// Runtime family, e.g. `Microsoft.NETCore.App`.
    pub name: String,
    pub version: String,
    /// Install directory of this runtime version.
    pub install_path: PathBuf,
}

/// Source of installed runtime listings.
pub trait RuntimeCatalog {
    fn list_runtimes(&self) -> Result<Vec<RuntimeDescriptor>>;
}

/// Lists runtimes by running `dotnet --list-runtimes`.
#[derive(Debug, Clone)]
pub struct LauncherCatalog {
    launcher: PathBuf,
}

impl LauncherCatalog {
    pub fn new(launcher: impl Into<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
        }
    }

    /// Uses the launcher inside `root` when present, then the one on the
    /// environment's search path. With neither, listing fails naming the
    /// expected path inside `root`.
    pub fn for_root(root: &Path, env: &HostEnvironment) -> Self {
        let candidate = root.join(launcher_name());
        if candidate.is_file() {
            return Self::new(candidate);
        }
        match env.find_launcher() {
            Some(launcher) => Self::new(launcher),
            None => Self::new(candidate),
        }
    }

    pub fn launcher(&self) -> &Path {
        &self.launcher
    }
}

impl RuntimeCatalog for LauncherCatalog {
    fn list_runtimes(&self) -> Result<Vec<RuntimeDescriptor>> {
        let output = Command::new(&self.launcher)
            .arg("--list-runtimes")
            .output()
            .map_err(|e| BridgeError::RuntimeListing {
                launcher: self.launcher.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BridgeError::RuntimeListing {
                launcher: self.launcher.clone(),
                reason: format!("exited with {}", output.status),
            });
        }

        let listing = String::from_utf8(output.stdout).map_err(|e| BridgeError::RuntimeListing {
            launcher: self.launcher.clone(),
            reason: e.to_string(),
        })?;
        Ok(parse_runtime_listing(&listing))
    }
}

/// Parses `--list-runtimes` output.
///
/// Each line is `<name> <version> [<path>]`. The path may contain spaces, so
/// the line is split into at most three fields. The bracket markers are
/// stripped and the version is appended to form the install directory.
/// Lines with fewer than three fields are skipped.
pub fn parse_runtime_listing(listing: &str) -> Vec<RuntimeDescriptor> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim_end().splitn(3, ' ');
            let name = fields.next()?;
            let version = fields.next()?;
            let path = fields.next()?;
            let path = path
                .strip_prefix('[')
                .and_then(|p| p.strip_suffix(']'))
                .unwrap_or(path);
            Some(RuntimeDescriptor {
                name: name.to_string(),
                version: version.to_string(),
                install_path: Path::new(path).join(version),
            })
        })
        .collect()
}

/// Locates the runtime installation root.
///
/// Resolution order, first existing directory wins: the architecture-specific
/// home variable, the generic home variable, the root variable, then the
/// directory containing the launcher found on the search path (after
/// resolving symbolic links).
pub fn locate_runtime_root(env: &HostEnvironment) -> Option<PathBuf> {
    for key in [ENV_ARCH_HOME, ENV_HOME, ENV_ROOT] {
        if let Some(value) = env.var(key) {
            let candidate = PathBuf::from(value);
            if candidate.is_dir() {
                info!("Runtime root from {}: {}", key, candidate.display());
                return Some(candidate);
            }
            debug!("Ignoring {}={}: not a directory", key, value);
        }
    }

    let launcher = env.find_launcher()?;
    let resolved = std::fs::canonicalize(&launcher).unwrap_or(launcher);
    let root = resolved.parent()?.to_path_buf();
    if root.is_dir() {
        info!("Runtime root from launcher: {}", root.display());
        Some(root)
    } else {
        None
    }
}
