//! Runtime version selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::locator::{HostEnvironment, RuntimeCatalog, RuntimeDescriptor};

/// Runtime family hosted by the bridge.
pub const RUNTIME_FAMILY: &str = "Microsoft.NETCore.App";

/// A `major.minor.build` runtime version.
///
/// Ordering is lexicographic over `(major, minor, build)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Parses the leading `major.minor.build` of `s`.
    ///
    /// Anything after the third numeric component (a prerelease tag, for
    /// instance) is ignored. Returns `None` when the prefix does not match.
    pub fn parse_prefix(s: &str) -> Option<Self> {
        let mut parts = [0u32; 3];
        let mut rest = s;
        for (i, part) in parts.iter_mut().enumerate() {
            if i > 0 {
                rest = rest.strip_prefix('.')?;
            }
            let digits = rest.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                return None;
            }
            *part = rest[..digits].parse().ok()?;
            rest = &rest[digits..];
        }
        Some(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl Default for RuntimeVersion {
    fn default() -> Self {
        Self::new(5, 0, 0)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

impl FromStr for RuntimeVersion {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_prefix(s.trim()).ok_or_else(|| BridgeError::InvalidVersion(s.to_string()))
    }
}

/// Picks the highest installed runtime of `family` that is at least `floor`.
///
/// Runtimes whose version string does not parse are skipped. Among equal
/// versions the first one listed wins.
pub fn pick_latest<'a>(
    runtimes: &'a [RuntimeDescriptor],
    family: &str,
    floor: RuntimeVersion,
) -> Option<&'a RuntimeDescriptor> {
    let mut best = floor;
    let mut chosen = None;
    for runtime in runtimes.iter().filter(|r| r.name == family) {
        let Some(version) = RuntimeVersion::parse_prefix(&runtime.version) else {
            debug!("Skipping runtime with unparsable version {}", runtime.version);
            continue;
        };
        if version > best || (version == best && chosen.is_none()) {
            best = version;
            chosen = Some(runtime);
        }
    }
    chosen
}

/// Resolves the directory of the best runtime under `root`.
///
/// A pinned version in the environment short-circuits the scan: the pinned
/// directory is returned if it exists, and no listing is performed. Otherwise
/// the catalog is scanned with [`pick_latest`] and the directory is derived
/// as `root/shared/<family>/<version>`, falling back to the listed install
/// path. Returns `Ok(None)` when nothing qualifies or neither directory
/// exists.
pub fn select_latest(
    root: &Path,
    min_version: RuntimeVersion,
    env: &HostEnvironment,
    catalog: &dyn RuntimeCatalog,
) -> Result<Option<PathBuf>> {
    let shared = root.join("shared").join(RUNTIME_FAMILY);

    if let Some(pinned) = env.runtime_version_override() {
        let candidate = shared.join(pinned);
        if candidate.is_dir() {
            info!("Using pinned runtime version {}", pinned);
            return Ok(Some(candidate));
        }
        debug!("Pinned runtime {} not found under {}", pinned, shared.display());
    }

    let runtimes = catalog.list_runtimes()?;
    let Some(runtime) = pick_latest(&runtimes, RUNTIME_FAMILY, min_version) else {
        return Ok(None);
    };

    let candidate = shared.join(&runtime.version);
    if candidate.is_dir() {
        info!("Selected runtime {} {}", runtime.name, runtime.version);
        return Ok(Some(candidate));
    }
    if runtime.install_path.is_dir() {
        info!(
            "Selected runtime {} {} at {}",
            runtime.name,
            runtime.version,
            runtime.install_path.display()
        );
        return Ok(Some(runtime.install_path.clone()));
    }
    Ok(None)
}
