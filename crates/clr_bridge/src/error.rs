//! Error types for the runtime bridge
//!
//! Every variant here is fatal for the operation that produced it. The bridge
//! never retries: a failure means either the deployment is broken (missing
//! runtime, missing assembly, bad hosting library) or the calling code made a
//! programming mistake (wrong arity, wrong argument count).

use std::path::PathBuf;
use thiserror::Error;

use crate::wire::WireType;

/// Errors raised while locating, loading, calling into or tearing down the runtime.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(".NET Core is not installed (no runtime root could be located)")]
    RuntimeNotInstalled,

    #[error(".NET Core runtime version is not sufficient, must be v{0} or higher")]
    RuntimeVersionTooLow(String),

    #[error("Failed to list installed runtimes with {launcher}: {reason}")]
    RuntimeListing { launcher: PathBuf, reason: String },

    #[error("Invalid runtime version {0:?}, expected major.minor.build")]
    InvalidVersion(String),

    #[error("Bootstrap assembly is missing ({0})")]
    AssemblyMissing(PathBuf),

    #[error("Core CLR library is missing ({0})")]
    HostLibraryMissing(PathBuf),

    #[error("Failed to load Core CLR library {path}: {source}")]
    HostLibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Core CLR library does not export {symbol}: {source}")]
    MissingExport {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("A runtime host is already loaded in this process")]
    HostAlreadyLoaded,

    #[error("No runtime host is loaded (was the runtime shut down?)")]
    HostNotLoaded,

    #[error("Core CLR initialization failed (code={0:#x})")]
    Initialize(i32),

    #[error("Failed to create {type_name}.{method} delegate (code={status:#x})")]
    CreateDelegate {
        type_name: String,
        method: String,
        status: i32,
    },

    #[error("Failed to create {type_name}.{method} delegate: runtime returned a null pointer")]
    NullDelegate { type_name: String, method: String },

    #[error("Binding {name} declares {declared} parameter types but its function takes {actual} arguments")]
    ArityMismatch {
        name: String,
        declared: usize,
        actual: usize,
    },

    #[error("Invalid number of arguments for {name}: expected {expected}, got {actual}")]
    ArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Type mismatch in {name}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        name: String,
        expected: WireType,
        actual: WireType,
    },

    #[error("{0:?} is only valid as a return type")]
    VoidParameter(String),

    #[error("Invalid UTF-8 string crossing the boundary in {0}")]
    InvalidString(String),

    #[error("String argument for {0} contains an interior NUL byte")]
    InteriorNul(String),

    #[error("Binding {0} is already registered")]
    DuplicateBinding(String),

    #[error("No binding named {0} is registered")]
    UnknownBinding(String),

    #[error("Failed to create native call adapter for {0}")]
    Adapter(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias used throughout the bridge.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
