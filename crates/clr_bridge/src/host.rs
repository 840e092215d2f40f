//! The native hosting library boundary.
//!
//! [`ClrHost`] is the three-function contract exported by the Core CLR
//! hosting library (`coreclr_initialize`, `coreclr_create_delegate`,
//! `coreclr_shutdown`). [`CoreClrLibrary`] is the real implementation backed
//! by a dynamically loaded library; [`HostLoader`] gathers everything needed
//! to find and open it.

use libloading::{Library, Symbol};
use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::locator::{HostEnvironment, LauncherCatalog, RuntimeCatalog};
use crate::version::{select_latest, RuntimeVersion};

/// Property key carrying the trusted assembly list.
pub const TRUSTED_PLATFORM_ASSEMBLIES: &str = "TRUSTED_PLATFORM_ASSEMBLIES";
/// Friendly name given to the hosted application domain.
pub const DEFAULT_DOMAIN_NAME: &str = "DefaultDomain";
/// Base name of the hosting library.
pub const CORECLR_LIBRARY: &str = "coreclr";

#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// A live runtime instance as returned by `coreclr_initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInstance {
    pub handle: usize,
    pub domain_id: u32,
}

/// The hosting library ABI. Every method returns the raw non-zero status as
/// the error value; zero is success.
pub trait ClrHost: Send + Sync {
    fn initialize(
        &self,
        exe_path: &CStr,
        domain_name: &CStr,
        property_keys: &[&CStr],
        property_values: &[&CStr],
    ) -> std::result::Result<HostInstance, i32>;

    fn create_delegate(
        &self,
        instance: HostInstance,
        assembly: &CStr,
        type_name: &CStr,
        method: &CStr,
    ) -> std::result::Result<usize, i32>;

    fn shutdown(&self, instance: HostInstance) -> std::result::Result<(), i32>;
}

type CoreClrInitializeFn = unsafe extern "system" fn(
    exe_path: *const c_char,
    app_domain_friendly_name: *const c_char,
    property_count: c_int,
    property_keys: *const *const c_char,
    property_values: *const *const c_char,
    host_handle: *mut *mut c_void,
    domain_id: *mut c_uint,
) -> c_int;

type CoreClrCreateDelegateFn = unsafe extern "system" fn(
    host_handle: *mut c_void,
    domain_id: c_uint,
    entry_point_assembly_name: *const c_char,
    entry_point_type_name: *const c_char,
    entry_point_method_name: *const c_char,
    delegate: *mut *mut c_void,
) -> c_int;

type CoreClrShutdownFn = unsafe extern "system" fn(host_handle: *mut c_void, domain_id: c_uint) -> c_int;

/// The Core CLR hosting library loaded from disk.
pub struct CoreClrLibrary {
    initialize: CoreClrInitializeFn,
    create_delegate: CoreClrCreateDelegateFn,
    shutdown: CoreClrShutdownFn,
    path: PathBuf,
    /// Kept alive so the function pointers above stay valid.
    _library: Library,
}

impl CoreClrLibrary {
    /// Loads the library at `path` and resolves the three hosting exports.
    pub fn open(path: &Path) -> Result<Self> {
        let library = unsafe {
            Library::new(path).map_err(|source| BridgeError::HostLibraryLoad {
                path: path.to_path_buf(),
                source,
            })?
        };

        let initialize = unsafe { export::<CoreClrInitializeFn>(&library, "coreclr_initialize")? };
        let create_delegate =
            unsafe { export::<CoreClrCreateDelegateFn>(&library, "coreclr_create_delegate")? };
        let shutdown = unsafe { export::<CoreClrShutdownFn>(&library, "coreclr_shutdown")? };

        debug!("Loaded hosting library {}", path.display());
        Ok(Self {
            initialize,
            create_delegate,
            shutdown,
            path: path.to_path_buf(),
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

unsafe fn export<F: Copy>(library: &Library, symbol: &'static str) -> Result<F> {
    let sym: Symbol<F> = library
        .get(symbol.as_bytes())
        .map_err(|source| BridgeError::MissingExport { symbol, source })?;
    Ok(*sym)
}

impl ClrHost for CoreClrLibrary {
    fn initialize(
        &self,
        exe_path: &CStr,
        domain_name: &CStr,
        property_keys: &[&CStr],
        property_values: &[&CStr],
    ) -> std::result::Result<HostInstance, i32> {
        let keys: Vec<*const c_char> = property_keys.iter().map(|k| k.as_ptr()).collect();
        let values: Vec<*const c_char> = property_values.iter().map(|v| v.as_ptr()).collect();
        let mut handle: *mut c_void = std::ptr::null_mut();
        let mut domain_id: c_uint = 0;

        let status = unsafe {
            (self.initialize)(
                exe_path.as_ptr(),
                domain_name.as_ptr(),
                keys.len() as c_int,
                keys.as_ptr(),
                values.as_ptr(),
                &mut handle,
                &mut domain_id,
            )
        };
        if status != 0 {
            return Err(status);
        }
        Ok(HostInstance {
            handle: handle as usize,
            domain_id,
        })
    }

    fn create_delegate(
        &self,
        instance: HostInstance,
        assembly: &CStr,
        type_name: &CStr,
        method: &CStr,
    ) -> std::result::Result<usize, i32> {
        let mut delegate: *mut c_void = std::ptr::null_mut();
        let status = unsafe {
            (self.create_delegate)(
                instance.handle as *mut c_void,
                instance.domain_id,
                assembly.as_ptr(),
                type_name.as_ptr(),
                method.as_ptr(),
                &mut delegate,
            )
        };
        if status != 0 {
            return Err(status);
        }
        Ok(delegate as usize)
    }

    fn shutdown(&self, instance: HostInstance) -> std::result::Result<(), i32> {
        let status = unsafe { (self.shutdown)(instance.handle as *mut c_void, instance.domain_id) };
        if status != 0 {
            return Err(status);
        }
        Ok(())
    }
}

/// Platform file name of a native library: `name.dll`, `libname.dylib` or `libname.so`.
pub fn library_file_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{name}.dylib")
    } else {
        format!("lib{name}.so")
    }
}

/// Managed assemblies (`*.dll`) directly inside `dir`, sorted by path.
pub fn managed_assemblies_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| BridgeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut assemblies = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BridgeError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_dll = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("dll"))
            .unwrap_or(false);
        if is_dll && path.is_file() {
            assemblies.push(path);
        }
    }
    assemblies.sort();
    Ok(assemblies)
}

/// Builds the `TRUSTED_PLATFORM_ASSEMBLIES` value: every assembly in the
/// runtime directory followed by every assembly next to the bootstrap
/// assembly, joined with the platform path-list separator.
pub fn trusted_platform_assemblies(runtime_dir: &Path, assembly_path: &Path) -> Result<String> {
    let mut assemblies = managed_assemblies_in(runtime_dir)?;
    let assembly_dir = match assembly_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    assemblies.extend(managed_assemblies_in(&assembly_dir)?);

    let joined = assemblies
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(&PATH_LIST_SEPARATOR.to_string());
    Ok(joined)
}

/// Opens the hosting library found at the given path.
pub type LibraryOpener = Box<dyn Fn(&Path) -> Result<Arc<dyn ClrHost>>>;

/// Everything needed to bring up the runtime and bootstrap the managed side.
pub struct HostLoader {
    /// Path of the bootstrap assembly on disk.
    pub assembly_path: PathBuf,
    /// Assembly identity used for delegate lookups, e.g. `Spadecs.Boot, Version=1.0.0.0`.
    pub assembly_identity: String,
    /// Fully qualified type exposing the load and unload entry points.
    pub entry_type: String,
    pub min_version: RuntimeVersion,
    pub load_method: String,
    pub unload_method: String,
    pub domain_name: String,
    pub environment: HostEnvironment,
    catalog: Option<Box<dyn RuntimeCatalog>>,
    opener: LibraryOpener,
}

impl HostLoader {
    pub fn new(
        assembly_path: impl Into<PathBuf>,
        assembly_identity: impl Into<String>,
        entry_type: impl Into<String>,
    ) -> Self {
        Self {
            assembly_path: assembly_path.into(),
            assembly_identity: assembly_identity.into(),
            entry_type: entry_type.into(),
            min_version: RuntimeVersion::default(),
            load_method: "OnLoad".to_string(),
            unload_method: "OnUnload".to_string(),
            domain_name: DEFAULT_DOMAIN_NAME.to_string(),
            environment: HostEnvironment::capture(),
            catalog: None,
            opener: Box::new(|path| Ok(Arc::new(CoreClrLibrary::open(path)?) as Arc<dyn ClrHost>)),
        }
    }

    pub fn with_min_version(mut self, min_version: RuntimeVersion) -> Self {
        self.min_version = min_version;
        self
    }

    pub fn with_entry_points(mut self, load: impl Into<String>, unload: impl Into<String>) -> Self {
        self.load_method = load.into();
        self.unload_method = unload.into();
        self
    }

    pub fn with_environment(mut self, environment: HostEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Replaces the runtime listing source (the launcher by default).
    pub fn with_catalog(mut self, catalog: impl RuntimeCatalog + 'static) -> Self {
        self.catalog = Some(Box::new(catalog));
        self
    }

    /// Replaces how the hosting library is opened once its path is known.
    pub fn with_library_opener(
        mut self,
        opener: impl Fn(&Path) -> Result<Arc<dyn ClrHost>> + 'static,
    ) -> Self {
        self.opener = Box::new(opener);
        self
    }

    /// Selects the runtime directory under `root` with the configured catalog.
    pub(crate) fn select_runtime(&self, root: &Path) -> Result<Option<PathBuf>> {
        match &self.catalog {
            Some(catalog) => select_latest(root, self.min_version, &self.environment, catalog.as_ref()),
            None => select_latest(
                root,
                self.min_version,
                &self.environment,
                &LauncherCatalog::for_root(root, &self.environment),
            ),
        }
    }

    pub(crate) fn open_library(&self, path: &Path) -> Result<Arc<dyn ClrHost>> {
        (self.opener)(path)
    }
}
