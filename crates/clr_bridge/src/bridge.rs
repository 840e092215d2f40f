//! The bridge context: owner of the hosted runtime and every process-wide
//! registry that depends on it.
//!
//! A [`Bridge`] is created once at startup. Outbound bindings are registered
//! on it before [`Bridge::load_host`] brings the runtime up; imports are
//! declared at any time and resolve lazily once a host is live.
//! [`Bridge::teardown`] releases everything and may run any number of times.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::ffi::CString;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::bindings::inbound::{call_address, ImportDecl};
use crate::bindings::{Import, ImportId, ImportTarget, IntoArgs, NativeFn, OutboundRegistry, TypedImport};
use crate::error::{BridgeError, Result};
use crate::host::{
    library_file_name, trusted_platform_assemblies, ClrHost, HostInstance, HostLoader, CORECLR_LIBRARY,
    TRUSTED_PLATFORM_ASSEMBLIES,
};
use crate::lifecycle;
use crate::locator::locate_runtime_root;
use crate::resolver::{create_delegate, Resolver};
use crate::tracking::{ObjectKey, ObjectTable};
use crate::wire::{FromValue, Signature, Value, WireType};

/// Set while a runtime host is live anywhere in this process.
static HOST_LOADED: AtomicBool = AtomicBool::new(false);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reservation of the process-wide host slot, released on drop unless the
/// host came up.
struct HostClaim {
    armed: bool,
}

impl HostClaim {
    fn acquire() -> Result<Self> {
        HOST_LOADED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| BridgeError::HostAlreadyLoaded)?;
        Ok(Self { armed: true })
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for HostClaim {
    fn drop(&mut self) {
        if self.armed {
            HOST_LOADED.store(false, Ordering::SeqCst);
        }
    }
}

struct LiveHost {
    clr: Arc<dyn ClrHost>,
    instance: HostInstance,
    default_assembly: String,
    runtime_dir: PathBuf,
    unload: Option<(String, usize)>,
}

pub(crate) struct BridgeShared {
    host: Mutex<Option<LiveHost>>,
    live: AtomicBool,
    outbound: Mutex<OutboundRegistry>,
    bindings_json: Mutex<Option<String>>,
    imports: DashMap<ImportId, usize>,
    next_import: AtomicU64,
    objects: ObjectTable,
}

impl BridgeShared {
    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Resolves a managed method through the live host.
    ///
    /// The host lock is released before calling into the runtime, because
    /// resolution may run managed static constructors that call back in.
    pub(crate) fn resolve(&self, type_name: &str, method: &str, assembly: Option<&str>) -> Result<usize> {
        let (clr, instance, assembly) = {
            let host = lock(&self.host);
            let host = host.as_ref().ok_or(BridgeError::HostNotLoaded)?;
            let assembly = assembly.unwrap_or(&host.default_assembly).to_string();
            (host.clr.clone(), host.instance, assembly)
        };
        create_delegate(clr.as_ref(), instance, &assembly, type_name, method)
    }

    pub(crate) fn cached_import(&self, id: ImportId) -> Option<usize> {
        self.imports.get(&id).map(|address| *address)
    }

    pub(crate) fn resolve_import(&self, decl: &ImportDecl) -> Result<usize> {
        if let Some(address) = self.cached_import(decl.id) {
            return Ok(address);
        }
        let address = self.resolve(
            &decl.target.type_name,
            &decl.target.method,
            decl.target.assembly.as_deref(),
        )?;
        self.imports.insert(decl.id, address);
        Ok(address)
    }
}

/// Summary of a registered outbound binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub name: String,
    pub address: usize,
    pub signature: Signature,
}

/// The runtime bridge. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<BridgeShared>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BridgeShared {
                host: Mutex::new(None),
                live: AtomicBool::new(false),
                outbound: Mutex::new(OutboundRegistry::new()),
                bindings_json: Mutex::new(None),
                imports: DashMap::new(),
                next_import: AtomicU64::new(1),
                objects: ObjectTable::new(),
            }),
        }
    }

    /// Whether a runtime host is currently live in this process.
    pub fn host_loaded_in_process() -> bool {
        HOST_LOADED.load(Ordering::SeqCst)
    }

    /// Whether this bridge owns a live host.
    pub fn is_loaded(&self) -> bool {
        self.shared.is_live()
    }

    // ------------------------------------------------------------------
    // Outbound bindings
    // ------------------------------------------------------------------

    /// Registers a native function callable from managed code.
    ///
    /// Fails immediately when the declared parameter count differs from the
    /// function's arity or a declared tag does not match its Rust type.
    pub fn register_outbound<Args, F>(&self, name: &str, signature: Signature, function: F) -> Result<BindingInfo>
    where
        F: NativeFn<Args>,
    {
        if self.is_loaded() {
            warn!("Binding {} registered after load; managed code will not see it", name);
        }
        let mut registry = lock(&self.shared.outbound);
        let binding = registry.register(name, signature, function)?;
        Ok(BindingInfo {
            name: binding.name().to_string(),
            address: binding.address(),
            signature: binding.signature().clone(),
        })
    }

    /// Calls a registered binding directly from native code.
    pub fn invoke_outbound(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let handler = {
            let registry = lock(&self.shared.outbound);
            let binding = registry
                .get(name)
                .ok_or_else(|| BridgeError::UnknownBinding(name.to_string()))?;
            binding.signature().check_args(name, &args)?;
            binding.handler()
        };
        handler(args)
    }

    pub fn binding(&self, name: &str) -> Option<BindingInfo> {
        lock(&self.shared.outbound).get(name).map(|binding| BindingInfo {
            name: binding.name().to_string(),
            address: binding.address(),
            signature: binding.signature().clone(),
        })
    }

    /// `name → address` of every outbound binding.
    pub fn outbound_snapshot(&self) -> BTreeMap<String, u64> {
        lock(&self.shared.outbound).snapshot()
    }

    /// The JSON handed to the load entry point, once the host is loaded.
    pub fn bindings_json(&self) -> Option<String> {
        lock(&self.shared.bindings_json).clone()
    }

    // ------------------------------------------------------------------
    // Inbound imports
    // ------------------------------------------------------------------

    /// Declares a managed method to import. Resolution happens on first call.
    pub fn declare_inbound(&self, name: &str, target: ImportTarget, signature: Signature) -> Result<Import> {
        signature.validate(name)?;
        let id = ImportId(self.shared.next_import.fetch_add(1, Ordering::Relaxed));
        debug!("Declared import {} -> {} {:?}", name, target, signature);
        Ok(Import::new(
            ImportDecl {
                id,
                name: name.to_string(),
                target,
                signature,
            },
            self.shared.clone(),
        ))
    }

    /// Declares an import whose Rust argument tuple and return type must
    /// agree with `signature`.
    pub fn declare_import<A: IntoArgs, R: FromValue>(
        &self,
        name: &str,
        target: ImportTarget,
        signature: Signature,
    ) -> Result<TypedImport<A, R>> {
        TypedImport::wrap(self.declare_inbound(name, target, signature)?)
    }

    /// Number of imports with a cached function pointer.
    pub fn resolved_import_count(&self) -> usize {
        self.shared.imports.len()
    }

    /// A resolver bound to this bridge. It only succeeds while a host is live.
    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.shared.clone())
    }

    // ------------------------------------------------------------------
    // Object tracking
    // ------------------------------------------------------------------

    pub fn track<T: std::any::Any + Send + Sync>(&self, value: &Arc<T>, name: Option<&str>) -> bool {
        self.shared.objects.track(value, name)
    }

    pub fn untrack<T: ?Sized>(&self, value: &Arc<T>, also_remove_names: bool) -> bool {
        self.shared.objects.untrack(value, also_remove_names)
    }

    pub fn untrack_by_name(&self, name: &str) -> bool {
        self.shared.objects.untrack_by_name(name)
    }

    pub fn find<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.shared.objects.find(name)
    }

    pub fn get<T: std::any::Any + Send + Sync>(&self, key: ObjectKey) -> Option<Arc<T>> {
        self.shared.objects.get(key)
    }

    /// Runs `f` against the object table.
    pub fn with_objects<R>(&self, f: impl FnOnce(&ObjectTable) -> R) -> R {
        f(&self.shared.objects)
    }

    /// Whether `self` and `other` share state.
    pub fn same_as(&self, other: &Bridge) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Brings up the runtime and bootstraps the managed side.
    ///
    /// Preconditions are checked in order and each failure aborts the load:
    /// no host already live, bootstrap assembly present, runtime root found,
    /// qualifying runtime version found, hosting library present and
    /// loadable. The runtime is then initialized with the trusted assembly
    /// list, the load and unload entry points are resolved, and the load
    /// entry point receives the JSON map of outbound bindings. On success the
    /// bridge is registered for teardown at process exit.
    pub fn load_host(&self, loader: HostLoader) -> Result<Resolver> {
        let claim = HostClaim::acquire()?;

        if !loader.assembly_path.is_file() {
            return Err(BridgeError::AssemblyMissing(loader.assembly_path.clone()));
        }

        let root = locate_runtime_root(&loader.environment).ok_or(BridgeError::RuntimeNotInstalled)?;
        let runtime_dir = loader
            .select_runtime(&root)?
            .ok_or_else(|| BridgeError::RuntimeVersionTooLow(loader.min_version.to_string()))?;

        let library_path = runtime_dir.join(library_file_name(CORECLR_LIBRARY));
        if !library_path.is_file() {
            return Err(BridgeError::HostLibraryMissing(library_path));
        }
        let clr = loader.open_library(&library_path)?;

        let tpa = trusted_platform_assemblies(&runtime_dir, &loader.assembly_path)?;
        let exe_path = std::env::current_exe().map_err(|source| BridgeError::Io {
            path: PathBuf::from("<current executable>"),
            source,
        })?;
        let exe_c = path_to_cstring(&exe_path)?;
        let domain_c = cstring("domain name", &loader.domain_name)?;
        let key_c = cstring(TRUSTED_PLATFORM_ASSEMBLIES, TRUSTED_PLATFORM_ASSEMBLIES)?;
        let value_c = cstring(TRUSTED_PLATFORM_ASSEMBLIES, &tpa)?;

        let instance = clr
            .initialize(&exe_c, &domain_c, &[key_c.as_c_str()], &[value_c.as_c_str()])
            .map_err(BridgeError::Initialize)?;
        info!(
            "Core CLR initialized from {} (domain {})",
            runtime_dir.display(),
            instance.domain_id
        );

        *lock(&self.shared.host) = Some(LiveHost {
            clr,
            instance,
            default_assembly: loader.assembly_identity.clone(),
            runtime_dir,
            unload: None,
        });
        self.shared.live.store(true, Ordering::SeqCst);
        claim.disarm();

        if let Err(e) = self.bootstrap(&loader) {
            error!("Bootstrap of {} failed: {}", loader.entry_type, e);
            self.teardown();
            return Err(e);
        }

        lifecycle::register_exit_hook(self);
        info!("Bootstrap {} loaded", loader.entry_type);
        Ok(self.resolver())
    }

    fn bootstrap(&self, loader: &HostLoader) -> Result<()> {
        let resolver = self.resolver();
        let on_load = resolver.resolve(&loader.entry_type, &loader.load_method, None)?;
        let on_unload = resolver.resolve(&loader.entry_type, &loader.unload_method, None)?;

        let json = lock(&self.shared.outbound).to_json()?;
        *lock(&self.shared.bindings_json) = Some(json.clone());

        let load_name = format!("{}.{}", loader.entry_type, loader.load_method);
        let signature = Signature::new(WireType::Void, [WireType::Utf8String]);
        unsafe { call_address(&load_name, &signature, on_load, vec![Value::Str(json)])? };

        if let Some(host) = lock(&self.shared.host).as_mut() {
            host.unload = Some((format!("{}.{}", loader.entry_type, loader.unload_method), on_unload));
        }
        Ok(())
    }

    /// Runtime directory of the live host.
    pub fn runtime_dir(&self) -> Option<PathBuf> {
        lock(&self.shared.host).as_ref().map(|host| host.runtime_dir.clone())
    }

    /// Shuts the runtime down and clears every registry.
    ///
    /// Calls the managed unload entry point (its failure is logged and
    /// ignored), then `coreclr_shutdown` (a non-zero status is logged), then
    /// drops bindings, their serialized form, cached imports and tracked
    /// objects. Returns `false` and does nothing when no host is live, so it
    /// is safe to call from both an exit hook and a signal path.
    pub fn teardown(&self) -> bool {
        if !self.shared.live.swap(false, Ordering::SeqCst) {
            return false;
        }

        let host = lock(&self.shared.host).take();
        if let Some(host) = host {
            if let Some((name, address)) = &host.unload {
                let signature = Signature::new(WireType::Void, Vec::new());
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| unsafe { call_address(name, &signature, *address, Vec::new()) }));
                match outcome {
                    Ok(Ok(_)) => debug!("Called {}", name),
                    Ok(Err(e)) => warn!("Unload hook {} failed: {}", name, e),
                    Err(_) => warn!("Unload hook {} panicked", name),
                }
            }

            match host.clr.shutdown(host.instance) {
                Ok(()) => info!("Core CLR shut down"),
                Err(status) => warn!("Core CLR shutdown (code={:#x})", status),
            }
        }

        lock(&self.shared.outbound).clear();
        *lock(&self.shared.bindings_json) = None;
        self.shared.imports.clear();
        self.shared.objects.clear();
        HOST_LOADED.store(false, Ordering::SeqCst);
        lifecycle::release_exit_hook(self);
        true
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("loaded", &self.is_loaded())
            .field("bindings", &lock(&self.shared.outbound).len())
            .field("resolved_imports", &self.resolved_import_count())
            .finish()
    }
}

fn cstring(what: &str, value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| BridgeError::InteriorNul(what.to_string()))
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    cstring("executable path", &path.to_string_lossy())
}
