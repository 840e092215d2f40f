//! End-to-end load → call → teardown against an in-process fake runtime.
//!
//! The fake host hands out addresses of real `extern "C"` functions standing
//! in for managed methods, so every call goes through the same libffi paths
//! as a real runtime would.

use clr_bridge::host::{library_file_name, TRUSTED_PLATFORM_ASSEMBLIES};
use clr_bridge::lifecycle;
use clr_bridge::{
    Bridge, BridgeError, ClrHost, HostEnvironment, HostInstance, HostLoader, ImportTarget, RuntimeCatalog,
    RuntimeDescriptor, RuntimeVersion, Signature, Value, WireType,
};
use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;

// Only one host may be live per process.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Managed stand-ins
// ============================================================================

static LOADED_JSON: Mutex<Option<String>> = Mutex::new(None);
static UNLOAD_CALLS: AtomicUsize = AtomicUsize::new(0);

extern "C" fn on_load(json: *const c_char) {
    let text = unsafe { CStr::from_ptr(json) }.to_string_lossy().into_owned();
    *LOADED_JSON.lock().unwrap_or_else(|e| e.into_inner()) = Some(text);
}

extern "C" fn on_unload() {
    UNLOAD_CALLS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn get_test_string() -> *const c_char {
    b"hello from managed\0".as_ptr() as *const c_char
}

extern "C" fn on_pre_player_connect(address: *const c_char) -> u8 {
    let address = unsafe { CStr::from_ptr(address) }.to_str().unwrap_or("");
    if address.starts_with("10.") {
        0
    } else {
        2
    }
}

/// Calls the `echo_length` binding through the address handed over at load.
extern "C" fn call_native_echo(text: *const c_char) -> i32 {
    let json = LOADED_JSON
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .unwrap_or_default();
    let map: HashMap<String, u64> = serde_json::from_str(&json).unwrap_or_default();
    let Some(address) = map.get("echo_length") else {
        return -1;
    };
    let echo: extern "C" fn(*const c_char) -> i32 = unsafe { std::mem::transmute(*address as usize) };
    echo(text)
}

const TYPE_LOAD_FAILURE: i32 = 0x8013_1522u32 as i32;

#[derive(Default)]
struct FakeHost {
    delegates: HashMap<String, usize>,
    init_status: i32,
    shutdown_status: i32,
    properties: Mutex<Vec<(String, String)>>,
    domain: Mutex<Option<String>>,
    requests: Mutex<Vec<(String, String, String)>>,
    shutdowns: AtomicUsize,
}

impl FakeHost {
    fn new() -> Self {
        Self::default()
            .with_delegate("Spadecs.Bootstrapper", "OnLoad", on_load as usize)
            .with_delegate("Spadecs.Bootstrapper", "OnUnload", on_unload as usize)
            .with_delegate("Spadecs.Bootstrapper", "CallNativeEcho", call_native_echo as usize)
            .with_delegate("Spadecs.EventManager", "GetTestString", get_test_string as usize)
            .with_delegate("Spadecs.EventManager", "OnPrePlayerConnect", on_pre_player_connect as usize)
    }

    fn with_delegate(mut self, type_name: &str, method: &str, address: usize) -> Self {
        self.delegates.insert(format!("{type_name}.{method}"), address);
        self
    }

    fn without_delegate(mut self, type_name: &str, method: &str) -> Self {
        self.delegates.remove(&format!("{type_name}.{method}"));
        self
    }

    fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl ClrHost for FakeHost {
    fn initialize(
        &self,
        _exe_path: &CStr,
        domain_name: &CStr,
        property_keys: &[&CStr],
        property_values: &[&CStr],
    ) -> Result<HostInstance, i32> {
        if self.init_status != 0 {
            return Err(self.init_status);
        }
        *self.domain.lock().unwrap() = Some(domain_name.to_string_lossy().into_owned());
        let mut properties = self.properties.lock().unwrap();
        for (key, value) in property_keys.iter().zip(property_values) {
            properties.push((
                key.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            ));
        }
        Ok(HostInstance {
            handle: 0xC0FFEE,
            domain_id: 1,
        })
    }

    fn create_delegate(
        &self,
        instance: HostInstance,
        assembly: &CStr,
        type_name: &CStr,
        method: &CStr,
    ) -> Result<usize, i32> {
        assert_eq!(instance.handle, 0xC0FFEE);
        let type_name = type_name.to_string_lossy().into_owned();
        let method = method.to_string_lossy().into_owned();
        self.requests.lock().unwrap().push((
            assembly.to_string_lossy().into_owned(),
            type_name.clone(),
            method.clone(),
        ));
        self.delegates
            .get(&format!("{type_name}.{method}"))
            .copied()
            .ok_or(TYPE_LOAD_FAILURE)
    }

    fn shutdown(&self, _instance: HostInstance) -> Result<(), i32> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.shutdown_status != 0 {
            Err(self.shutdown_status)
        } else {
            Ok(())
        }
    }
}

struct FixedCatalog {
    runtimes: Vec<RuntimeDescriptor>,
    calls: Arc<AtomicUsize>,
}

impl RuntimeCatalog for FixedCatalog {
    fn list_runtimes(&self) -> clr_bridge::Result<Vec<RuntimeDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.runtimes.clone())
    }
}

// ============================================================================
// Fixture
// ============================================================================

const INSTALLED: [&str; 2] = ["5.0.3", "5.0.11"];

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    assembly: PathBuf,
    listing_calls: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_runtimes(&INSTALLED, true)
    }

    fn with_runtimes(versions: &[&str], with_library: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("dotnet");
        for version in versions {
            let runtime = root.join("shared").join("Microsoft.NETCore.App").join(version);
            std::fs::create_dir_all(&runtime).unwrap();
            for file in ["System.Runtime.dll", "System.Private.CoreLib.dll"] {
                std::fs::write(runtime.join(file), b"").unwrap();
            }
            if with_library {
                std::fs::write(runtime.join(library_file_name("coreclr")), b"").unwrap();
            }
        }

        let app = dir.path().join("app");
        std::fs::create_dir_all(&app).unwrap();
        let assembly = app.join("Spadecs.Boot.dll");
        std::fs::write(&assembly, b"").unwrap();
        std::fs::write(app.join("Spadecs.dll"), b"").unwrap();

        Self {
            _dir: dir,
            root,
            assembly,
            listing_calls: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn environment(&self) -> HostEnvironment {
        HostEnvironment::empty().with_var("DOTNET_ROOT", self.root.to_string_lossy())
    }

    fn catalog(&self, versions: &[&str]) -> FixedCatalog {
        let shared = self.root.join("shared").join("Microsoft.NETCore.App");
        FixedCatalog {
            runtimes: versions
                .iter()
                .map(|version| RuntimeDescriptor {
                    name: "Microsoft.NETCore.App".to_string(),
                    version: version.to_string(),
                    install_path: shared.join(version),
                })
                .collect(),
            calls: self.listing_calls.clone(),
        }
    }

    fn loader(&self, host: &Arc<FakeHost>) -> HostLoader {
        self.loader_with(host, self.environment(), &INSTALLED)
    }

    fn loader_with(&self, host: &Arc<FakeHost>, environment: HostEnvironment, listed: &[&str]) -> HostLoader {
        let host = host.clone();
        let opened = self.opened.clone();
        HostLoader::new(&self.assembly, "Spadecs.Boot, Version=1.0.0.0", "Spadecs.Bootstrapper")
            .with_environment(environment)
            .with_catalog(self.catalog(listed))
            .with_library_opener(move |_path: &Path| {
                opened.fetch_add(1, Ordering::SeqCst);
                Ok(host.clone() as Arc<dyn ClrHost>)
            })
    }
}

fn echo_bridge() -> Bridge {
    let bridge = Bridge::new();
    bridge
        .register_outbound(
            "echo_length",
            Signature::new(WireType::Int32, [WireType::Utf8String]),
            |text: String| text.len() as i32,
        )
        .unwrap();
    bridge
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_load_call_and_teardown() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());
    let bridge = echo_bridge();
    let unloads_before = UNLOAD_CALLS.load(Ordering::SeqCst);

    let resolver = bridge.load_host(fixture.loader(&host)).unwrap();
    assert!(bridge.is_loaded());
    assert!(Bridge::host_loaded_in_process());
    assert!(resolver.is_live());
    assert!(lifecycle::has_exit_target());

    // Newest qualifying runtime wins: 5.0.11 over 5.0.3.
    let runtime_dir = bridge.runtime_dir().unwrap();
    assert!(runtime_dir.ends_with("5.0.11"));

    // The load entry point received the outbound binding map.
    let address = bridge.binding("echo_length").unwrap().address;
    let expected = format!("{{\"echo_length\":{address}}}");
    assert_eq!(bridge.bindings_json().as_deref(), Some(expected.as_str()));
    assert_eq!(
        LOADED_JSON.lock().unwrap_or_else(|e| e.into_inner()).as_deref(),
        Some(expected.as_str())
    );

    // Initialization received the trusted assembly list.
    {
        let properties = host.properties.lock().unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].0, TRUSTED_PLATFORM_ASSEMBLIES);
        let tpa = &properties[0].1;
        assert!(tpa.contains("System.Runtime.dll"));
        assert!(tpa.contains("Spadecs.Boot.dll"));
        assert!(tpa.contains("Spadecs.dll"));
        assert_eq!(host.domain.lock().unwrap().as_deref(), Some("DefaultDomain"));
    }

    let get_test_string = bridge
        .declare_import::<(), String>(
            "GetTestString",
            ImportTarget::new("Spadecs, Version=1.0.0.0", "Spadecs.EventManager", "GetTestString"),
            Signature::new(WireType::Utf8String, Vec::new()),
        )
        .unwrap();
    assert!(!get_test_string.import().is_resolved());
    assert_eq!(get_test_string.call(()).unwrap(), "hello from managed");
    assert!(get_test_string.import().is_resolved());
    assert_eq!(get_test_string.call(()).unwrap(), "hello from managed");

    // Resolved once, then served from the cache.
    let lookups = host
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, _, method)| method == "GetTestString")
        .count();
    assert_eq!(lookups, 1);

    // Managed code calling back into a native binding.
    let call_native_echo = bridge
        .declare_import::<(String,), i32>(
            "CallNativeEcho",
            ImportTarget::in_bootstrap("Spadecs.Bootstrapper", "CallNativeEcho"),
            Signature::new(WireType::Int32, [WireType::Utf8String]),
        )
        .unwrap();
    assert_eq!(call_native_echo.call(("héllo".to_string(),)).unwrap(), 6);

    {
        let requests = host.requests.lock().unwrap();
        let assembly_of = |method: &str| {
            requests
                .iter()
                .find(|(_, _, m)| m == method)
                .map(|(assembly, _, _)| assembly.clone())
                .unwrap()
        };
        assert_eq!(assembly_of("OnLoad"), "Spadecs.Boot, Version=1.0.0.0");
        assert_eq!(assembly_of("CallNativeEcho"), "Spadecs.Boot, Version=1.0.0.0");
        assert_eq!(assembly_of("GetTestString"), "Spadecs, Version=1.0.0.0");
    }

    assert!(bridge.teardown());
    assert_eq!(UNLOAD_CALLS.load(Ordering::SeqCst), unloads_before + 1);
    assert_eq!(host.shutdowns(), 1);
    assert!(!bridge.is_loaded());
    assert!(!Bridge::host_loaded_in_process());
    assert!(!lifecycle::has_exit_target());
    assert!(!lifecycle::run_exit_teardown());

    // Everything was released and nothing is called twice.
    assert!(!bridge.teardown());
    assert_eq!(host.shutdowns(), 1);
    assert_eq!(UNLOAD_CALLS.load(Ordering::SeqCst), unloads_before + 1);
    assert!(bridge.outbound_snapshot().is_empty());
    assert!(bridge.bindings_json().is_none());
    assert_eq!(bridge.resolved_import_count(), 0);
    assert!(!get_test_string.import().is_resolved());
    assert!(matches!(get_test_string.call(()), Err(BridgeError::HostNotLoaded)));
    assert!(matches!(
        resolver.resolve("Spadecs.EventManager", "GetTestString", None),
        Err(BridgeError::HostNotLoaded)
    ));
}

#[test]
fn test_second_load_is_rejected() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());
    let first = Bridge::new();
    let second = Bridge::new();

    first.load_host(fixture.loader(&host)).unwrap();
    assert!(matches!(
        second.load_host(fixture.loader(&host)),
        Err(BridgeError::HostAlreadyLoaded)
    ));
    assert!(matches!(
        first.load_host(fixture.loader(&host)),
        Err(BridgeError::HostAlreadyLoaded)
    ));
    assert!(first.is_loaded());
    assert!(!second.is_loaded());

    // Teardown frees the slot for a new load.
    assert!(first.teardown());
    second.load_host(fixture.loader(&host)).unwrap();
    assert!(second.teardown());
    assert_eq!(host.shutdowns(), 2);
}

#[test]
fn test_missing_runtime_fails_before_opening_library() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());
    let bridge = Bridge::new();

    let result = bridge.load_host(fixture.loader_with(&host, HostEnvironment::empty(), &INSTALLED));
    assert!(matches!(result, Err(BridgeError::RuntimeNotInstalled)));
    assert_eq!(fixture.opened.load(Ordering::SeqCst), 0);
    assert!(!Bridge::host_loaded_in_process());
}

#[test]
fn test_missing_assembly() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());
    std::fs::remove_file(&fixture.assembly).unwrap();

    let result = Bridge::new().load_host(fixture.loader(&host));
    match result {
        Err(BridgeError::AssemblyMissing(path)) => assert_eq!(path, fixture.assembly),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(fixture.listing_calls.load(Ordering::SeqCst), 0);
    assert!(!Bridge::host_loaded_in_process());
}

#[test]
fn test_runtime_version_too_low() {
    let _guard = serial();
    let fixture = Fixture::with_runtimes(&["3.1.22"], true);
    let host = Arc::new(FakeHost::new());

    let result = Bridge::new().load_host(fixture.loader_with(&host, fixture.environment(), &["3.1.22"]));
    match result {
        Err(BridgeError::RuntimeVersionTooLow(min)) => assert_eq!(min, "5.0.0"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(fixture.opened.load(Ordering::SeqCst), 0);

    // The same install qualifies once the floor is lowered.
    let bridge = Bridge::new();
    bridge
        .load_host(
            fixture
                .loader_with(&host, fixture.environment(), &["3.1.22"])
                .with_min_version(RuntimeVersion::new(3, 1, 0)),
        )
        .unwrap();
    assert!(bridge.runtime_dir().unwrap().ends_with("3.1.22"));
    assert!(bridge.teardown());
}

#[test]
fn test_missing_host_library() {
    let _guard = serial();
    let fixture = Fixture::with_runtimes(&INSTALLED, false);
    let host = Arc::new(FakeHost::new());

    let result = Bridge::new().load_host(fixture.loader(&host));
    match result {
        Err(BridgeError::HostLibraryMissing(path)) => {
            assert!(path.ends_with(library_file_name("coreclr")));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(fixture.opened.load(Ordering::SeqCst), 0);
    assert!(!Bridge::host_loaded_in_process());
}

#[test]
fn test_pinned_version_skips_listing() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());
    let environment = fixture.environment().with_var("DOTNETRUNTIMEVERSION", "5.0.3");

    let bridge = Bridge::new();
    bridge.load_host(fixture.loader_with(&host, environment, &INSTALLED)).unwrap();
    assert!(bridge.runtime_dir().unwrap().ends_with("5.0.3"));
    assert_eq!(fixture.listing_calls.load(Ordering::SeqCst), 0);
    assert!(bridge.teardown());
}

#[test]
fn test_initialize_failure_releases_guard() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost {
        init_status: TYPE_LOAD_FAILURE,
        ..FakeHost::new()
    });

    let bridge = Bridge::new();
    match bridge.load_host(fixture.loader(&host)) {
        Err(BridgeError::Initialize(status)) => assert_eq!(status, TYPE_LOAD_FAILURE),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!bridge.is_loaded());
    assert!(!Bridge::host_loaded_in_process());
    assert_eq!(host.shutdowns(), 0);
}

#[test]
fn test_missing_entry_point_shuts_host_down() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new().without_delegate("Spadecs.Bootstrapper", "OnUnload"));

    let bridge = echo_bridge();
    match bridge.load_host(fixture.loader(&host)) {
        Err(BridgeError::CreateDelegate {
            type_name,
            method,
            status,
        }) => {
            assert_eq!(type_name, "Spadecs.Bootstrapper");
            assert_eq!(method, "OnUnload");
            assert_eq!(status, TYPE_LOAD_FAILURE);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(host.shutdowns(), 1);
    assert!(!bridge.is_loaded());
    assert!(!Bridge::host_loaded_in_process());
    assert!(bridge.outbound_snapshot().is_empty());
}

#[test]
fn test_failing_shutdown_is_not_escalated() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost {
        shutdown_status: -1,
        ..FakeHost::new()
    });

    let bridge = Bridge::new();
    bridge.load_host(fixture.loader(&host)).unwrap();
    assert!(bridge.teardown());
    assert_eq!(host.shutdowns(), 1);
    assert!(!Bridge::host_loaded_in_process());
}

#[test]
fn test_import_before_load_and_argument_checks() {
    let _guard = serial();
    let bridge = Bridge::new();
    let pre_connect = bridge
        .declare_inbound(
            "OnPrePlayerConnect",
            ImportTarget::new("Spadecs, Version=1.0.0.0", "Spadecs.EventManager", "OnPrePlayerConnect"),
            Signature::new(WireType::UInt8, [WireType::Utf8String]),
        )
        .unwrap();

    assert!(matches!(
        pre_connect.call(vec![Value::Str("10.0.0.1:32887".into())]),
        Err(BridgeError::HostNotLoaded)
    ));
    assert!(matches!(
        pre_connect.call(vec![]),
        Err(BridgeError::ArgumentCount { expected: 1, actual: 0, .. })
    ));

    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());
    bridge.load_host(fixture.loader(&host)).unwrap();
    assert_eq!(
        pre_connect.call(vec![Value::Str("10.0.0.1:32887".into())]).unwrap(),
        Value::UInt8(0)
    );
    assert_eq!(
        pre_connect.call(vec![Value::Str("192.168.1.4:32887".into())]).unwrap(),
        Value::UInt8(2)
    );
    assert!(matches!(
        pre_connect.call(vec![Value::Int32(1)]),
        Err(BridgeError::TypeMismatch { .. })
    ));

    // Declared tuple must agree with the signature.
    let mismatched = bridge.declare_import::<(String, u8), u8>(
        "OnPrePlayerConnect",
        ImportTarget::new("Spadecs, Version=1.0.0.0", "Spadecs.EventManager", "OnPrePlayerConnect"),
        Signature::new(WireType::UInt8, [WireType::Utf8String]),
    );
    assert!(matches!(mismatched, Err(BridgeError::ArityMismatch { .. })));

    assert!(bridge.teardown());
}

#[test]
fn test_tracked_objects_cleared_at_teardown() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());
    let bridge = Bridge::new();
    bridge.load_host(fixture.loader(&host)).unwrap();

    let protocol = Arc::new(String::from("protocol"));
    assert!(bridge.track(&protocol, Some("protocol")));
    assert_eq!(bridge.find::<String>("protocol").as_deref(), Some(&protocol.to_string()));

    assert!(bridge.teardown());
    assert!(bridge.find::<String>("protocol").is_none());
    assert_eq!(Arc::strong_count(&protocol), 1);
}

const STOPPED: i32 = 17;

fn stopping_bridge() -> Bridge {
    let bridge = Bridge::new();
    let handle = bridge.clone();
    bridge
        .register_outbound("stop_server", Signature::new(WireType::Int32, Vec::new()), move || {
            assert!(handle.teardown());
            // Churn the allocator so freed adapter memory would be reused.
            let scratch: Vec<Vec<u8>> = (0..64).map(|i| vec![i as u8; 256]).collect();
            STOPPED + scratch.len() as i32 - 64
        })
        .unwrap();
    bridge
}

#[test]
fn test_teardown_from_inside_binding_then_reload() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());

    let bridge = stopping_bridge();
    bridge.load_host(fixture.loader(&host)).unwrap();
    let address = bridge.binding("stop_server").unwrap().address;

    let stop: extern "C" fn() -> i32 = unsafe { std::mem::transmute(address) };
    assert_eq!(stop(), STOPPED);
    assert!(!bridge.is_loaded());
    assert!(!Bridge::host_loaded_in_process());
    assert_eq!(host.shutdowns(), 1);
    assert!(bridge.binding("stop_server").is_none());

    // The same process can bring a fresh bridge up and stop it again.
    let next = stopping_bridge();
    next.load_host(fixture.loader(&host)).unwrap();
    let address = next.binding("stop_server").unwrap().address;
    let stop: extern "C" fn() -> i32 = unsafe { std::mem::transmute(address) };
    assert_eq!(stop(), STOPPED);
    assert_eq!(host.shutdowns(), 2);
    assert!(!Bridge::host_loaded_in_process());
}

#[cfg(unix)]
#[test]
fn test_default_catalog_runs_launcher_in_root() {
    use std::os::unix::fs::PermissionsExt;

    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());

    // Only 5.0.3 is listed, so the newer directory on disk is not picked.
    let shared = fixture.root.join("shared").join("Microsoft.NETCore.App");
    let launcher = fixture.root.join("dotnet");
    std::fs::write(
        &launcher,
        format!(
            "#!/bin/sh\necho \"Microsoft.NETCore.App 5.0.3 [{}]\"\n",
            shared.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();

    let opener_host = host.clone();
    let loader = HostLoader::new(&fixture.assembly, "Spadecs.Boot, Version=1.0.0.0", "Spadecs.Bootstrapper")
        .with_environment(fixture.environment())
        .with_library_opener(move |_path: &Path| Ok(opener_host.clone() as Arc<dyn ClrHost>));

    let bridge = Bridge::new();
    bridge.load_host(loader).unwrap();
    assert!(bridge.runtime_dir().unwrap().ends_with("5.0.3"));
    assert!(bridge.teardown());
}

#[test]
fn test_default_catalog_without_launcher_is_fatal() {
    let _guard = serial();
    let fixture = Fixture::new();
    let host = Arc::new(FakeHost::new());
    let environment = fixture.environment().with_search_path(fixture.root.join("no-such-bin"));

    let opener_host = host.clone();
    let loader = HostLoader::new(&fixture.assembly, "Spadecs.Boot, Version=1.0.0.0", "Spadecs.Bootstrapper")
        .with_environment(environment)
        .with_library_opener(move |_path: &Path| Ok(opener_host.clone() as Arc<dyn ClrHost>));

    let result = Bridge::new().load_host(loader);
    assert!(matches!(result, Err(BridgeError::RuntimeListing { .. })));
    assert_eq!(fixture.opened.load(Ordering::SeqCst), 0);
    assert!(!Bridge::host_loaded_in_process());
}
