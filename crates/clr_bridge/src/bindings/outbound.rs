//! Native functions exported to managed code.
//!
//! Each binding pairs a Rust callable with a declared [`Signature`]. A libffi
//! closure built from that signature gives the binding a plain C function
//! address, and the `name → address` map is what the managed bootstrapper
//! receives at load time.

use libffi::low::{ffi_arg, ffi_cif};
use libffi::middle::Closure;
use std::collections::BTreeMap;
use std::ffi::{c_void, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, warn};

use crate::error::{BridgeError, Result};
use crate::wire::{read_arg, FromValue, IntoValue, Signature, Value, WireType};

/// Type-erased handler invoked with decoded arguments.
pub type Handler = dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync;

/// A Rust function that can be registered as an outbound binding.
///
/// Implemented for closures and functions of up to six arguments whose
/// argument types implement [`FromValue`] and whose return type implements
/// [`IntoValue`].
pub trait NativeFn<Args>: Send + Sync + 'static {
    /// Number of arguments the function takes.
    const ARITY: usize;

    fn param_types() -> Vec<WireType>;

    fn return_type() -> WireType;

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value>;
}

macro_rules! impl_native_fn {
    ($count:expr; $($arg:ident $var:ident),*) => {
        impl<Func, Ret, $($arg,)*> NativeFn<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + Send + Sync + 'static,
            Ret: IntoValue,
            $($arg: FromValue,)*
        {
            const ARITY: usize = $count;

            fn param_types() -> Vec<WireType> {
                vec![$(<$arg as FromValue>::WIRE),*]
            }

            fn return_type() -> WireType {
                <Ret as IntoValue>::WIRE
            }

            #[allow(unused_mut, unused_variables)]
            fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
                if args.len() != $count {
                    return Err(BridgeError::ArgumentCount {
                        name: name.to_string(),
                        expected: $count,
                        actual: args.len(),
                    });
                }
                let mut args = args.into_iter();
                $(
                    let $var = match args.next() {
                        Some(value) => <$arg as FromValue>::from_value(name, value)?,
                        None => unreachable!(),
                    };
                )*
                Ok((self)($($var),*).into_value())
            }
        }
    };
}

impl_native_fn!(0;);
impl_native_fn!(1; A1 a1);
impl_native_fn!(2; A1 a1, A2 a2);
impl_native_fn!(3; A1 a1, A2 a2, A3 a3);
impl_native_fn!(4; A1 a1, A2 a2, A3 a3, A4 a4);
impl_native_fn!(5; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_native_fn!(6; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);

/// State reachable from the libffi trampoline.
struct AdapterState {
    name: String,
    signature: Signature,
    handler: Arc<Handler>,
    /// Last string handed back to managed code. Valid until the next call.
    last_string: Mutex<Option<CString>>,
}

/// A C-callable entry point for one binding.
///
/// Adapters are never freed. A cleared registry moves them to [`RETIRED`],
/// because managed code or a binding further up the stack may still be
/// executing inside the closure.
struct NativeAdapter {
    _closure: Closure<'static>,
    address: usize,
}

// SAFETY: the closure's code and cif are immutable after construction and the
// only mutable adapter state sits behind a Mutex.
unsafe impl Send for NativeAdapter {}
unsafe impl Sync for NativeAdapter {}

impl NativeAdapter {
    fn new(name: &str, signature: &Signature, handler: Arc<Handler>) -> Self {
        let state: &'static AdapterState = Box::leak(Box::new(AdapterState {
            name: name.to_string(),
            signature: signature.clone(),
            handler,
            last_string: Mutex::new(None),
        }));
        let closure = Closure::new(signature.cif(), trampoline, state);
        let address = *closure.code_ptr() as usize;
        Self {
            _closure: closure,
            address,
        }
    }
}

/// Adapters of cleared registries, kept for the life of the process.
static RETIRED: Mutex<Vec<NativeAdapter>> = Mutex::new(Vec::new());

fn retire(adapters: impl IntoIterator<Item = NativeAdapter>) {
    RETIRED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .extend(adapters);
}

/// Number of adapters retired so far in this process.
pub fn retired_adapter_count() -> usize {
    RETIRED.lock().unwrap_or_else(PoisonError::into_inner).len()
}

unsafe extern "C" fn trampoline(
    _cif: &ffi_cif,
    result: &mut ffi_arg,
    args: *const *const c_void,
    state: &AdapterState,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| unsafe { dispatch(state, args) }));
    let value = match outcome {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            error!("Binding {} failed: {}", state.name, e);
            Value::Void
        }
        Err(_) => {
            error!("Binding {} panicked", state.name);
            Value::Void
        }
    };
    unsafe { write_result(state, result, value) };
}

unsafe fn dispatch(state: &AdapterState, args: *const *const c_void) -> Result<Value> {
    let mut values = Vec::with_capacity(state.signature.params.len());
    for (i, ty) in state.signature.params.iter().enumerate() {
        values.push(read_arg(&state.name, *ty, *args.add(i))?);
    }
    (state.handler)(values)
}

/// Writes `value` into the return slot. Integral returns are widened to a
/// full `ffi_arg`; a failed call yields zero of the declared type.
unsafe fn write_result(state: &AdapterState, result: &mut ffi_arg, value: Value) {
    match (state.signature.returns, value) {
        (WireType::Void, _) => {}
        (WireType::Int8, Value::Int8(v)) => *result = v as i64 as ffi_arg,
        (WireType::UInt8, Value::UInt8(v)) => *result = v as ffi_arg,
        (WireType::Int32, Value::Int32(v)) => *result = v as i64 as ffi_arg,
        (WireType::UInt32, Value::UInt32(v)) => *result = v as ffi_arg,
        (WireType::Float32, Value::Float32(v)) => {
            *(result as *mut ffi_arg as *mut f32) = v;
        }
        (WireType::Pointer, Value::Pointer(v)) => *result = v as ffi_arg,
        (WireType::Utf8String, Value::Str(s)) => {
            let ptr = match CString::new(s) {
                Ok(encoded) => {
                    let mut slot = state
                        .last_string
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    let ptr = encoded.as_ptr();
                    *slot = Some(encoded);
                    ptr
                }
                Err(_) => {
                    warn!("Binding {} returned a string with an interior NUL", state.name);
                    std::ptr::null()
                }
            };
            *result = ptr as usize as ffi_arg;
        }
        (WireType::Float32, _) => *(result as *mut ffi_arg as *mut f32) = 0.0,
        _ => *result = 0,
    }
}

/// One registered native function.
pub struct OutboundBinding {
    name: String,
    signature: Signature,
    handler: Arc<Handler>,
    adapter: NativeAdapter,
}

impl OutboundBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// C-callable address handed to managed code.
    pub fn address(&self) -> usize {
        self.adapter.address
    }

    /// Invokes the wrapped function directly with already decoded arguments.
    pub fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        self.signature.check_args(&self.name, &args)?;
        (self.handler)(args)
    }

    pub(crate) fn handler(&self) -> Arc<Handler> {
        self.handler.clone()
    }
}

impl std::fmt::Debug for OutboundBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundBinding")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}

/// Registry of native functions callable from managed code.
#[derive(Debug, Default)]
pub struct OutboundRegistry {
    bindings: BTreeMap<String, OutboundBinding>,
}

impl OutboundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name` with the declared `signature`.
    ///
    /// The declared parameter count must equal the function's arity and
    /// every declared tag must match the Rust argument and return types.
    pub fn register<Args, F>(&mut self, name: &str, signature: Signature, function: F) -> Result<&OutboundBinding>
    where
        F: NativeFn<Args>,
    {
        signature.validate(name)?;
        if signature.arity() != F::ARITY {
            return Err(BridgeError::ArityMismatch {
                name: name.to_string(),
                declared: signature.arity(),
                actual: F::ARITY,
            });
        }
        for (declared, actual) in signature.params.iter().zip(F::param_types()) {
            if *declared != actual {
                return Err(BridgeError::TypeMismatch {
                    name: name.to_string(),
                    expected: *declared,
                    actual,
                });
            }
        }
        if signature.returns != F::return_type() {
            return Err(BridgeError::TypeMismatch {
                name: name.to_string(),
                expected: signature.returns,
                actual: F::return_type(),
            });
        }

        let owned_name = name.to_string();
        let handler: Arc<Handler> = Arc::new(move |args| function.call(&owned_name, args));
        self.insert(name, signature, handler)
    }

    fn insert(&mut self, name: &str, signature: Signature, handler: Arc<Handler>) -> Result<&OutboundBinding> {
        if self.bindings.contains_key(name) {
            return Err(BridgeError::DuplicateBinding(name.to_string()));
        }
        let adapter = NativeAdapter::new(name, &signature, handler.clone());
        debug!("Registered binding {} at {:#x} {:?}", name, adapter.address, signature);

        let binding = OutboundBinding {
            name: name.to_string(),
            signature,
            handler,
            adapter,
        };
        Ok(self.bindings.entry(name.to_string()).or_insert(binding))
    }

    pub fn get(&self, name: &str) -> Option<&OutboundBinding> {
        self.bindings.get(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundBinding> {
        self.bindings.values()
    }

    /// `name → address` for every binding.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.bindings
            .iter()
            .map(|(name, binding)| (name.clone(), binding.address() as u64))
            .collect()
    }

    /// Compact JSON object of [`OutboundRegistry::snapshot`].
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Removes every binding. Their native addresses stay callable and keep
    /// dispatching to the old handlers.
    pub fn clear(&mut self) {
        let bindings = std::mem::take(&mut self.bindings);
        if !bindings.is_empty() {
            debug!("Retiring {} binding adapters", bindings.len());
            retire(bindings.into_values().map(|binding| binding.adapter));
        }
    }
}

impl Drop for OutboundRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}
