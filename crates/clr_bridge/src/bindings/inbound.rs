//! Managed methods imported for native use.
//!
//! An import is declared up front with its target and signature, and is
//! resolved through the bridge the first time it is called. The resolved
//! function pointer is cached until the runtime is torn down.

use libffi::middle::{Cif, CodePtr};
use std::ffi::{c_char, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::bridge::BridgeShared;
use crate::error::{BridgeError, Result};
use crate::wire::{decode_c_str, FromValue, IntoValue, MarshaledArgs, Signature, Value, WireType};

/// The managed method an import points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    /// Assembly identity. `None` uses the bootstrap assembly.
    pub assembly: Option<String>,
    pub type_name: String,
    pub method: String,
}

impl ImportTarget {
    pub fn new(assembly: impl Into<String>, type_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            assembly: Some(assembly.into()),
            type_name: type_name.into(),
            method: method.into(),
        }
    }

    /// A method on a type in the bootstrap assembly.
    pub fn in_bootstrap(type_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            assembly: None,
            type_name: type_name.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for ImportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.method)
    }
}

/// Identity of a declared import, the key of the resolution cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportId(pub(crate) u64);

#[derive(Debug)]
pub(crate) struct ImportDecl {
    pub(crate) id: ImportId,
    pub(crate) name: String,
    pub(crate) target: ImportTarget,
    pub(crate) signature: Signature,
}

/// A declared managed import. Cheap to clone.
#[derive(Clone)]
pub struct Import {
    decl: Arc<ImportDecl>,
    bridge: Arc<BridgeShared>,
}

impl Import {
    pub(crate) fn new(decl: ImportDecl, bridge: Arc<BridgeShared>) -> Self {
        Self {
            decl: Arc::new(decl),
            bridge,
        }
    }

    pub fn id(&self) -> ImportId {
        self.decl.id
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn target(&self) -> &ImportTarget {
        &self.decl.target
    }

    pub fn signature(&self) -> &Signature {
        &self.decl.signature
    }

    /// Whether a function pointer is currently cached for this import.
    pub fn is_resolved(&self) -> bool {
        self.bridge.cached_import(self.decl.id).is_some()
    }

    /// Calls the managed method.
    ///
    /// Checks the argument count and types, resolves the method on first use
    /// (which requires a live host), encodes text arguments as UTF-8 and
    /// decodes a text return value.
    ///
    /// # Arguments
    ///
    /// * `args` - One value per declared parameter, in order
    ///
    /// # Returns
    ///
    /// The decoded return value, [`Value::Void`] for a void method.
    /// [`BridgeError::ArgumentCount`] and [`BridgeError::TypeMismatch`] are
    /// raised before any native call; [`BridgeError::HostNotLoaded`] when
    /// the method is unresolved and no host is live.
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        self.decl.signature.check_args(&self.decl.name, &args)?;
        let address = self.bridge.resolve_import(&self.decl)?;
        unsafe { call_address(&self.decl.name, &self.decl.signature, address, args) }
    }
}

impl fmt::Debug for Import {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Import")
            .field("name", &self.decl.name)
            .field("target", &self.decl.target)
            .field("signature", &self.decl.signature)
            .finish()
    }
}

/// Argument tuples accepted by [`TypedImport::call`].
///
/// Implemented for tuples of up to six [`IntoValue`] types, `()` included.
pub trait IntoArgs {
    const ARITY: usize;

    fn wire_types() -> Vec<WireType>;

    fn into_values(self) -> Vec<Value>;
}

macro_rules! impl_into_args {
    ($count:expr; $($arg:ident $var:ident),*) => {
        impl<$($arg: IntoValue,)*> IntoArgs for ($($arg,)*) {
            const ARITY: usize = $count;

            fn wire_types() -> Vec<WireType> {
                vec![$(<$arg as IntoValue>::WIRE),*]
            }

            fn into_values(self) -> Vec<Value> {
                let ($($var,)*) = self;
                vec![$($var.into_value()),*]
            }
        }
    };
}

impl_into_args!(0;);
impl_into_args!(1; A1 a1);
impl_into_args!(2; A1 a1, A2 a2);
impl_into_args!(3; A1 a1, A2 a2, A3 a3);
impl_into_args!(4; A1 a1, A2 a2, A3 a3, A4 a4);
impl_into_args!(5; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_into_args!(6; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);

/// An import with its argument tuple and return type fixed in Rust.
pub struct TypedImport<A, R> {
    inner: Import,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for TypedImport<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: IntoArgs, R: FromValue> TypedImport<A, R> {
    /// Checks that the declared signature matches `A` and `R`.
    pub(crate) fn wrap(inner: Import) -> Result<Self> {
        let signature = inner.signature();
        if signature.arity() != A::ARITY {
            return Err(BridgeError::ArityMismatch {
                name: inner.name().to_string(),
                declared: signature.arity(),
                actual: A::ARITY,
            });
        }
        for (declared, actual) in signature.params.iter().zip(A::wire_types()) {
            if *declared != actual {
                return Err(BridgeError::TypeMismatch {
                    name: inner.name().to_string(),
                    expected: *declared,
                    actual,
                });
            }
        }
        if signature.returns != R::WIRE {
            return Err(BridgeError::TypeMismatch {
                name: inner.name().to_string(),
                expected: signature.returns,
                actual: R::WIRE,
            });
        }
        Ok(Self {
            inner,
            _marker: PhantomData,
        })
    }

    /// Calls the managed method with a typed argument tuple.
    ///
    /// # Arguments
    ///
    /// * `args` - Argument tuple, e.g. `(address, player_id)`
    ///
    /// # Returns
    ///
    /// The return value converted to `R`, or the same errors as
    /// [`Import::call`].
    pub fn call(&self, args: A) -> Result<R> {
        let value = self.inner.call(args.into_values())?;
        R::from_value(self.inner.name(), value)
    }

    /// The untyped import underneath.
    pub fn import(&self) -> &Import {
        &self.inner
    }
}

impl<A, R> fmt::Debug for TypedImport<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// Calls the C function at `address` with `signature`.
///
/// # Safety
///
/// `address` must be a live function whose native signature matches
/// `signature`.
pub(crate) unsafe fn call_address(
    name: &str,
    signature: &Signature,
    address: usize,
    args: Vec<Value>,
) -> Result<Value> {
    let encoded = MarshaledArgs::encode(name, args)?;
    let ffi_args = encoded.args();
    let cif: Cif = signature.cif();
    let code = CodePtr::from_ptr(address as *const c_void);

    Ok(match signature.returns {
        WireType::Void => {
            cif.call::<()>(code, &ffi_args);
            Value::Void
        }
        WireType::Int8 => Value::Int8(cif.call::<i8>(code, &ffi_args)),
        WireType::UInt8 => Value::UInt8(cif.call::<u8>(code, &ffi_args)),
        WireType::Int32 => Value::Int32(cif.call::<i32>(code, &ffi_args)),
        WireType::UInt32 => Value::UInt32(cif.call::<u32>(code, &ffi_args)),
        WireType::Float32 => Value::Float32(cif.call::<f32>(code, &ffi_args)),
        WireType::Pointer => Value::Pointer(cif.call::<*const c_void>(code, &ffi_args) as usize),
        WireType::Utf8String => {
            let returned = cif.call::<*const c_char>(code, &ffi_args);
            Value::Str(decode_c_str(name, returned)?)
        }
    })
}
