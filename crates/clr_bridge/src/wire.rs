//! Primitive wire types that may cross the native/managed boundary.
//!
//! Only a closed set of C-compatible types is marshaled. Every signature is a
//! list of [`WireType`] tags fixed when a binding or import is declared, and
//! every value crossing the boundary is carried as a [`Value`] with the
//! matching variant.

use libffi::middle::{Arg, Cif, Type};
use serde::{Deserialize, Serialize};
use std::ffi::{c_char, c_void, CStr, CString};

use crate::error::{BridgeError, Result};

/// Primitive type tag for one parameter or return slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireType {
    Int8,
    UInt8,
    Int32,
    UInt32,
    Float32,
    Pointer,
    /// NUL-terminated UTF-8 text (`char*` on the wire).
    Utf8String,
    /// No value. Only legal as a return type.
    Void,
}

impl WireType {
    /// The libffi type used to describe this slot to a call interface.
    pub fn ffi_type(self) -> Type {
        match self {
            WireType::Int8 => Type::i8(),
            WireType::UInt8 => Type::u8(),
            WireType::Int32 => Type::i32(),
            WireType::UInt32 => Type::u32(),
            WireType::Float32 => Type::f32(),
            WireType::Pointer | WireType::Utf8String => Type::pointer(),
            WireType::Void => Type::void(),
        }
    }
}

/// A value tagged with its wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int8(i8),
    UInt8(u8),
    Int32(i32),
    UInt32(u32),
    Float32(f32),
    Pointer(usize),
    Str(String),
    Void,
}

impl Value {
    pub fn wire_type(&self) -> WireType {
        match self {
            Value::Int8(_) => WireType::Int8,
            Value::UInt8(_) => WireType::UInt8,
            Value::Int32(_) => WireType::Int32,
            Value::UInt32(_) => WireType::UInt32,
            Value::Float32(_) => WireType::Float32,
            Value::Pointer(_) => WireType::Pointer,
            Value::Str(_) => WireType::Utf8String,
            Value::Void => WireType::Void,
        }
    }
}

/// Return type plus ordered parameter types of a foreign function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub returns: WireType,
    pub params: Vec<WireType>,
}

impl Signature {
    pub fn new(returns: WireType, params: impl Into<Vec<WireType>>) -> Self {
        Self {
            returns,
            params: params.into(),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Rejects `Void` in parameter position.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.params.contains(&WireType::Void) {
            return Err(BridgeError::VoidParameter(name.to_string()));
        }
        Ok(())
    }

    /// Builds the libffi call interface for this signature.
    pub fn cif(&self) -> Cif {
        Cif::new(
            self.params.iter().map(|p| p.ffi_type()),
            self.returns.ffi_type(),
        )
    }

    /// Checks that `args` has the declared count and types.
    pub fn check_args(&self, name: &str, args: &[Value]) -> Result<()> {
        if args.len() != self.params.len() {
            return Err(BridgeError::ArgumentCount {
                name: name.to_string(),
                expected: self.params.len(),
                actual: args.len(),
            });
        }
        for (expected, arg) in self.params.iter().zip(args) {
            if arg.wire_type() != *expected {
                return Err(BridgeError::TypeMismatch {
                    name: name.to_string(),
                    expected: *expected,
                    actual: arg.wire_type(),
                });
            }
        }
        Ok(())
    }
}

/// Conversion from a wire [`Value`] into a Rust argument.
pub trait FromValue: Sized {
    const WIRE: WireType;

    fn from_value(name: &str, value: Value) -> Result<Self>;
}

/// Conversion from a Rust value into a wire [`Value`].
pub trait IntoValue {
    const WIRE: WireType;

    fn into_value(self) -> Value;
}

macro_rules! primitive_wire {
    ($($ty:ty => $variant:ident / $wire:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const WIRE: WireType = WireType::$wire;

                fn from_value(name: &str, value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(BridgeError::TypeMismatch {
                            name: name.to_string(),
                            expected: WireType::$wire,
                            actual: other.wire_type(),
                        }),
                    }
                }
            }

            impl IntoValue for $ty {
                const WIRE: WireType = WireType::$wire;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }
        )*
    };
}

primitive_wire! {
    i8 => Int8 / Int8,
    u8 => UInt8 / UInt8,
    i32 => Int32 / Int32,
    u32 => UInt32 / UInt32,
    f32 => Float32 / Float32,
    usize => Pointer / Pointer,
    String => Str / Utf8String,
}

impl FromValue for () {
    const WIRE: WireType = WireType::Void;

    fn from_value(name: &str, value: Value) -> Result<Self> {
        match value {
            Value::Void => Ok(()),
            other => Err(BridgeError::TypeMismatch {
                name: name.to_string(),
                expected: WireType::Void,
                actual: other.wire_type(),
            }),
        }
    }
}

impl IntoValue for () {
    const WIRE: WireType = WireType::Void;

    fn into_value(self) -> Value {
        Value::Void
    }
}

impl IntoValue for &str {
    const WIRE: WireType = WireType::Utf8String;

    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

/// Argument storage for one outgoing foreign call.
///
/// Encoded strings and scalar slots must outlive the libffi `Arg` list that
/// points into them, so both are owned here.
pub(crate) struct MarshaledArgs {
    slots: Vec<Slot>,
    _strings: Vec<CString>,
}

enum Slot {
    I8(i8),
    U8(u8),
    I32(i32),
    U32(u32),
    F32(f32),
    Ptr(*const c_void),
}

impl MarshaledArgs {
    /// Encodes `values` for a call; text arguments become UTF-8 `char*`.
    pub(crate) fn encode(name: &str, values: Vec<Value>) -> Result<Self> {
        let mut strings = Vec::new();
        let mut slots = Vec::with_capacity(values.len());
        for value in values {
            let slot = match value {
                Value::Int8(v) => Slot::I8(v),
                Value::UInt8(v) => Slot::U8(v),
                Value::Int32(v) => Slot::I32(v),
                Value::UInt32(v) => Slot::U32(v),
                Value::Float32(v) => Slot::F32(v),
                Value::Pointer(v) => Slot::Ptr(v as *const c_void),
                Value::Str(s) => {
                    let encoded =
                        CString::new(s).map_err(|_| BridgeError::InteriorNul(name.to_string()))?;
                    // The heap buffer does not move when the CString itself is moved.
                    let ptr = encoded.as_ptr() as *const c_void;
                    strings.push(encoded);
                    Slot::Ptr(ptr)
                }
                Value::Void => return Err(BridgeError::VoidParameter(name.to_string())),
            };
            slots.push(slot);
        }
        Ok(Self {
            slots,
            _strings: strings,
        })
    }

    pub(crate) fn args(&self) -> Vec<Arg> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::I8(v) => Arg::new(v),
                Slot::U8(v) => Arg::new(v),
                Slot::I32(v) => Arg::new(v),
                Slot::U32(v) => Arg::new(v),
                Slot::F32(v) => Arg::new(v),
                Slot::Ptr(v) => Arg::new(v),
            })
            .collect()
    }
}

/// Decodes a NUL-terminated UTF-8 string coming from the other side.
///
/// A null pointer decodes to the empty string.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated buffer that stays valid for
/// the duration of the call.
pub(crate) unsafe fn decode_c_str(name: &str, ptr: *const c_char) -> Result<String> {
    if ptr.is_null() {
        return Ok(String::new());
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_owned)
        .map_err(|_| BridgeError::InvalidString(name.to_string()))
}

/// Reads one incoming argument of type `ty` from a libffi argument slot.
///
/// # Safety
///
/// `slot` must point to a value laid out as `ty`.
pub(crate) unsafe fn read_arg(name: &str, ty: WireType, slot: *const c_void) -> Result<Value> {
    Ok(match ty {
        WireType::Int8 => Value::Int8(*(slot as *const i8)),
        WireType::UInt8 => Value::UInt8(*(slot as *const u8)),
        WireType::Int32 => Value::Int32(*(slot as *const i32)),
        WireType::UInt32 => Value::UInt32(*(slot as *const u32)),
        WireType::Float32 => Value::Float32(*(slot as *const f32)),
        WireType::Pointer => Value::Pointer(*(slot as *const usize)),
        WireType::Utf8String => Value::Str(decode_c_str(name, *(slot as *const *const c_char))?),
        WireType::Void => return Err(BridgeError::VoidParameter(name.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_args_counts_and_types() {
        let sig = Signature::new(WireType::Int32, [WireType::Utf8String, WireType::UInt8]);
        assert!(sig
            .check_args("f", &[Value::Str("a".into()), Value::UInt8(1)])
            .is_ok());

        match sig.check_args("f", &[Value::Str("a".into())]) {
            Err(BridgeError::ArgumentCount { expected, actual, .. }) => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(matches!(
            sig.check_args("f", &[Value::Int32(1), Value::UInt8(1)]),
            Err(BridgeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_void_parameter_rejected() {
        let sig = Signature::new(WireType::Void, [WireType::Void]);
        assert!(matches!(sig.validate("bad"), Err(BridgeError::VoidParameter(_))));
        assert!(Signature::new(WireType::Void, Vec::new()).validate("ok").is_ok());
    }

    #[test]
    fn test_from_value_rejects_wrong_variant() {
        assert_eq!(i32::from_value("f", Value::Int32(7)).unwrap(), 7);
        assert!(u8::from_value("f", Value::Int32(7)).is_err());
        assert_eq!(
            String::from_value("f", Value::Str("x".into())).unwrap(),
            "x"
        );
    }

    #[test]
    fn test_interior_nul_rejected() {
        let result = MarshaledArgs::encode("f", vec![Value::Str("a\0b".into())]);
        assert!(matches!(result, Err(BridgeError::InteriorNul(_))));
    }

    #[test]
    fn test_decode_null_is_empty() {
        let decoded = unsafe { decode_c_str("f", std::ptr::null()) }.unwrap();
        assert!(decoded.is_empty());
    }
}
