//! Runtime values.

use crate::object::{FuncRef, ObjectRef};
use std::fmt;
use wasmcell_environ::{is_subtype, ValueType};

/// A runtime value of one of the WebAssembly value types.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// A 32-bit float.
    F32(f32),
    /// A 64-bit float.
    F64(f64),
    /// A 128-bit vector.
    V128(u128),
    /// A nullable function reference.
    FuncRef(Option<FuncRef>),
    /// A nullable reference to any object.
    AnyRef(Option<ObjectRef>),
    /// The null reference at type `nullref`.
    NullRef,
}

impl Value {
    /// Returns the type of this value.
    pub fn ty(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::V128(_) => ValueType::V128,
            Value::FuncRef(_) => ValueType::AnyFunc,
            Value::AnyRef(_) => ValueType::AnyRef,
            Value::NullRef => ValueType::NullRef,
        }
    }

    /// Returns the zero value of the given type: numeric zero, or null for
    /// reference types.
    ///
    /// Panics on the abstract types `none` and `any`, which have no values.
    pub fn default_for(ty: ValueType) -> Value {
        match ty {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
            ValueType::V128 => Value::V128(0),
            ValueType::AnyFunc => Value::FuncRef(None),
            ValueType::AnyRef => Value::AnyRef(None),
            ValueType::NullRef => Value::NullRef,
            ValueType::None | ValueType::Any => {
                panic!("no default value for abstract type {}", ty)
            }
        }
    }

    /// Returns whether this value may be supplied where `expected` is
    /// required.
    pub fn fits(&self, expected: ValueType) -> bool {
        is_subtype(self.ty(), expected)
    }

    /// Asserts this is an `i32` and returns it.
    pub fn unwrap_i32(&self) -> i32 {
        match self {
            Value::I32(v) => *v,
            other => panic!("{} is not an i32", other.ty()),
        }
    }

    /// Asserts this is an `i64` and returns it.
    pub fn unwrap_i64(&self) -> i64 {
        match self {
            Value::I64(v) => *v,
            other => panic!("{} is not an i64", other.ty()),
        }
    }

    /// Asserts this is an `f32` and returns it.
    pub fn unwrap_f32(&self) -> f32 {
        match self {
            Value::F32(v) => *v,
            other => panic!("{} is not an f32", other.ty()),
        }
    }

    /// Asserts this is an `f64` and returns it.
    pub fn unwrap_f64(&self) -> f64 {
        match self {
            Value::F64(v) => *v,
            other => panic!("{} is not an f64", other.ty()),
        }
    }

    /// Asserts this is a function reference (possibly null) and returns it.
    ///
    /// The null reference at type `nullref` converts.
    pub fn unwrap_funcref(&self) -> Option<FuncRef> {
        match self {
            Value::FuncRef(f) => *f,
            Value::NullRef => None,
            other => panic!("{} is not a function reference", other.ty()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::V128(v) => write!(f, "{:#034x}", v),
            Value::FuncRef(Some(_)) => f.write_str("anyfunc"),
            Value::FuncRef(None) | Value::AnyRef(None) | Value::NullRef => f.write_str("null"),
            Value::AnyRef(Some(_)) => f.write_str("anyref"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Value {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::F64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_zero_or_null() {
        assert_eq!(Value::default_for(ValueType::I32), Value::I32(0));
        assert_eq!(Value::default_for(ValueType::F64), Value::F64(0.0));
        assert_eq!(Value::default_for(ValueType::AnyFunc), Value::FuncRef(None));
        assert_eq!(Value::default_for(ValueType::NullRef), Value::NullRef);
    }

    #[test]
    fn null_fits_reference_slots() {
        assert!(Value::NullRef.fits(ValueType::AnyFunc));
        assert!(Value::NullRef.fits(ValueType::AnyRef));
        assert!(!Value::NullRef.fits(ValueType::I32));
        assert!(Value::FuncRef(None).fits(ValueType::AnyRef));
    }
}
