//! Process-wide hash-consing of type tuples and function types.
//!
//! WebAssembly requires that the caller and callee signatures in an indirect
//! call must match. To implement this efficiently, keep a registry of all
//! signatures, shared by the whole process, so that call sites can compare a
//! single pointer-sized token. Interned records are allocated once and live
//! for the lifetime of the process; the working set is bounded by the number
//! of distinct signatures in loaded modules.

use crate::types::ValueType;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::ptr;
use std::sync::Mutex;

/// An immutable, hash-consed sequence of value types.
///
/// Two tuples with the same element sequence share one interned record, so
/// equality is pointer comparison and hashing uses a precomputed hash.
#[derive(Copy, Clone)]
pub struct TypeTuple(&'static TupleData);

#[derive(Debug)]
struct TupleData {
    hash: u64,
    elems: Box<[ValueType]>,
}

impl TypeTuple {
    /// Interns the given element sequence, returning the canonical tuple.
    pub fn new(elems: impl IntoIterator<Item = ValueType>) -> TypeTuple {
        intern_tuple(elems.into_iter().collect())
    }

    /// The empty tuple.
    pub fn empty() -> TypeTuple {
        TypeTuple::new([])
    }

    /// Returns the tuple's elements.
    pub fn elements(&self) -> &'static [ValueType] {
        &self.0.elems
    }

    /// Returns the precomputed hash of the element sequence.
    pub fn precomputed_hash(&self) -> u64 {
        self.0.hash
    }
}

impl Deref for TypeTuple {
    type Target = [ValueType];

    fn deref(&self) -> &[ValueType] {
        &self.0.elems
    }
}

impl PartialEq for TypeTuple {
    fn eq(&self, other: &TypeTuple) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for TypeTuple {}

impl Hash for TypeTuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for TypeTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.elements()).finish()
    }
}

impl fmt::Display for TypeTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() == 1 {
            return self[0].fmt(f);
        }
        f.write_str("(")?;
        for (i, elem) in self.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            elem.fmt(f)?;
        }
        f.write_str(")")
    }
}

impl From<ValueType> for TypeTuple {
    fn from(ty: ValueType) -> TypeTuple {
        TypeTuple::new([ty])
    }
}

/// A hash-consed function type: a pair of result and parameter tuples.
///
/// Exposes a pointer-sized encoding that round-trips back to the same type.
/// The encoding is embedded in compiled code as a signature fingerprint for
/// indirect-call checks, so two tokens are equal exactly when the types are.
#[derive(Copy, Clone)]
pub struct FunctionType(&'static FunctionData);

#[derive(Debug)]
struct FunctionData {
    hash: u64,
    results: TypeTuple,
    params: TypeTuple,
}

impl FunctionType {
    /// Interns the `(results, params)` pair, returning the canonical type.
    pub fn new(results: TypeTuple, params: TypeTuple) -> FunctionType {
        intern_function(results, params)
    }

    /// The `() -> ()` type.
    pub fn empty() -> FunctionType {
        FunctionType::new(TypeTuple::empty(), TypeTuple::empty())
    }

    /// Returns the result types.
    pub fn results(&self) -> TypeTuple {
        self.0.results
    }

    /// Returns the parameter types.
    pub fn params(&self) -> TypeTuple {
        self.0.params
    }

    /// Returns the precomputed hash of this type.
    pub fn precomputed_hash(&self) -> u64 {
        self.0.hash
    }

    /// Returns the pointer-sized token for this type.
    pub fn encode(&self) -> u64 {
        self.0 as *const FunctionData as usize as u64
    }

    /// Recovers a function type from a token previously produced by
    /// [`FunctionType::encode`].
    ///
    /// Panics if `token` was never produced by `encode`; passing a foreign
    /// value here is a bug in the caller, not a recoverable error.
    pub fn decode(token: u64) -> FunctionType {
        let known = REGISTRY
            .lock()
            .unwrap()
            .encodings
            .contains(&(token as usize));
        assert!(
            known,
            "decoded an unregistered function type token {:#x}",
            token
        );
        FunctionType(unsafe { &*(token as usize as *const FunctionData) })
    }
}

impl PartialEq for FunctionType {
    fn eq(&self, other: &FunctionType) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for FunctionType {}

impl Hash for FunctionType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionType")
            .field("params", &self.params())
            .field("results", &self.results())
            .finish()
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.params(), self.results())
    }
}

#[derive(Default)]
struct TypeRegistry {
    tuples: HashMap<Box<[ValueType]>, &'static TupleData>,
    functions: HashMap<(TypeTuple, TypeTuple), &'static FunctionData>,
    encodings: HashSet<usize>,
}

lazy_static! {
    static ref REGISTRY: Mutex<TypeRegistry> = Mutex::new(TypeRegistry::default());
}

// A splitmix-style step; element hashes fold into the running seed so the
// tuple hash is order-sensitive.
fn fold_hash(seed: u64, value: u64) -> u64 {
    let mut h = seed
        .rotate_left(31)
        .wrapping_add(value)
        .wrapping_mul(0x9e37_79b9_7f4a_7c15);
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^ (h >> 29)
}

fn intern_tuple(elems: Vec<ValueType>) -> TypeTuple {
    let mut registry = REGISTRY.lock().unwrap();
    if let Some(&data) = registry.tuples.get(elems.as_slice()) {
        return TypeTuple(data);
    }
    let hash = elems
        .iter()
        .fold(fold_hash(0, elems.len() as u64), |h, &ty| {
            fold_hash(h, ty as u64)
        });
    let elems = elems.into_boxed_slice();
    let data: &'static TupleData = Box::leak(Box::new(TupleData {
        hash,
        elems: elems.clone(),
    }));
    registry.tuples.insert(elems, data);
    TypeTuple(data)
}

fn intern_function(results: TypeTuple, params: TypeTuple) -> FunctionType {
    let mut registry = REGISTRY.lock().unwrap();
    if let Some(&data) = registry.functions.get(&(results, params)) {
        return FunctionType(data);
    }
    let hash = fold_hash(results.precomputed_hash(), params.precomputed_hash());
    let data: &'static FunctionData = Box::leak(Box::new(FunctionData {
        hash,
        results,
        params,
    }));
    registry.functions.insert((results, params), data);
    registry
        .encodings
        .insert(data as *const FunctionData as usize);
    FunctionType(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType::{F32, F64, I32, I64};

    #[test]
    fn structurally_equal_tuples_are_identical() {
        let a = TypeTuple::new([I32, I64, F32]);
        let b = TypeTuple::new([I32, I64, F32]);
        let c = TypeTuple::new([I32, I64, F64]);
        assert_eq!(a, b);
        assert!(ptr::eq(a.0, b.0));
        assert_ne!(a, c);
        assert_eq!(a.precomputed_hash(), b.precomputed_hash());
    }

    #[test]
    fn interning_is_idempotent() {
        let a = TypeTuple::new([I32, I32]);
        let b = TypeTuple::new(a.elements().iter().copied());
        assert_eq!(a, b);
    }

    #[test]
    fn empty_tuple_is_canonical() {
        assert_eq!(TypeTuple::empty(), TypeTuple::new([]));
        assert_eq!(TypeTuple::empty().len(), 0);
    }

    #[test]
    fn function_types_are_hash_consed() {
        let a = FunctionType::new(TypeTuple::new([I32]), TypeTuple::new([I32, I32]));
        let b = FunctionType::new(TypeTuple::new([I32]), TypeTuple::new([I32, I32]));
        let c = FunctionType::new(TypeTuple::new([I64]), TypeTuple::new([I32, I32]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn encoding_round_trips() {
        let tys = [
            FunctionType::empty(),
            FunctionType::new(TypeTuple::new([I32]), TypeTuple::new([I32, I32])),
            FunctionType::new(TypeTuple::new([F64]), TypeTuple::empty()),
        ];
        for ty in tys {
            assert_eq!(FunctionType::decode(ty.encode()), ty);
        }
    }

    #[test]
    #[should_panic(expected = "unregistered function type token")]
    fn decoding_a_foreign_token_panics() {
        let _ = FunctionType::decode(0x1234_5678);
    }

    #[test]
    fn display_renders_arrow_form() {
        let ty = FunctionType::new(TypeTuple::new([F32]), TypeTuple::new([I32, I64]));
        assert_eq!(ty.to_string(), "(i32, i64)->f32");
        assert_eq!(FunctionType::empty().to_string(), "()->()");
    }
}
