//! Dynamic Values
//!
//! The reactivity layer operates on loosely-typed application state, the
//! same shape of data an options-style component keeps in `data()`:
//! primitives, plain objects, arrays, refs and opaque callables.
//!
//! # Concepts
//!
//! ## Plain objects and arrays
//!
//! [`Object`] and [`Array`] are shared handles. Cloning a handle never
//! copies the underlying storage, so identity (`ptr_eq`) is what the
//! reactivity layer uses to decide "is this the same object".
//!
//! ## Non-plain values
//!
//! [`Function`] and [`Native`] are never observed or instrumented. `Native`
//! wraps anything else the application wants to carry through reactive
//! state untouched (built-in collections, handles into other systems).
//!
//! ## Refs
//!
//! [`Ref`] is a value in its own right. Instrumented objects unwrap refs
//! on read; see [`crate::reactivity`].

mod array;
mod object;

pub use array::Array;
pub use object::{Accessor, FnAccessor, Integrity, Object, Property, PropertyDescriptor};

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::host::DepTarget;
use crate::reactivity::Ref;

/// Counter shared by objects and arrays for identity and debug output.
static OBJECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_object_id() -> u64 {
    OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A property key.
///
/// Keys built from strings are always "named". The crate keeps one private
/// key for the slot backing a [`Ref`]; it cannot be spelled by callers and
/// never shows up in [`Object::keys`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(KeyRepr);

#[derive(Clone, PartialEq, Eq, Hash)]
enum KeyRepr {
    Name(Arc<str>),
    RefSlot,
}

impl Key {
    pub fn new(name: &str) -> Self {
        Self(KeyRepr::Name(Arc::from(name)))
    }

    /// The sentinel key storing a ref's backing value.
    pub(crate) fn ref_slot() -> Self {
        Self(KeyRepr::RefSlot)
    }

    pub(crate) fn is_ref_slot(&self) -> bool {
        matches!(self.0, KeyRepr::RefSlot)
    }

    /// The key's name, or `None` for internal keys.
    pub fn as_str(&self) -> Option<&str> {
        match &self.0 {
            KeyRepr::Name(name) => Some(name),
            KeyRepr::RefSlot => None,
        }
    }

    /// The key as an array index, if it spells one.
    pub fn as_index(&self) -> Option<usize> {
        self.as_str().and_then(|name| name.parse().ok())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self(KeyRepr::Name(Arc::from(index.to_string())))
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self(KeyRepr::Name(Arc::from(name)))
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Self::new(name)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            KeyRepr::Name(name) => write!(f, "{name:?}"),
            KeyRepr::RefSlot => f.write_str("<ref>"),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            KeyRepr::Name(name) => f.write_str(name),
            KeyRepr::RefSlot => f.write_str("<ref>"),
        }
    }
}

/// An opaque callable stored in reactive state.
#[derive(Clone)]
pub struct Function(Arc<dyn Fn(&[Value]) -> Value + Send + Sync>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Any other value carried through reactive state without instrumentation.
#[derive(Clone)]
pub struct Native {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Native {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn ptr_eq(&self, other: &Native) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A dynamically-typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Object(Object),
    Array(Array),
    Ref(Ref),
    Function(Function),
    Native(Native),
}

impl Value {
    /// Identity comparison used for change detection.
    ///
    /// Primitives compare by value (NaN equals NaN so a NaN write is not a
    /// change); everything else compares by handle identity.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Native(a), Value::Native(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// True for anything held by reference.
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            Value::Object(_) | Value::Array(_) | Value::Ref(_) | Value::Native(_)
        )
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Build plain (unobserved) values from JSON.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => {
                Value::Array(Array::from_vec(items.iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => Value::Object(Object::from_entries(
                map.iter().map(|(k, v)| (Key::from(k), Value::from_json(v))),
            )),
        }
    }

    /// Parse a JSON document into plain values.
    pub fn parse_json(text: &str) -> Result<Value, serde_json::Error> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        Ok(Value::from_json(&json))
    }

    /// Snapshot this value as JSON.
    ///
    /// Reads are not tracked. Refs are unwrapped, callables and native
    /// values become `null`, cycles are cut with `"[Circular]"`.
    pub fn to_json(&self) -> serde_json::Value {
        let _untracked = DepTarget::push(None);
        let mut seen = HashSet::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut HashSet<u64>) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) | Value::Native(_) => {
                serde_json::Value::Null
            }
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Ref(r) => r.get().to_json_inner(seen),
            Value::Array(a) => {
                if !seen.insert(a.id()) {
                    return serde_json::Value::String("[Circular]".into());
                }
                let out = a.to_vec().iter().map(|v| v.to_json_inner(seen)).collect();
                seen.remove(&a.id());
                serde_json::Value::Array(out)
            }
            Value::Object(o) => {
                if !seen.insert(o.id()) {
                    return serde_json::Value::String("[Circular]".into());
                }
                let mut map = serde_json::Map::new();
                for key in o.keys() {
                    let value = o.get(&key).to_json_inner(seen);
                    map.insert(key.to_string(), value);
                }
                seen.remove(&o.id());
                serde_json::Value::Object(map)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(o) => write!(f, "Object#{}", o.id()),
            Value::Array(a) => write!(f, "Array#{}(len={})", a.id(), a.len()),
            Value::Ref(r) => write!(f, "Ref#{}", r.id()),
            Value::Function(_) => f.write_str("Function"),
            Value::Native(n) => write!(f, "Native<{}>", n.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<&Object> for Value {
    fn from(o: &Object) -> Self {
        Value::Object(o.clone())
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<&Array> for Value {
    fn from(a: &Array) -> Self {
        Value::Array(a.clone())
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::Ref(r)
    }
}

impl From<&Ref> for Value {
    fn from(r: &Ref) -> Self {
        Value::Ref(r.clone())
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Native> for Value {
    fn from(n: Native) -> Self {
        Value::Native(n)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Array::from_vec(items))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
