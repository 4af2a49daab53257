//! Plain Objects
//!
//! An [`Object`] is an ordered table of property descriptors. A property
//! is either a data slot or an [`Accessor`]; both the host's observation
//! primitive and the access-control layer work by swapping data slots for
//! accessors, never by changing how callers read and write.
//!
//! # Integrity levels
//!
//! Objects start extensible. `prevent_extensions`, `seal` and `freeze`
//! tighten them one way only. Reactivity refuses non-extensible objects.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{next_object_id, Key, Value};
use crate::host::{Dep, Observer};

/// A property with custom read/write behavior.
pub trait Accessor: Send + Sync {
    /// Read the property.
    fn get(&self) -> Value;

    /// Write the property. Accessors without a setter ignore writes.
    fn set(&self, value: Value);

    /// The stored value, before any unwrapping the accessor applies.
    fn raw(&self) -> Value {
        self.get()
    }

    /// Whether writes have any effect.
    fn has_setter(&self) -> bool {
        true
    }

    /// The dependency list notified when this property changes, if any.
    fn dep(&self) -> Option<Dep> {
        None
    }
}

type GetFn = Arc<dyn Fn() -> Value + Send + Sync>;
type SetFn = Arc<dyn Fn(Value) + Send + Sync>;

/// Closure-backed accessor.
#[derive(Clone)]
pub struct FnAccessor {
    get: GetFn,
    set: Option<SetFn>,
}

impl FnAccessor {
    /// A read-only accessor.
    pub fn getter<G>(get: G) -> Self
    where
        G: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            get: Arc::new(get),
            set: None,
        }
    }

    /// A read/write accessor.
    pub fn new<G, S>(get: G, set: S) -> Self
    where
        G: Fn() -> Value + Send + Sync + 'static,
        S: Fn(Value) + Send + Sync + 'static,
    {
        Self {
            get: Arc::new(get),
            set: Some(Arc::new(set)),
        }
    }
}

impl Accessor for FnAccessor {
    fn get(&self) -> Value {
        (self.get)()
    }

    fn set(&self, value: Value) {
        if let Some(set) = &self.set {
            set(value);
        }
    }

    fn has_setter(&self) -> bool {
        self.set.is_some()
    }
}

/// What a property slot holds.
#[derive(Clone)]
pub enum Property {
    Data(Value),
    Accessor(Arc<dyn Accessor>),
}

/// A property slot plus its attributes.
#[derive(Clone)]
pub struct PropertyDescriptor {
    pub property: Property,
    pub enumerable: bool,
    pub configurable: bool,
    pub writable: bool,
}

impl PropertyDescriptor {
    pub fn data(value: Value) -> Self {
        Self {
            property: Property::Data(value),
            enumerable: true,
            configurable: true,
            writable: true,
        }
    }

    pub fn accessor(accessor: Arc<dyn Accessor>) -> Self {
        Self {
            property: Property::Accessor(accessor),
            enumerable: true,
            configurable: true,
            writable: true,
        }
    }

    /// Exclude from key enumeration.
    pub fn hidden(mut self) -> Self {
        self.enumerable = false;
        self
    }

    /// Forbid redefinition and deletion.
    pub fn locked(mut self) -> Self {
        self.configurable = false;
        self
    }

    pub fn accessor_ref(&self) -> Option<&Arc<dyn Accessor>> {
        match &self.property {
            Property::Accessor(a) => Some(a),
            Property::Data(_) => None,
        }
    }
}

/// How far an object has been locked down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Integrity {
    Extensible,
    NonExtensible,
    Sealed,
    Frozen,
}

/// Identity markers the reactivity layer stamps on objects and arrays.
#[derive(Default)]
pub(crate) struct Marks {
    observer: RwLock<Option<Observer>>,
    instrumented: AtomicBool,
    readonly: AtomicBool,
}

impl Marks {
    pub(crate) fn observer(&self) -> Option<Observer> {
        self.observer.read().clone()
    }

    /// Attach `observer` unless one is already present.
    ///
    /// Returns the observer that ends up attached.
    pub(crate) fn attach_observer(&self, observer: Observer) -> Observer {
        let mut slot = self.observer.write();
        match &*slot {
            Some(existing) => existing.clone(),
            None => {
                *slot = Some(observer.clone());
                observer
            }
        }
    }

    /// Attach `observer`, replacing any existing one.
    pub(crate) fn replace_observer(&self, observer: Observer) {
        *self.observer.write() = Some(observer);
    }

    pub(crate) fn is_instrumented(&self) -> bool {
        self.instrumented.load(Ordering::SeqCst)
    }

    /// Set the instrumentation marker. Returns false if it was already set.
    pub(crate) fn mark_instrumented(&self) -> bool {
        !self.instrumented.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_readonly(&self) {
        self.readonly.store(true, Ordering::SeqCst);
    }
}

/// A shared handle to a plain object.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

struct ObjectInner {
    id: u64,
    props: RwLock<IndexMap<Key, PropertyDescriptor>>,
    integrity: RwLock<Integrity>,
    marks: Marks,
}

impl Object {
    pub fn new() -> Self {
        Self(Arc::new(ObjectInner {
            id: next_object_id(),
            props: RwLock::new(IndexMap::new()),
            integrity: RwLock::new(Integrity::Extensible),
            marks: Marks::default(),
        }))
    }

    /// Build a plain object from key/value pairs, in order.
    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let obj = Self::new();
        {
            let mut props = obj.0.props.write();
            for (k, v) in entries {
                props.insert(k.into(), PropertyDescriptor::data(v.into()));
            }
        }
        obj
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Read a property. Missing keys read as `Undefined`.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        let property = self.0.props.read().get(&key).map(|d| d.property.clone());
        match property {
            Some(Property::Data(value)) => value,
            Some(Property::Accessor(accessor)) => accessor.get(),
            None => Value::Undefined,
        }
    }

    /// Write a property.
    ///
    /// Missing keys are added as plain data slots (no reactivity; use
    /// [`crate::set`] to add a tracked key). Returns false when the write
    /// was rejected by the object's integrity level or a missing setter.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = value.into();
        let existing = self.0.props.read().get(&key).cloned();
        match existing {
            Some(PropertyDescriptor {
                property: Property::Accessor(accessor),
                ..
            }) => {
                if !accessor.has_setter() {
                    return false;
                }
                accessor.set(value);
                true
            }
            Some(descriptor) => {
                if !descriptor.writable {
                    return false;
                }
                if let Some(slot) = self.0.props.write().get_mut(&key) {
                    slot.property = Property::Data(value);
                }
                true
            }
            None => {
                if !self.is_extensible() {
                    return false;
                }
                self.0
                    .props
                    .write()
                    .insert(key, PropertyDescriptor::data(value));
                true
            }
        }
    }

    pub fn has(&self, key: impl Into<Key>) -> bool {
        self.0.props.read().contains_key(&key.into())
    }

    /// Enumerable, named keys in insertion order.
    pub fn keys(&self) -> Vec<Key> {
        self.0
            .props
            .read()
            .iter()
            .filter(|(k, d)| d.enumerable && !k.is_ref_slot())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Enumerable keys including the internal ref slot.
    pub(crate) fn own_keys(&self) -> Vec<Key> {
        self.0
            .props
            .read()
            .iter()
            .filter(|(_, d)| d.enumerable)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn descriptor(&self, key: impl Into<Key>) -> Option<PropertyDescriptor> {
        self.0.props.read().get(&key.into()).cloned()
    }

    /// Define or redefine a property.
    ///
    /// Fails for new keys on non-extensible objects and for existing
    /// non-configurable properties. The existing slot keeps its position.
    pub fn define_property(&self, key: impl Into<Key>, descriptor: PropertyDescriptor) -> bool {
        let key = key.into();
        let extensible = self.is_extensible();
        let mut props = self.0.props.write();
        match props.get_mut(&key) {
            Some(existing) if !existing.configurable => false,
            Some(existing) => {
                *existing = descriptor;
                true
            }
            None if !extensible => false,
            None => {
                props.insert(key, descriptor);
                true
            }
        }
    }

    /// Delete a configurable property.
    pub fn remove(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        let mut props = self.0.props.write();
        match props.get(&key) {
            Some(d) if !d.configurable => false,
            Some(_) => {
                props.shift_remove(&key);
                true
            }
            None => true,
        }
    }

    /// The dependency list of an observed property, if it has one.
    pub fn property_dep(&self, key: impl Into<Key>) -> Option<Dep> {
        self.descriptor(key)
            .and_then(|d| d.accessor_ref().and_then(|a| a.dep()))
    }

    pub fn integrity(&self) -> Integrity {
        *self.0.integrity.read()
    }

    pub fn is_extensible(&self) -> bool {
        self.integrity() == Integrity::Extensible
    }

    pub fn is_frozen(&self) -> bool {
        self.integrity() == Integrity::Frozen
    }

    pub fn prevent_extensions(&self) {
        let mut integrity = self.0.integrity.write();
        *integrity = (*integrity).max(Integrity::NonExtensible);
    }

    pub fn seal(&self) {
        for descriptor in self.0.props.write().values_mut() {
            descriptor.configurable = false;
        }
        let mut integrity = self.0.integrity.write();
        *integrity = (*integrity).max(Integrity::Sealed);
    }

    pub fn freeze(&self) {
        for descriptor in self.0.props.write().values_mut() {
            descriptor.configurable = false;
            descriptor.writable = false;
        }
        *self.0.integrity.write() = Integrity::Frozen;
    }

    pub(crate) fn marks(&self) -> &Marks {
        &self.0.marks
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.0.id)
            .field("keys", &self.keys())
            .field("integrity", &self.integrity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_read_undefined() {
        let obj = Object::new();
        assert!(obj.get("nope").is_undefined());
    }

    #[test]
    fn keys_keep_insertion_order() {
        let obj = Object::from_entries([("b", 1), ("a", 2), ("c", 3)]);
        let names: Vec<_> = obj.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn hidden_and_internal_keys_are_not_enumerated() {
        let obj = Object::new();
        obj.define_property("shown", PropertyDescriptor::data(1.into()));
        obj.define_property("secret", PropertyDescriptor::data(2.into()).hidden());
        obj.define_property(Key::ref_slot(), PropertyDescriptor::data(3.into()));

        assert_eq!(obj.keys(), vec![Key::new("shown")]);
        assert_eq!(obj.own_keys().len(), 2);
        assert_eq!(obj.get("secret"), Value::from(2));
    }

    #[test]
    fn accessor_routes_reads_and_writes() {
        let store = Arc::new(RwLock::new(Value::from(1)));
        let (r, w) = (store.clone(), store.clone());
        let obj = Object::new();
        obj.define_property(
            "x",
            PropertyDescriptor::accessor(Arc::new(FnAccessor::new(
                move || r.read().clone(),
                move |v| *w.write() = v,
            ))),
        );

        assert_eq!(obj.get("x"), Value::from(1));
        assert!(obj.set("x", 7));
        assert_eq!(*store.read(), Value::from(7));
    }

    #[test]
    fn getter_only_accessor_rejects_writes() {
        let obj = Object::new();
        obj.define_property(
            "k",
            PropertyDescriptor::accessor(Arc::new(FnAccessor::getter(|| Value::from(1)))),
        );
        assert!(!obj.set("k", 2));
        assert_eq!(obj.get("k"), Value::from(1));
    }

    #[test]
    fn frozen_objects_reject_everything() {
        let obj = Object::from_entries([("a", 1)]);
        obj.freeze();

        assert!(!obj.set("a", 2));
        assert!(!obj.set("b", 2));
        assert!(!obj.remove("a"));
        assert!(!obj.define_property("a", PropertyDescriptor::data(3.into())));
        assert_eq!(obj.get("a"), Value::from(1));
        assert!(!obj.is_extensible());
    }

    #[test]
    fn non_extensible_objects_still_accept_existing_keys() {
        let obj = Object::from_entries([("a", 1)]);
        obj.prevent_extensions();

        assert!(obj.set("a", 2));
        assert!(!obj.set("b", 2));
        assert_eq!(obj.integrity(), Integrity::NonExtensible);
    }

    #[test]
    fn redefining_keeps_position() {
        let obj = Object::from_entries([("a", 1), ("b", 2)]);
        obj.define_property("a", PropertyDescriptor::data(9.into()));
        assert_eq!(obj.keys()[0], Key::new("a"));
        assert_eq!(obj.get("a"), Value::from(9));
    }
}
