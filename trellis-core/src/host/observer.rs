//! Observation
//!
//! `observe` converts plain objects and arrays into observed ones. Every
//! property of an observed object is replaced by a [`ReactiveProperty`]
//! accessor holding its own [`Dep`]; the object or array as a whole gets an
//! [`Observer`] whose dep is notified for structural changes (keys added
//! with `set`, array mutations).
//!
//! An observer can also be *inert*: attached only to claim the object, so
//! later `observe` calls leave it alone. That is how values are marked raw.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dep::{Dep, DepTarget};
use crate::value::{Accessor, Array, Key, Object, Property, PropertyDescriptor, Value};

/// Per-object observation state.
#[derive(Clone)]
pub struct Observer(Arc<ObserverInner>);

struct ObserverInner {
    dep: Dep,
    raw: bool,
    shallow: bool,
    vm_count: AtomicUsize,
    raw_target: Option<Value>,
}

impl Observer {
    fn build(raw: bool, shallow: bool, raw_target: Option<Value>) -> Self {
        Self(Arc::new(ObserverInner {
            dep: Dep::new(),
            raw,
            shallow,
            vm_count: AtomicUsize::new(0),
            raw_target,
        }))
    }

    pub(crate) fn new(shallow: bool) -> Self {
        Self::build(false, shallow, None)
    }

    /// An observer that only marks its object as off limits.
    pub(crate) fn inert() -> Self {
        Self::build(true, false, None)
    }

    /// A shallow observer for a view over `target`.
    pub(crate) fn view_of(target: Value) -> Self {
        Self::build(false, true, Some(target))
    }

    pub fn dep(&self) -> &Dep {
        &self.0.dep
    }

    pub fn is_raw(&self) -> bool {
        self.0.raw
    }

    pub fn is_shallow(&self) -> bool {
        self.0.shallow
    }

    /// How many instances use the object as their root data.
    pub fn vm_count(&self) -> usize {
        self.0.vm_count.load(Ordering::SeqCst)
    }

    pub(crate) fn add_vm(&self) {
        self.0.vm_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn remove_vm(&self) {
        let _ = self
            .0
            .vm_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// The object a view observer stands for.
    pub fn raw_target(&self) -> Option<&Value> {
        self.0.raw_target.as_ref()
    }

    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// The observer attached to `value`, if any.
pub fn observer_of(value: &Value) -> Option<Observer> {
    match value {
        Value::Object(obj) => obj.marks().observer(),
        Value::Array(arr) => arr.marks().observer(),
        _ => None,
    }
}

/// Attach an observer to `value`, or return the one already attached.
///
/// Only extensible objects and arrays are observed. `as_root_data` counts
/// the value as some instance's root data.
pub fn observe(value: &Value, as_root_data: bool) -> Option<Observer> {
    let ob = match value {
        Value::Object(obj) => match obj.marks().observer() {
            Some(ob) => ob,
            None if obj.is_extensible() => {
                let fresh = Observer::new(false);
                let ob = obj.marks().attach_observer(fresh.clone());
                if ob.ptr_eq(&fresh) {
                    walk(obj);
                }
                ob
            }
            None => return None,
        },
        Value::Array(arr) => match arr.marks().observer() {
            Some(ob) => ob,
            None if arr.is_extensible() => {
                let fresh = Observer::new(false);
                let ob = arr.marks().attach_observer(fresh.clone());
                if ob.ptr_eq(&fresh) {
                    observe_array(arr);
                }
                ob
            }
            None => return None,
        },
        _ => return None,
    };
    if as_root_data {
        ob.add_vm();
    }
    Some(ob)
}

fn walk(obj: &Object) {
    for key in obj.own_keys() {
        define_reactive(obj, key, None, false);
    }
}

fn observe_array(arr: &Array) {
    for item in arr.to_vec() {
        observe(&item, false);
    }
}

/// Claim `value` with an inert observer so it is never observed.
///
/// Returns false when the value is not an object or array.
pub(crate) fn mark_inert(value: &Value) -> bool {
    match value {
        Value::Object(obj) => obj.marks().replace_observer(Observer::inert()),
        Value::Array(arr) => arr.marks().replace_observer(Observer::inert()),
        _ => return false,
    }
    true
}

/// Turn `key` of `obj` into a tracked property.
///
/// An existing accessor is wrapped rather than replaced. Non-configurable
/// properties are left untouched. `shallow` skips observing the value.
pub fn define_reactive(obj: &Object, key: Key, val: Option<Value>, shallow: bool) {
    let descriptor = obj.descriptor(&key);
    if matches!(&descriptor, Some(d) if !d.configurable) {
        return;
    }

    let inner = descriptor.as_ref().and_then(|d| d.accessor_ref().cloned());
    let val = match (val, &descriptor) {
        (Some(v), _) => v,
        (None, Some(PropertyDescriptor { property: Property::Data(v), .. })) => v.clone(),
        (None, Some(_)) => match &inner {
            Some(accessor) => DepTarget::untracked(|| accessor.get()),
            None => Value::Undefined,
        },
        (None, None) => Value::Undefined,
    };

    let child = if shallow { None } else { observe(&val, false) };
    let enumerable = descriptor.as_ref().map(|d| d.enumerable).unwrap_or(true);
    let property = ReactiveProperty {
        dep: Dep::new(),
        inner,
        val: Mutex::new(val),
        child: Mutex::new(child),
        shallow,
    };
    obj.define_property(
        key,
        PropertyDescriptor {
            property: Property::Accessor(Arc::new(property)),
            enumerable,
            configurable: true,
            writable: true,
        },
    );
}

/// Accessor installed by [`define_reactive`].
struct ReactiveProperty {
    dep: Dep,
    inner: Option<Arc<dyn Accessor>>,
    val: Mutex<Value>,
    child: Mutex<Option<Observer>>,
    shallow: bool,
}

impl ReactiveProperty {
    fn current(&self) -> Value {
        match &self.inner {
            Some(accessor) => accessor.get(),
            None => self.val.lock().clone(),
        }
    }
}

impl Accessor for ReactiveProperty {
    fn get(&self) -> Value {
        let value = self.current();
        if DepTarget::is_active() {
            self.dep.depend();
            let child = self.child.lock().clone();
            if let Some(ob) = child {
                ob.dep().depend();
                if let Value::Array(arr) = &value {
                    depend_array(arr);
                }
            }
        }
        value
    }

    fn set(&self, value: Value) {
        let current = DepTarget::untracked(|| self.current());
        if value.same(&current) {
            return;
        }
        match &self.inner {
            Some(accessor) if !accessor.has_setter() => return,
            Some(accessor) => accessor.set(value.clone()),
            None => *self.val.lock() = value.clone(),
        }
        let child = if self.shallow { None } else { observe(&value, false) };
        *self.child.lock() = child;
        self.dep.notify();
    }

    fn raw(&self) -> Value {
        match &self.inner {
            Some(accessor) => accessor.raw(),
            None => self.val.lock().clone(),
        }
    }

    fn has_setter(&self) -> bool {
        self.inner.as_ref().map_or(true, |a| a.has_setter())
    }

    fn dep(&self) -> Option<Dep> {
        Some(self.dep.clone())
    }
}

/// Arrays cannot intercept index reads, so depend on every nested
/// observer up front.
fn depend_array(arr: &Array) {
    for item in arr.to_vec() {
        if let Some(ob) = observer_of(&item) {
            ob.dep().depend();
        }
        if let Value::Array(nested) = &item {
            depend_array(nested);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_is_idempotent() {
        let obj = Value::from(Object::from_entries([("a", 1)]));
        let first = observe(&obj, false).unwrap();
        let second = observe(&obj, true).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(second.vm_count(), 1);
    }

    #[test]
    fn observe_converts_nested_values() {
        let inner = Object::from_entries([("b", 1)]);
        let outer = Object::from_entries([("a", Value::from(&inner))]);
        observe(&Value::from(&outer), false);

        assert!(outer.property_dep("a").is_some());
        assert!(inner.property_dep("b").is_some());
        assert!(observer_of(&Value::from(&inner)).is_some());
    }

    #[test]
    fn frozen_values_are_not_observed() {
        let obj = Object::from_entries([("a", 1)]);
        obj.freeze();
        assert!(observe(&Value::from(&obj), false).is_none());
        assert!(obj.property_dep("a").is_none());
    }

    #[test]
    fn inert_observer_blocks_observation() {
        let obj = Object::from_entries([("a", 1)]);
        let value = Value::from(&obj);
        assert!(mark_inert(&value));
        let ob = observe(&value, false).unwrap();
        assert!(ob.is_raw());
        assert!(obj.property_dep("a").is_none());
    }

    #[test]
    fn define_reactive_wraps_existing_accessor() {
        let obj = Object::new();
        let store = Arc::new(Mutex::new(Value::from(1)));
        let (r, w) = (store.clone(), store.clone());
        obj.define_property(
            "x",
            PropertyDescriptor::accessor(Arc::new(crate::value::FnAccessor::new(
                move || r.lock().clone(),
                move |v| *w.lock() = v,
            ))),
        );

        define_reactive(&obj, "x".into(), None, false);
        obj.set("x", 4);
        assert_eq!(*store.lock(), Value::from(4));
        assert_eq!(obj.get("x"), Value::from(4));
    }
}
