//! Access Control
//!
//! Instrumenting an object replaces each enumerable property with an
//! [`AccessControl`] accessor so refs stored in it behave like plain
//! values:
//!
//! - reading a key holding a ref returns the ref's value;
//! - writing a non-ref to a key holding a ref writes into that ref, so the
//!   ref keeps its identity;
//! - writing a ref replaces the slot (the key now points to another ref);
//! - anything else is written as is, and nested plain objects are
//!   instrumented too.
//!
//! The private ref slot of a ref's own container is exempt from unwrapping;
//! otherwise reading the ref would unwrap forever.
//!
//! Instrumentation is eager over the keys present at the time. Raw values,
//! arrays, refs and non-plain values are left alone, and each object is
//! instrumented at most once (which also makes cycles terminate).

use std::sync::Arc;

use parking_lot::Mutex;

use super::reactive::is_raw;
use crate::host::{Dep, DepTarget};
use crate::value::{Accessor, Key, Object, Property, PropertyDescriptor, Value};

/// Instrument every enumerable key of `value`, recursively.
pub(crate) fn instrument(value: &Value) {
    let Value::Object(obj) = value else {
        return;
    };
    if is_raw(value) || !obj.is_extensible() || !obj.marks().mark_instrumented() {
        return;
    }
    for key in obj.own_keys() {
        define_access_control(obj, key, None);
    }
}

/// Replace `key` of `obj` with an unwrapping accessor.
///
/// `val` overrides the stored value; the existing one is used otherwise.
pub(crate) fn define_access_control(obj: &Object, key: Key, val: Option<Value>) {
    let Some(descriptor) = obj.descriptor(&key) else {
        return;
    };
    if !descriptor.configurable {
        return;
    }
    let inner = descriptor.accessor_ref().cloned();
    let current = match &descriptor.property {
        Property::Data(value) => value.clone(),
        Property::Accessor(accessor) => DepTarget::untracked(|| accessor.raw()),
    };
    if is_raw(&current) {
        return;
    }

    let val = val.unwrap_or(current);
    instrument(&val);
    let control = AccessControl {
        key: key.clone(),
        inner,
        val: Mutex::new(val),
    };
    obj.define_property(
        key,
        PropertyDescriptor {
            property: Property::Accessor(Arc::new(control)),
            enumerable: descriptor.enumerable,
            configurable: true,
            writable: true,
        },
    );
}

/// The unwrapping accessor installed by [`instrument`].
struct AccessControl {
    key: Key,
    inner: Option<Arc<dyn Accessor>>,
    val: Mutex<Value>,
}

impl AccessControl {
    fn stored(&self) -> Value {
        match &self.inner {
            Some(accessor) => accessor.get(),
            None => self.val.lock().clone(),
        }
    }
}

impl Accessor for AccessControl {
    fn get(&self) -> Value {
        let raw = self.stored();
        match raw {
            Value::Ref(r) if !self.key.is_ref_slot() => r.get(),
            other => other,
        }
    }

    fn set(&self, value: Value) {
        if let Some(inner) = &self.inner {
            if !inner.has_setter() {
                return;
            }
        }
        if !self.key.is_ref_slot() {
            let current = DepTarget::untracked(|| self.raw());
            if let (Value::Ref(r), false) = (&current, matches!(value, Value::Ref(_))) {
                instrument(&value);
                r.set(value);
                return;
            }
        }
        instrument(&value);
        match &self.inner {
            Some(inner) => inner.set(value),
            None => *self.val.lock() = value,
        }
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
        self.inner.as_ref().and_then(|a| a.dep())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{install, uninstall};
    use crate::reactivity::Ref;
    use crate::Config;

    #[test]
    fn reads_unwrap_refs() {
        install(Config::default());
        let count = Ref::new(1).unwrap();
        let obj = Object::from_entries([("count", Value::Ref(count.clone()))]);
        instrument(&Value::from(&obj));
        assert_eq!(obj.get("count"), Value::from(1));
        count.set(2);
        assert_eq!(obj.get("count"), Value::from(2));
        uninstall();
    }

    #[test]
    fn plain_write_goes_into_existing_ref() {
        install(Config::default());
        let count = Ref::new(1).unwrap();
        let obj = Object::from_entries([("count", Value::Ref(count.clone()))]);
        instrument(&Value::from(&obj));

        obj.set("count", 5);
        assert_eq!(count.get(), Value::from(5));
        assert_eq!(obj.get("count"), Value::from(5));
        uninstall();
    }

    #[test]
    fn ref_write_replaces_slot() {
        install(Config::default());
        let first = Ref::new(1).unwrap();
        let second = Ref::new(10).unwrap();
        let obj = Object::from_entries([("n", Value::Ref(first.clone()))]);
        instrument(&Value::from(&obj));

        obj.set("n", Value::Ref(second));
        assert_eq!(obj.get("n"), Value::from(10));
        assert_eq!(first.get(), Value::from(1));
        uninstall();
    }

    #[test]
    fn nested_objects_are_instrumented() {
        install(Config::default());
        let inner_ref = Ref::new("deep").unwrap();
        let inner = Object::from_entries([("r", Value::Ref(inner_ref))]);
        let outer = Object::from_entries([("inner", Value::from(&inner))]);
        instrument(&Value::from(&outer));

        assert_eq!(inner.get("r"), Value::from("deep"));

        let later = Object::from_entries([("r", Value::Ref(Ref::new(7).unwrap()))]);
        outer.set("inner", &later);
        assert_eq!(later.get("r"), Value::from(7));
        uninstall();
    }

    #[test]
    fn writes_go_to_the_wrapped_accessor() {
        install(Config::default());
        let state = crate::reactivity::reactive(Object::from_entries([("n", 1)])).unwrap();
        state.set("n", 5);
        assert_eq!(state.get("n"), Value::from(5));

        let r = Ref::new(2).unwrap();
        state.set("n", Value::Ref(r.clone()));
        state.set("n", 3);
        assert_eq!(r.get(), Value::from(3));
        assert_eq!(state.get("n"), Value::from(3));
        uninstall();
    }

    #[test]
    fn instrumentation_survives_cycles() {
        install(Config::default());
        let obj = Object::new();
        obj.set("me", &obj);
        instrument(&Value::from(&obj));
        assert!(obj.marks().is_instrumented());
        uninstall();
    }
}
