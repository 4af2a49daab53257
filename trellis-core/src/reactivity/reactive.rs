//! Reactive Objects
//!
//! [`reactive`] observes a plain object or array through the host and then
//! instruments it for ref unwrapping. The object keeps its identity: the
//! handle passed in is the reactive object, and making it reactive again
//! is a no-op.
//!
//! Misuse never fails. Nullish, primitive, non-extensible or raw inputs
//! are returned unchanged with a development warning.
//!
//! Keys added later with a plain [`Object::set`] are not tracked; [`set`]
//! is the tracked way to add a key, [`del`] the tracked way to remove one.

use std::sync::Arc;

use parking_lot::Mutex;

use super::access::{define_access_control, instrument};
use crate::config::warn;
use crate::error::Result;
use crate::host::{self, define_reactive, mark_inert, observe, observer_of, DepTarget, Observer};
use crate::value::{Accessor, Key, Object, Property, PropertyDescriptor, Value};

/// Observe and instrument `value`. No checks, no warnings.
pub(crate) fn make_reactive(value: &Value) {
    observe(value, false);
    instrument(value);
}

/// Why a value cannot be made reactive, if it cannot.
fn rejection(value: &Value) -> Option<&'static str> {
    match value {
        Value::Undefined | Value::Null => Some("called without providing an object."),
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Some("must be called on an object."),
        Value::Ref(_) | Value::Function(_) | Value::Native(_) => Some("expects a plain object or array."),
        Value::Object(_) | Value::Array(_) if is_raw(value) => Some("was called on a value marked raw."),
        Value::Object(o) if !o.is_extensible() => Some("was called on a non-extensible object."),
        Value::Array(a) if !a.is_extensible() => Some("was called on a non-extensible array."),
        _ => None,
    }
}

/// Make a plain object or array deeply reactive, in place.
pub fn reactive<T>(target: T) -> Result<T>
where
    T: Into<Value> + Clone,
{
    host::ensure_installed()?;
    let value: Value = target.clone().into();
    if let Some(reason) = rejection(&value) {
        warn(&format!("reactive() {reason}"), None);
        return Ok(target);
    }
    make_reactive(&value);
    Ok(target)
}

/// Make only the top level of `target` reactive.
///
/// For an object the result is a new reactive view whose keys read and
/// write the original; nested values are neither observed nor unwrapped.
/// Arrays are observed in place without observing their items.
pub fn shallow_reactive(target: impl Into<Value>) -> Result<Value> {
    host::ensure_installed()?;
    let value = target.into();
    if let Some(reason) = rejection(&value) {
        warn(&format!("shallow_reactive() {reason}"), None);
        return Ok(value);
    }
    match &value {
        Value::Object(src) => Ok(Value::Object(shallow_object(src))),
        Value::Array(arr) => {
            arr.marks().attach_observer(Observer::new(true));
            Ok(value)
        }
        _ => Ok(value),
    }
}

/// A shallowly reactive view over `src`.
pub(crate) fn shallow_object(src: &Object) -> Object {
    let view = Object::new();
    let ob = view
        .marks()
        .attach_observer(Observer::view_of(Value::Object(src.clone())));
    for key in src.own_keys() {
        let Some(descriptor) = src.descriptor(&key) else {
            continue;
        };
        if !descriptor.configurable {
            continue;
        }
        let property = ShallowProperty {
            src: src.clone(),
            key: key.clone(),
            ob: ob.clone(),
            dep: crate::host::Dep::new(),
        };
        view.define_property(
            key,
            PropertyDescriptor {
                property: Property::Accessor(Arc::new(property)),
                enumerable: descriptor.enumerable,
                configurable: true,
                writable: true,
            },
        );
    }
    view
}

/// A top-level key of a shallow view.
struct ShallowProperty {
    src: Object,
    key: Key,
    ob: Observer,
    dep: crate::host::Dep,
}

impl Accessor for ShallowProperty {
    fn get(&self) -> Value {
        let value = self.src.get(&self.key);
        if DepTarget::is_active() {
            self.dep.depend();
            self.ob.dep().depend();
        }
        value
    }

    fn set(&self, value: Value) {
        let current = DepTarget::untracked(|| self.src.get(&self.key));
        if value.same(&current) {
            return;
        }
        self.src.set(&self.key, value);
        self.dep.notify();
    }

    fn dep(&self) -> Option<crate::host::Dep> {
        Some(self.dep.clone())
    }
}

/// Exempt `target` from reactivity for good.
///
/// Already-reactive values lose their reactive status; their existing
/// property accessors stay in place.
pub fn mark_raw<T>(target: T) -> T
where
    T: Into<Value> + Clone,
{
    let value: Value = target.clone().into();
    let extensible = match &value {
        Value::Object(o) => o.is_extensible(),
        Value::Array(a) => a.is_extensible(),
        _ => false,
    };
    if extensible {
        mark_inert(&value);
    }
    target
}

/// The value a reactive view stands for, or `value` itself.
pub fn to_raw(value: &Value) -> Value {
    observer_of(value)
        .and_then(|ob| ob.raw_target().cloned())
        .unwrap_or_else(|| value.clone())
}

/// True for observed, still extensible objects and arrays.
pub fn is_reactive(value: &Value) -> bool {
    let extensible = match value {
        Value::Object(o) => o.is_extensible(),
        Value::Array(a) => a.is_extensible(),
        _ => return false,
    };
    extensible && observer_of(value).is_some_and(|ob| !ob.is_raw())
}

/// Whether `value` was marked with [`mark_raw`].
pub fn is_raw(value: &Value) -> bool {
    observer_of(value).is_some_and(|ob| ob.is_raw())
}

/// A deep read-only view. Writes warn and are ignored.
///
/// Nested objects and refs read through the view come back as read-only
/// views too. Arrays are returned as they are.
pub fn readonly(target: impl Into<Value>) -> Result<Value> {
    host::ensure_installed()?;
    Ok(readonly_view(target.into(), true))
}

/// A read-only view of the top level only.
pub fn shallow_readonly(target: impl Into<Value>) -> Result<Value> {
    host::ensure_installed()?;
    Ok(readonly_view(target.into(), false))
}

pub fn is_readonly(value: &Value) -> bool {
    match value {
        Value::Object(o) => o.marks().is_readonly(),
        Value::Array(a) => a.marks().is_readonly(),
        Value::Ref(r) => r.is_readonly(),
        _ => false,
    }
}

fn readonly_view(value: Value, deep: bool) -> Value {
    match value {
        Value::Object(src) if !src.marks().is_readonly() => {
            let view = Object::new();
            for key in src.own_keys() {
                let property = ReadonlyProperty {
                    src: src.clone(),
                    key: key.clone(),
                    deep,
                    cache: Mutex::new(None),
                };
                view.define_property(key, PropertyDescriptor::accessor(Arc::new(property)));
            }
            view.marks().mark_readonly();
            view.prevent_extensions();
            Value::Object(view)
        }
        Value::Ref(r) if !r.is_readonly() => {
            let reader = r.clone();
            let view = super::refs::Ref::build(super::refs::RefParts {
                get: Some(Arc::new(move || {
                    let inner = reader.get();
                    if deep {
                        readonly_view(inner, true)
                    } else {
                        inner
                    }
                })),
                set: Some(Arc::new(|_| {
                    warn("Set operation on key \"value\" failed: target is readonly.", None);
                })),
                readonly: true,
                ..Default::default()
            });
            Value::Ref(view)
        }
        other => other,
    }
}

/// A key of a read-only view.
struct ReadonlyProperty {
    src: Object,
    key: Key,
    deep: bool,
    /// Last nested value seen and the view made for it.
    cache: Mutex<Option<(Value, Value)>>,
}

impl Accessor for ReadonlyProperty {
    fn get(&self) -> Value {
        let value = self.src.get(&self.key);
        if !self.deep || !matches!(value, Value::Object(_) | Value::Ref(_)) {
            return value;
        }
        let mut cache = self.cache.lock();
        if let Some((seen, view)) = &*cache {
            if seen.same(&value) {
                return view.clone();
            }
        }
        let view = readonly_view(value.clone(), true);
        *cache = Some((value, view.clone()));
        view
    }

    fn set(&self, _value: Value) {
        warn(
            &format!("Set operation on key \"{}\" failed: target is readonly.", self.key),
            None,
        );
    }

    fn dep(&self) -> Option<crate::host::Dep> {
        self.src.property_dep(&self.key)
    }
}

/// Set `key` on `target`, adding it reactively when it is new.
///
/// On arrays the key is an index and the item is replaced reactively.
/// Returns the value written.
pub fn set(target: &Value, key: impl Into<Key>, value: impl Into<Value>) -> Result<Value> {
    host::ensure_installed()?;
    let key = key.into();
    let value = value.into();
    match target {
        Value::Array(arr) => {
            let Some(index) = key.as_index() else {
                warn(&format!("Cannot set non-index key \"{key}\" on an array."), None);
                return Ok(value);
            };
            arr.pad_to(index);
            arr.splice(index, 1, vec![value.clone()]);
            Ok(value)
        }
        Value::Object(obj) => {
            if obj.has(&key) {
                obj.set(&key, value.clone());
                return Ok(value);
            }
            let ob = obj.marks().observer();
            if ob.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                warn(
                    "Avoid adding reactive properties to a component instance or its root data at runtime - declare it upfront in the data option.",
                    None,
                );
                return Ok(value);
            }
            match ob.filter(|ob| !ob.is_raw() && ob.raw_target().is_none()) {
                Some(ob) => {
                    define_reactive(obj, key.clone(), Some(value.clone()), false);
                    if obj.marks().is_instrumented() {
                        define_access_control(obj, key, Some(value.clone()));
                    }
                    ob.dep().notify();
                }
                None => {
                    obj.set(key, value.clone());
                }
            }
            Ok(value)
        }
        other => {
            warn(
                &format!("Cannot set reactive property on undefined, null, or primitive value: {other:?}"),
                None,
            );
            Ok(value)
        }
    }
}

/// Delete `key` from `target`, notifying watchers of a reactive target.
pub fn del(target: &Value, key: impl Into<Key>) -> Result<()> {
    host::ensure_installed()?;
    let key = key.into();
    match target {
        Value::Array(arr) => {
            if let Some(index) = key.as_index() {
                arr.splice(index, 1, Vec::new());
            }
        }
        Value::Object(obj) => {
            let ob = obj.marks().observer();
            if ob.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                warn(
                    "Avoid deleting properties on a component instance or its root data - just set it to null.",
                    None,
                );
                return Ok(());
            }
            if !obj.has(&key) || !obj.remove(&key) {
                return Ok(());
            }
            if let Some(ob) = ob.filter(|ob| !ob.is_raw()) {
                ob.dep().notify();
            }
        }
        other => warn(
            &format!("Cannot delete reactive property on undefined, null, or primitive value: {other:?}"),
            None,
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{install, uninstall};
    use crate::reactivity::Ref;
    use crate::value::Array;
    use crate::Config;
    use std::sync::Mutex as StdMutex;

    fn capture_warnings() -> Arc<StdMutex<Vec<String>>> {
        let warnings = Arc::new(StdMutex::new(Vec::new()));
        let sink = warnings.clone();
        install(Config::default().dev(true).silent(true).warn_handler(move |msg, _| {
            sink.lock().unwrap().push(msg.to_string())
        }));
        warnings
    }

    #[test]
    fn reactive_is_idempotent() {
        install(Config::default());
        let obj = Object::from_entries([("a", 1)]);
        let first = reactive(obj.clone()).unwrap();
        let second = reactive(first.clone()).unwrap();
        assert!(first.ptr_eq(&second));
        assert!(first.ptr_eq(&obj));
        assert!(is_reactive(&Value::from(&obj)));
        uninstall();
    }

    #[test]
    fn raw_values_stay_plain() {
        let warnings = capture_warnings();
        let obj = mark_raw(Object::from_entries([("a", 1)]));
        let same = reactive(obj.clone()).unwrap();
        assert!(same.ptr_eq(&obj));
        assert!(!is_reactive(&Value::from(&obj)));
        assert!(is_raw(&Value::from(&obj)));
        assert_eq!(warnings.lock().unwrap().len(), 1);
        uninstall();
    }

    #[test]
    fn invalid_inputs_warn_and_pass_through() {
        let warnings = capture_warnings();
        assert_eq!(reactive(Value::Null).unwrap(), Value::Null);
        assert_eq!(reactive(Value::from(3)).unwrap(), Value::from(3));
        let frozen = Object::new();
        frozen.freeze();
        reactive(frozen.clone()).unwrap();
        assert!(!is_reactive(&Value::from(&frozen)));

        let warnings = warnings.lock().unwrap();
        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings[0], "reactive() called without providing an object.");
        uninstall();
    }

    #[test]
    fn frozen_objects_are_not_reactive() {
        install(Config::default());
        let obj = reactive(Object::from_entries([("a", 1)])).unwrap();
        assert!(is_reactive(&Value::from(&obj)));
        obj.freeze();
        assert!(!is_reactive(&Value::from(&obj)));
        uninstall();
    }

    #[test]
    fn shallow_reactive_leaves_nested_values_alone() {
        install(Config::default());
        let nested = Object::from_entries([("b", 1)]);
        let src = Object::from_entries([("a", Value::from(&nested))]);
        let view = shallow_reactive(src.clone()).unwrap();

        assert!(is_reactive(&view));
        assert!(!is_reactive(&Value::from(&nested)));
        assert!(view.as_object().unwrap().get("a").same(&Value::from(&nested)));
        assert!(to_raw(&view).same(&Value::from(&src)));
        uninstall();
    }

    #[test]
    fn set_adds_tracked_keys() {
        install(Config::default());
        let obj = reactive(Object::new()).unwrap();
        let target = Value::from(&obj);
        set(&target, "late", Ref::new(1).unwrap()).unwrap();
        assert!(obj.property_dep("late").is_some());
        assert_eq!(obj.get("late"), Value::from(1));

        del(&target, "late").unwrap();
        assert!(!obj.has("late"));
        uninstall();
    }

    #[test]
    fn set_on_array_replaces_item() {
        install(Config::default());
        let arr = reactive(Array::from_vec(vec![1.into()])).unwrap();
        set(&Value::from(&arr), 2usize, "x").unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.get(2), Value::from("x"));
        uninstall();
    }

    #[test]
    fn readonly_views_reject_writes() {
        let warnings = capture_warnings();
        let src = Object::from_entries([("a", Value::from(Object::from_entries([("b", 1)])))]);
        let view = readonly(src.clone()).unwrap();
        let view = view.as_object().unwrap();

        assert!(is_readonly(&Value::from(view)));
        view.set("a", 2);
        let nested = view.get("a");
        assert!(is_readonly(&nested));
        nested.as_object().unwrap().set("b", 5);
        assert!(nested.same(&view.get("a")));

        assert_eq!(src.get("a").as_object().unwrap().get("b"), Value::from(1));
        assert_eq!(
            warnings.lock().unwrap()[0],
            "Set operation on key \"a\" failed: target is readonly."
        );
        uninstall();
    }

    #[test]
    fn shallow_readonly_only_guards_top_level() {
        install(Config::default());
        let inner = Object::from_entries([("b", 1)]);
        let view = shallow_readonly(Object::from_entries([("a", Value::from(&inner))])).unwrap();
        let nested = view.as_object().unwrap().get("a");
        assert!(!is_readonly(&nested));
        assert!(nested.same(&Value::from(&inner)));
        uninstall();
    }
}
