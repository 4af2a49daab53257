//! Refs
//!
//! A [`Ref`] is a single observable cell. Every read and write goes through
//! a get/set pair, never a raw field, so each flavor of ref only differs in
//! the pair it is built from:
//!
//! - [`Ref::new`] stores the value in a reactive container under a private
//!   key; reads track that key, writes notify it.
//! - [`to_ref`] proxies one key of another object.
//! - [`custom_ref`] takes the pair from user code.
//! - computed refs read and write a host computed property.
//!
//! A `Ref` is its own variant of [`Value`], so telling a ref apart from a
//! plain object that happens to have a `value` key is a match, not a guess.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::reactive::{is_reactive, make_reactive, set, shallow_object};
use crate::config::warn;
use crate::error::Result;
use crate::host::{self, DepTarget};
use crate::value::{FnAccessor, Key, Object, PropertyDescriptor, Value};

/// Read half of a ref.
pub type RefGetter = Arc<dyn Fn() -> Value + Send + Sync>;

/// Write half of a ref.
pub type RefSetter = Arc<dyn Fn(Value) + Send + Sync>;

type Trigger = Arc<dyn Fn() + Send + Sync>;

static REF_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A single observable cell.
#[derive(Clone)]
pub struct Ref(Arc<RefInner>);

struct RefInner {
    id: u64,
    get: RefGetter,
    set: Option<RefSetter>,
    readonly: bool,
    computed: bool,
    trigger: Option<Trigger>,
}

/// Everything a ref is built from.
#[derive(Default)]
pub(crate) struct RefParts {
    pub(crate) get: Option<RefGetter>,
    pub(crate) set: Option<RefSetter>,
    pub(crate) readonly: bool,
    pub(crate) computed: bool,
    pub(crate) trigger: Option<Trigger>,
}

impl Ref {
    /// A writable ref holding `value`.
    ///
    /// Objects stored in the ref are made reactive. Passing a `Value::Ref`
    /// returns that ref unchanged.
    pub fn new(value: impl Into<Value>) -> Result<Ref> {
        host::ensure_installed()?;
        let value = value.into();
        if let Value::Ref(existing) = value {
            return Ok(existing);
        }
        let container = Object::new();
        container.define_property(Key::ref_slot(), PropertyDescriptor::data(value));
        make_reactive(&Value::Object(container.clone()));
        Ok(slot_ref(container))
    }

    /// A ref over an arbitrary get/set pair.
    ///
    /// Without a setter, writes warn and are ignored.
    pub fn from_fns<G>(get: G, set: Option<RefSetter>) -> Ref
    where
        G: Fn() -> Value + Send + Sync + 'static,
    {
        Ref::build(RefParts {
            get: Some(Arc::new(get)),
            set,
            ..Default::default()
        })
    }

    pub(crate) fn build(parts: RefParts) -> Ref {
        Ref(Arc::new(RefInner {
            id: REF_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            get: parts.get.unwrap_or_else(|| Arc::new(|| Value::Undefined)),
            set: parts.set,
            readonly: parts.readonly,
            computed: parts.computed,
            trigger: parts.trigger,
        }))
    }

    /// Process-unique id of this ref.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether both handles point at the same ref.
    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Read the value, tracking it when inside an evaluation.
    pub fn get(&self) -> Value {
        (self.0.get)()
    }

    /// Read the value without tracking it.
    pub fn get_untracked(&self) -> Value {
        DepTarget::untracked(|| self.get())
    }

    /// Write the value.
    pub fn set(&self, value: impl Into<Value>) {
        match &self.0.set {
            Some(set) => set(value.into()),
            None => warn("Write operation failed: ref has no setter.", None),
        }
    }

    /// Write a value computed from the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let next = f(&self.get_untracked());
        self.set(next);
    }

    pub fn is_readonly(&self) -> bool {
        self.0.readonly
    }

    pub fn is_computed(&self) -> bool {
        self.0.computed
    }

    fn trigger(&self) {
        if let Some(trigger) = &self.0.trigger {
            trigger();
        }
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("id", &self.0.id)
            .field("readonly", &self.0.readonly)
            .field("computed", &self.0.computed)
            .finish()
    }
}

/// A ref reading and writing the private slot of `container`.
fn slot_ref(container: Object) -> Ref {
    let (reader, writer, notifier) = (container.clone(), container.clone(), container);
    Ref::build(RefParts {
        get: Some(Arc::new(move || reader.get(Key::ref_slot()))),
        set: Some(Arc::new(move |value| {
            writer.set(Key::ref_slot(), value);
        })),
        trigger: Some(Arc::new(move || {
            if let Some(dep) = notifier.property_dep(Key::ref_slot()) {
                dep.notify();
            }
        })),
        ..Default::default()
    })
}

/// Whether `value` is a ref.
pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// The ref's value, or `value` itself when it is not a ref.
pub fn unref(value: &Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other.clone(),
    }
}

/// A ref whose stored object is kept as is, without deep observation.
pub fn shallow_ref(value: impl Into<Value>) -> Result<Ref> {
    host::ensure_installed()?;
    let value = value.into();
    if let Value::Ref(existing) = value {
        return Ok(existing);
    }
    let source = Object::new();
    source.define_property(Key::ref_slot(), PropertyDescriptor::data(value));
    Ok(slot_ref(shallow_object(&source)))
}

/// Force subscribers of `r` to run, even though its value did not change.
///
/// Used after mutating the inside of a shallow ref's value.
pub fn trigger_ref(r: &Ref) {
    r.trigger();
}

/// Handles given to a [`custom_ref`] factory.
#[derive(Clone)]
pub struct RefTracking {
    dep: crate::host::Dep,
}

impl RefTracking {
    /// Record a read.
    pub fn track(&self) {
        self.dep.depend();
    }

    /// Notify readers.
    pub fn trigger(&self) {
        self.dep.notify();
    }
}

/// A ref with explicit control over tracking and triggering.
///
/// `factory` receives the tracking handles and returns the get/set pair.
pub fn custom_ref<F, G, S>(factory: F) -> Result<Ref>
where
    F: FnOnce(RefTracking) -> (G, S),
    G: Fn() -> Value + Send + Sync + 'static,
    S: Fn(Value) + Send + Sync + 'static,
{
    host::ensure_installed()?;
    let tracking = RefTracking {
        dep: crate::host::Dep::new(),
    };
    let trigger = tracking.clone();
    let (get, set) = factory(tracking);
    Ok(Ref::build(RefParts {
        get: Some(Arc::new(get)),
        set: Some(Arc::new(set)),
        trigger: Some(Arc::new(move || trigger.trigger())),
        ..Default::default()
    }))
}

/// A ref proxying `key` of `obj`.
///
/// A missing key is added reactively first. When the key already holds a
/// ref, that ref is returned.
pub fn to_ref(obj: &Object, key: impl Into<Key>) -> Result<Ref> {
    host::ensure_installed()?;
    let key = key.into();
    if !obj.has(&key) {
        set(&Value::Object(obj.clone()), key.clone(), Value::Undefined)?;
    }
    if let Some(existing) = raw_ref_at(obj, &key) {
        return Ok(existing);
    }
    let (reader, writer, notifier) = (obj.clone(), obj.clone(), obj.clone());
    let (rk, wk, nk) = (key.clone(), key.clone(), key);
    Ok(Ref::build(RefParts {
        get: Some(Arc::new(move || reader.get(&rk))),
        set: Some(Arc::new(move |value| {
            writer.set(&wk, value);
        })),
        trigger: Some(Arc::new(move || {
            if let Some(dep) = notifier.property_dep(&nk) {
                dep.notify();
            }
        })),
        ..Default::default()
    }))
}

/// The ref stored at `key`, seen through any unwrapping accessor.
fn raw_ref_at(obj: &Object, key: &Key) -> Option<Ref> {
    use crate::value::Property;
    let raw = match obj.descriptor(key)?.property {
        Property::Data(value) => value,
        Property::Accessor(accessor) => DepTarget::untracked(|| accessor.raw()),
    };
    match raw {
        Value::Ref(r) => Some(r),
        _ => None,
    }
}

/// One ref per key of a reactive object, kept in sync both ways.
pub fn to_refs(obj: &Object) -> Result<Object> {
    host::ensure_installed()?;
    if !is_reactive(&Value::Object(obj.clone())) {
        warn("to_refs() expects a reactive object but received a plain one.", None);
    }
    let refs = Object::new();
    for key in obj.keys() {
        let r = to_ref(obj, &key)?;
        refs.set(key, Value::Ref(r));
    }
    Ok(refs)
}

/// An object whose keys read through refs stored on `obj`.
///
/// Writing a non-ref to a key holding a ref writes into the ref.
pub fn proxy_refs(obj: &Object) -> Result<Object> {
    host::ensure_installed()?;
    if is_reactive(&Value::Object(obj.clone())) {
        return Ok(obj.clone());
    }
    let view = Object::new();
    for key in obj.keys() {
        let (reader, writer) = (obj.clone(), obj.clone());
        let (rk, wk) = (key.clone(), key.clone());
        view.define_property(
            key,
            PropertyDescriptor::accessor(Arc::new(FnAccessor::new(
                move || unref(&reader.get(&rk)),
                move |value| match (writer.get(&wk), &value) {
                    (Value::Ref(r), v) if !is_ref(v) => r.set(value),
                    _ => {
                        writer.set(&wk, value);
                    }
                },
            ))),
        );
    }
    Ok(view)
}
