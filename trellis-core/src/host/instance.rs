//! Component Instances
//!
//! An [`Instance`] is the host's component: root data, props, computed
//! properties, methods, lifecycle hooks, events and an optional render
//! function, all reachable through one proxy object (the instance's
//! `this`). Instances without a render function are "headless"; the
//! reactivity layer uses them purely as owners for watchers.
//!
//! Lifecycle:
//!
//! ```text
//! new()     -> beforeCreate, created
//! mount()   -> beforeMount, (render), mounted
//! re-render -> beforeUpdate, (render), updated
//! destroy() -> beforeDestroy, (teardown), destroyed
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::dep::{DepTarget, SubscriberId};
use super::observer::{define_reactive, mark_inert, observe, observer_of};
use super::watcher::{Callback, Getter, WatchCallback, Watcher, WatcherOptions};
use crate::config::warn;
use crate::value::{FnAccessor, Function, Key, Object, PropertyDescriptor, Value};

static INSTANCE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Key under which the attribute bag is stored on the internal slot object.
const ATTRS_KEY: &str = "$attrs";

/// Lifecycle stages an instance can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    BeforeCreate,
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    Activated,
    Deactivated,
    BeforeDestroy,
    Destroyed,
}

impl LifecycleHook {
    pub fn name(self) -> &'static str {
        match self {
            Self::BeforeCreate => "beforeCreate",
            Self::Created => "created",
            Self::BeforeMount => "beforeMount",
            Self::Mounted => "mounted",
            Self::BeforeUpdate => "beforeUpdate",
            Self::Updated => "updated",
            Self::Activated => "activated",
            Self::Deactivated => "deactivated",
            Self::BeforeDestroy => "beforeDestroy",
            Self::Destroyed => "destroyed",
        }
    }
}

/// Produces an instance's render output.
pub type RenderFn = Arc<dyn Fn(&Instance) -> Value + Send + Sync>;

/// Event listener.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Setter half of a computed property.
pub type ComputedSetter = Arc<dyn Fn(Value) + Send + Sync>;

/// A computed property definition.
#[derive(Clone)]
pub struct ComputedDef {
    pub get: Getter,
    pub set: Option<ComputedSetter>,
}

/// Options for [`Instance::new`].
#[derive(Clone, Default)]
pub struct InstanceOptions {
    pub name: Option<String>,
    /// Prop values, keyed by prop name.
    pub props: Option<Object>,
    /// Root data. Observed and proxied onto the instance.
    pub data: Option<Object>,
    pub computed: Vec<(Key, ComputedDef)>,
    pub methods: Vec<(Key, Function)>,
    pub render: Option<RenderFn>,
    pub parent: Option<Instance>,
}

impl InstanceOptions {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn props(mut self, props: Object) -> Self {
        self.props = Some(props);
        self
    }

    pub fn data(mut self, data: Object) -> Self {
        self.data = Some(data);
        self
    }

    pub fn computed(mut self, key: impl Into<Key>, def: ComputedDef) -> Self {
        self.computed.push((key.into(), def));
        self
    }

    pub fn method(mut self, key: impl Into<Key>, method: Function) -> Self {
        self.methods.push((key.into(), method));
        self
    }

    pub fn render<F>(mut self, render: F) -> Self
    where
        F: Fn(&Instance) -> Value + Send + Sync + 'static,
    {
        self.render = Some(Arc::new(render));
        self
    }

    pub fn parent(mut self, parent: &Instance) -> Self {
        self.parent = Some(parent.clone());
        self
    }
}

/// Options for [`Instance::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HostWatchOptions {
    pub immediate: bool,
    pub deep: bool,
    pub sync: bool,
}

/// A shared handle to a component instance.
#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);

/// A non-owning handle to an instance.
#[derive(Clone)]
pub struct WeakInstance(Weak<InstanceInner>);

struct InstanceInner {
    id: u64,
    name: String,
    proxy: Object,
    data: Object,
    props: Object,
    prop_keys: Vec<Key>,
    attrs_slot: Object,
    parent: Option<WeakInstance>,
    render: Mutex<Option<RenderFn>>,
    render_watcher: Mutex<Option<Watcher>>,
    rendered: Mutex<Value>,
    watchers: Mutex<Vec<Watcher>>,
    hooks: Mutex<HashMap<LifecycleHook, Vec<Callback>>>,
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    extensions: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    mounted: AtomicBool,
    being_destroyed: AtomicBool,
    destroyed: AtomicBool,
}

impl Instance {
    /// Create and initialize an instance.
    ///
    /// Runs `beforeCreate` and `created`. The instance is not mounted.
    pub fn new(options: InstanceOptions) -> Self {
        let proxy = Object::new();
        let props = options.props.unwrap_or_default();
        let data = options.data.unwrap_or_default();
        let prop_keys = props.keys();

        let attrs_slot = Object::new();
        define_reactive(&attrs_slot, Key::new(ATTRS_KEY), Some(Value::Object(Object::new())), true);

        let vm = Self(Arc::new(InstanceInner {
            id: INSTANCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            name: options.name.unwrap_or_else(|| "Anonymous".to_string()),
            proxy: proxy.clone(),
            data: data.clone(),
            props: props.clone(),
            prop_keys,
            attrs_slot,
            parent: options.parent.as_ref().map(Instance::downgrade),
            render: Mutex::new(options.render),
            render_watcher: Mutex::new(None),
            rendered: Mutex::new(Value::Undefined),
            watchers: Mutex::new(Vec::new()),
            hooks: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            extensions: Mutex::new(HashMap::new()),
            mounted: AtomicBool::new(false),
            being_destroyed: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }));

        // The proxy is never observed, and adding keys through `set` warns.
        let proxy_value = Value::Object(proxy);
        mark_inert(&proxy_value);
        if let Some(ob) = observer_of(&proxy_value) {
            ob.add_vm();
        }

        vm.call_hook(LifecycleHook::BeforeCreate);
        vm.init_props();
        vm.init_methods(options.methods);
        vm.init_data();
        for (key, def) in options.computed {
            vm.define_computed(key, def);
        }
        vm.call_hook(LifecycleHook::Created);
        tracing::debug!(target: "trellis", id = vm.id(), name = %vm.name(), "instance created");
        vm
    }

    /// An instance with no state and no render function.
    pub fn headless() -> Self {
        Self::new(InstanceOptions::default())
    }

    fn init_props(&self) {
        let props = self.0.props.clone();
        for key in props.keys() {
            define_reactive(&props, key.clone(), None, false);
            let (reader, writer) = (props.clone(), props.clone());
            let (weak, name) = (self.downgrade(), key.clone());
            let prop_key = key.clone();
            self.0.proxy.define_property(
                key,
                PropertyDescriptor::accessor(Arc::new(FnAccessor::new(
                    move || reader.get(&prop_key),
                    move |value| {
                        let vm = weak.upgrade();
                        warn(
                            &format!(
                                "Avoid mutating a prop directly since the value will be overwritten whenever the parent component re-renders. Prop being mutated: \"{name}\""
                            ),
                            vm.as_ref(),
                        );
                        writer.set(&name, value);
                    },
                ))),
            );
        }
    }

    fn init_methods(&self, methods: Vec<(Key, Function)>) {
        for (key, method) in methods {
            if self.0.prop_keys.contains(&key) {
                warn(&format!("Method \"{key}\" has already been defined as a prop."), Some(self));
                continue;
            }
            self.0.proxy.define_property(key, PropertyDescriptor::data(Value::Function(method)));
        }
    }

    fn init_data(&self) {
        let data = self.0.data.clone();
        observe(&Value::Object(data.clone()), true);
        for key in data.keys() {
            if self.0.prop_keys.contains(&key) {
                warn(
                    &format!("The data property \"{key}\" is already declared as a prop. Use prop default value instead."),
                    Some(self),
                );
                continue;
            }
            if self.0.proxy.has(&key) {
                warn(&format!("Method \"{key}\" has already been defined as a data property."), Some(self));
            }
            let (reader, writer) = (data.clone(), data.clone());
            let (rk, wk) = (key.clone(), key.clone());
            self.0.proxy.define_property(
                key,
                PropertyDescriptor::accessor(Arc::new(FnAccessor::new(
                    move || reader.get(&rk),
                    move |value| {
                        writer.set(&wk, value);
                    },
                ))),
            );
        }
    }

    /// Define a cached computed property on the instance.
    pub fn define_computed(&self, key: impl Into<Key>, def: ComputedDef) {
        let key = key.into();
        if self.0.proxy.has(&key) {
            let message = if self.0.data.has(&key) {
                format!("The computed property \"{key}\" is already defined in data.")
            } else if self.0.prop_keys.contains(&key) {
                format!("The computed property \"{key}\" is already defined as a prop.")
            } else {
                format!("The computed property \"{key}\" is already defined on the instance.")
            };
            warn(&message, Some(self));
            return;
        }

        let watcher = Watcher::new(
            Some(self),
            def.get,
            Arc::new(|_, _| {}),
            WatcherOptions { lazy: true, ..Default::default() },
        );
        let reader = watcher.clone();
        let getter = move || {
            if reader.is_dirty() {
                reader.evaluate();
            }
            if DepTarget::is_active() {
                reader.depend();
            }
            reader.value()
        };

        let weak = self.downgrade();
        let name = key.clone();
        let setter = def.set;
        let set = move |value: Value| match &setter {
            Some(set) => set(value),
            None => {
                let vm = weak.upgrade();
                warn(
                    &format!("Computed property \"{name}\" was assigned to but it has no setter."),
                    vm.as_ref(),
                );
            }
        };
        self.0.proxy.define_property(
            key,
            PropertyDescriptor::accessor(Arc::new(FnAccessor::new(getter, set))),
        );
    }

    /// Watch `getter` for changes, owned by this instance.
    ///
    /// With `immediate`, `cb` is called right away with the initial value
    /// and `Undefined` as the old value.
    pub fn watch(&self, getter: Getter, cb: WatchCallback, options: HostWatchOptions) -> Watcher {
        let watcher = Watcher::new(
            Some(self),
            getter,
            cb.clone(),
            WatcherOptions {
                deep: options.deep,
                sync: options.sync,
                user: true,
                ..Default::default()
            },
        );
        if options.immediate {
            let value = watcher.value();
            DepTarget::untracked(|| cb(value, Value::Undefined));
        }
        watcher
    }

    /// Replace the render function. Takes effect on the next mount.
    pub fn set_render(&self, render: RenderFn) {
        *self.0.render.lock() = Some(render);
    }

    /// Mount: create the render watcher and run the first render.
    pub fn mount(&self) {
        if self.is_mounted() || self.is_being_destroyed() {
            return;
        }
        self.call_hook(LifecycleHook::BeforeMount);

        let render = self.0.render.lock().clone();
        if let Some(render) = render {
            let weak = self.downgrade();
            let getter: Getter = Arc::new(move || {
                let Some(vm) = weak.upgrade() else {
                    return Value::Undefined;
                };
                let output = render(&vm);
                *vm.0.rendered.lock() = output.clone();
                output
            });
            let weak = self.downgrade();
            let before: Callback = Arc::new(move || {
                if let Some(vm) = weak.upgrade() {
                    if vm.is_mounted() && !vm.is_destroyed() {
                        vm.call_hook(LifecycleHook::BeforeUpdate);
                    }
                }
            });
            let watcher = Watcher::new(
                Some(self),
                getter,
                Arc::new(|_, _| {}),
                WatcherOptions { before: Some(before), ..Default::default() },
            );
            *self.0.render_watcher.lock() = Some(watcher);
        }

        self.0.mounted.store(true, Ordering::SeqCst);
        self.call_hook(LifecycleHook::Mounted);
    }

    /// Queue a re-render.
    pub fn force_update(&self) {
        let watcher = self.0.render_watcher.lock().clone();
        if let Some(watcher) = watcher {
            watcher.update();
        }
    }

    /// Tear down watchers and run the destroy hooks. Idempotent.
    pub fn destroy(&self) {
        if self.0.being_destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.call_hook(LifecycleHook::BeforeDestroy);

        let render_watcher = self.0.render_watcher.lock().take();
        if let Some(watcher) = render_watcher {
            watcher.teardown();
        }
        let watchers = std::mem::take(&mut *self.0.watchers.lock());
        for watcher in watchers {
            watcher.teardown();
        }
        if let Some(ob) = observer_of(&Value::Object(self.0.data.clone())) {
            ob.remove_vm();
        }

        self.0.destroyed.store(true, Ordering::SeqCst);
        self.call_hook(LifecycleHook::Destroyed);
        self.0.hooks.lock().clear();
        self.0.listeners.lock().clear();
        tracing::debug!(target: "trellis", id = self.id(), name = %self.name(), "instance destroyed");
    }

    /// Run every callback registered for `hook`, untracked.
    pub fn call_hook(&self, hook: LifecycleHook) {
        let callbacks = self.0.hooks.lock().get(&hook).cloned().unwrap_or_default();
        if callbacks.is_empty() {
            return;
        }
        tracing::trace!(target: "trellis", id = self.id(), hook = hook.name(), "calling hook");
        DepTarget::untracked(|| {
            for callback in callbacks {
                callback();
            }
        });
    }

    /// Register a lifecycle callback.
    pub fn on_hook<F>(&self, hook: LifecycleHook, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.0.hooks.lock().entry(hook).or_default().push(Arc::new(callback));
    }

    pub fn on<F>(&self, event: &str, listener: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.0
            .listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn emit(&self, event: &str, args: &[Value]) {
        let listeners = self.0.listeners.lock().get(event).cloned().unwrap_or_default();
        for listener in listeners {
            listener(args);
        }
    }

    /// Read a property through the instance proxy.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        self.0.proxy.get(key)
    }

    /// Write a property through the instance proxy.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        self.0.proxy.set(key, value)
    }

    /// The instance's `this`.
    pub fn proxy(&self) -> &Object {
        &self.0.proxy
    }

    pub fn data(&self) -> &Object {
        &self.0.data
    }

    pub fn props(&self) -> &Object {
        &self.0.props
    }

    pub fn is_prop(&self, key: &Key) -> bool {
        self.0.prop_keys.contains(key)
    }

    /// The fallthrough attributes. Reading tracks replacement.
    pub fn attrs(&self) -> Object {
        match self.0.attrs_slot.get(ATTRS_KEY) {
            Value::Object(attrs) => attrs,
            _ => Object::new(),
        }
    }

    /// Replace the fallthrough attributes.
    pub fn set_attrs(&self, attrs: Object) {
        self.0.attrs_slot.set(ATTRS_KEY, attrs);
    }

    /// The output of the last render.
    pub fn rendered(&self) -> Value {
        self.0.rendered.lock().clone()
    }

    pub fn parent(&self) -> Option<Instance> {
        self.0.parent.as_ref().and_then(WeakInstance::upgrade)
    }

    /// Typed per-instance state.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let ext = self.0.extensions.lock().get(&TypeId::of::<T>()).cloned()?;
        ext.downcast::<T>().ok()
    }

    /// Get the extension of type `T`, creating it with `init` if missing.
    ///
    /// The flag is true when the extension was created by this call.
    pub fn extension_or_insert_with<T, F>(&self, init: F) -> (Arc<T>, bool)
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.extension::<T>() {
            return (existing, false);
        }
        let created = Arc::new(init());
        self.0
            .extensions
            .lock()
            .insert(TypeId::of::<T>(), created.clone());
        (created, true)
    }

    pub(crate) fn register_watcher(&self, watcher: &Watcher) {
        self.0.watchers.lock().push(watcher.clone());
    }

    pub(crate) fn remove_watcher(&self, id: SubscriberId) {
        self.0.watchers.lock().retain(|w| w.id() != id);
    }

    pub fn is_render_watcher(&self, watcher: &Watcher) -> bool {
        self.0
            .render_watcher
            .lock()
            .as_ref()
            .is_some_and(|w| w.ptr_eq(watcher))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_mounted(&self) -> bool {
        self.0.mounted.load(Ordering::SeqCst)
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.0.being_destroyed.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.load(Ordering::SeqCst)
    }

    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl WeakInstance {
    pub fn upgrade(&self) -> Option<Instance> {
        self.0.upgrade().map(Instance)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("mounted", &self.is_mounted())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
