//! Components
//!
//! A thin facade that runs a composition-style `setup` function on a host
//! [`Instance`].
//!
//! `setup` runs once, during mount, with the instance current and the
//! instance's effect scope active. Everything it creates (watches,
//! computed refs, nested scopes) is stopped when the instance is
//! destroyed. Its result is either a set of bindings exposed on the
//! instance proxy, or a render function.
//!
//! ```
//! use trellis_core::{install, mount_component, ComponentOptions, Config, Object, Ref, SetupResult, Value};
//!
//! install(Config::default());
//! let vm = mount_component(
//!     ComponentOptions::default().named("Counter").setup(|_, _| {
//!         let count = Ref::new(1).unwrap();
//!         SetupResult::Bindings(Object::from_entries([("count", count)]).into())
//!     }),
//!     Object::new(),
//!     Object::new(),
//! )
//! .unwrap();
//! assert_eq!(vm.get("count"), Value::from(1));
//! # trellis_core::uninstall();
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::warn;
use crate::error::Result;
use crate::host::{self, observer_of, DepTarget, Instance, InstanceOptions, LifecycleHook, RenderFn, WeakInstance};
use crate::reactivity::{is_reactive, to_refs, CurrentInstance, EffectScope, Ref};
use crate::value::{Accessor, FnAccessor, Function, Key, Object, Property, PropertyDescriptor, Value};

/// Signature of a setup function: `(props, context) -> result`.
pub type SetupFn = Arc<dyn Fn(&Object, &SetupContext) -> SetupResult + Send + Sync>;

/// What a setup function hands back.
#[derive(Clone)]
pub enum SetupResult {
    /// An object whose keys are exposed on the instance proxy.
    Bindings(Value),
    /// A render function replacing the component's own.
    Render(RenderFn),
    Empty,
}

impl fmt::Debug for SetupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bindings(value) => f.debug_tuple("Bindings").field(value).finish(),
            Self::Render(_) => f.write_str("Render(..)"),
            Self::Empty => f.write_str("Empty"),
        }
    }
}

/// Options of a composition-style component.
#[derive(Clone, Default)]
pub struct ComponentOptions {
    pub name: Option<String>,
    /// Declared prop names. Other passed props fall through to attrs.
    pub props: Vec<Key>,
    pub data: Option<Object>,
    pub methods: Vec<(Key, Function)>,
    pub setup: Option<SetupFn>,
    pub render: Option<RenderFn>,
}

impl ComponentOptions {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn prop(mut self, name: impl Into<Key>) -> Self {
        self.props.push(name.into());
        self
    }

    pub fn data(mut self, data: Object) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method(mut self, key: impl Into<Key>, method: Function) -> Self {
        self.methods.push((key.into(), method));
        self
    }

    pub fn setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&Object, &SetupContext) -> SetupResult + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(setup));
        self
    }

    pub fn render<F>(mut self, render: F) -> Self
    where
        F: Fn(&Instance) -> Value + Send + Sync + 'static,
    {
        self.render = Some(Arc::new(render));
        self
    }
}

/// The second argument of a setup function.
pub struct SetupContext {
    attrs: Object,
    slots: Object,
    vm: WeakInstance,
}

impl SetupContext {
    /// Fallthrough attributes. Reads track the instance's attrs and the
    /// key set is refreshed on mount and before every re-render.
    pub fn attrs(&self) -> &Object {
        &self.attrs
    }

    pub fn slots(&self) -> &Object {
        &self.slots
    }

    /// Emit `event` on the instance.
    pub fn emit(&self, event: &str, args: &[Value]) {
        if let Some(vm) = self.vm.upgrade() {
            vm.emit(event, args);
        }
    }
}

/// Create, set up and mount a component.
///
/// `props` holds the values passed by the parent; keys that are not
/// declared props are merged into `attrs`.
pub fn mount_component(options: ComponentOptions, props: Object, attrs: Object) -> Result<Instance> {
    mount_component_with_slots(options, props, attrs, Object::new())
}

/// [`mount_component`] with slot functions.
pub fn mount_component_with_slots(
    options: ComponentOptions,
    props: Object,
    attrs: Object,
    slots: Object,
) -> Result<Instance> {
    host::ensure_installed()?;

    let declared = Object::from_entries(options.props.iter().map(|key| (key, props.get(key))));
    for key in props.keys() {
        if !options.props.contains(&key) && !attrs.has(&key) {
            attrs.set(&key, props.get(&key));
        }
    }

    let mut instance_options = InstanceOptions::default().props(declared);
    instance_options.name = options.name.clone();
    instance_options.data = options.data.clone();
    instance_options.methods = options.methods.clone();
    instance_options.render = options.render.clone();
    let vm = Instance::new(instance_options);
    vm.set_attrs(attrs);

    if let Some(setup) = &options.setup {
        run_setup(&vm, setup, slots);
    }

    vm.mount();
    Ok(vm)
}

fn run_setup(vm: &Instance, setup: &SetupFn, slots: Object) {
    let ctx = SetupContext {
        attrs: Object::new(),
        slots,
        vm: vm.downgrade(),
    };
    sync_attrs(vm, &ctx.attrs);
    for hook in [LifecycleHook::Mounted, LifecycleHook::BeforeUpdate] {
        let (weak, target) = (vm.downgrade(), ctx.attrs.clone());
        vm.on_hook(hook, move || {
            if let Some(vm) = weak.upgrade() {
                sync_attrs(&vm, &target);
            }
        });
    }

    let scope = EffectScope::of_instance(vm);
    let result = {
        let _current = CurrentInstance::enter(vm.clone());
        DepTarget::untracked(|| scope.run(|| setup(vm.props(), &ctx)))
    };

    match result {
        Some(SetupResult::Render(render)) => {
            vm.set_render(Arc::new(move |vm: &Instance| {
                let _current = CurrentInstance::enter(vm.clone());
                render(vm)
            }));
        }
        Some(SetupResult::Bindings(Value::Object(bindings))) => bind_all(vm, &bindings),
        Some(SetupResult::Bindings(Value::Undefined)) | Some(SetupResult::Empty) | None => {}
        Some(SetupResult::Bindings(other)) => warn(
            &format!("setup() must return an object or a render function, got {other:?}"),
            Some(vm),
        ),
    }
}

/// Mirror the keys of the instance attrs onto `target`.
fn sync_attrs(vm: &Instance, target: &Object) {
    let current = DepTarget::untracked(|| vm.attrs());
    for key in target.keys() {
        if !current.has(&key) {
            target.remove(&key);
        }
    }
    for key in current.keys() {
        if target.has(&key) {
            continue;
        }
        let weak = vm.downgrade();
        let read = key.clone();
        target.define_property(
            key,
            PropertyDescriptor::accessor(Arc::new(FnAccessor::getter(move || {
                weak.upgrade().map(|vm| vm.attrs().get(&read)).unwrap_or_default()
            }))),
        );
    }
}

fn bind_all(vm: &Instance, bindings: &Object) {
    let bindings = if is_reactive(&Value::Object(bindings.clone())) {
        match to_refs(bindings) {
            Ok(refs) => refs,
            Err(_) => return,
        }
    } else {
        bindings.clone()
    };

    for key in bindings.keys() {
        if vm.is_prop(&key) {
            warn(
                &format!("The setup binding property \"{key}\" is already declared as a prop."),
                Some(vm),
            );
            continue;
        }
        if vm.proxy().has(&key) {
            warn(&format!("The setup binding property \"{key}\" is already declared."), Some(vm));
            continue;
        }
        let value = DepTarget::untracked(|| bindings.descriptor(&key).map(|d| raw_of(&d)));
        if let Some(value) = value {
            bind(vm, key, value);
        }
    }
}

fn raw_of(descriptor: &PropertyDescriptor) -> Value {
    match &descriptor.property {
        Property::Data(value) => value.clone(),
        Property::Accessor(accessor) => accessor.raw(),
    }
}

/// Expose one binding on the instance proxy.
fn bind(vm: &Instance, key: Key, value: Value) {
    let value = match value {
        Value::Function(_) => {
            vm.proxy().define_property(key, PropertyDescriptor::data(value));
            return;
        }
        Value::Ref(_) => value,
        Value::Array(_) if is_reactive(&value) => Ref::new(value).map(Value::Ref).unwrap_or_default(),
        v if !v.is_object() => Ref::new(v).map(Value::Ref).unwrap_or_default(),
        v => v,
    };

    let accessor: Arc<dyn Accessor> = match value {
        Value::Ref(r) => {
            let writer = r.clone();
            Arc::new(FnAccessor::new(move || r.get(), move |v| writer.set(v)))
        }
        other => Arc::new(ObjectBinding(Mutex::new(other))),
    };
    vm.proxy().define_property(key, PropertyDescriptor::accessor(accessor));
}

/// A bound object. Reading a reactive object tracks its structure.
struct ObjectBinding(Mutex<Value>);

impl Accessor for ObjectBinding {
    fn get(&self) -> Value {
        let value = self.0.lock().clone();
        if DepTarget::is_active() {
            if let Some(ob) = observer_of(&value) {
                if !ob.is_raw() {
                    ob.dep().depend();
                }
            }
        }
        value
    }

    fn set(&self, value: Value) {
        *self.0.lock() = value;
    }
}

/// The instance whose setup (or hook, or render) is running.
pub fn get_current_instance() -> Option<Instance> {
    CurrentInstance::current()
}

fn inject_hook<F>(api: &str, hook: LifecycleHook, callback: F) -> bool
where
    F: Fn() + Send + Sync + 'static,
{
    let Some(vm) = CurrentInstance::current() else {
        warn(
            &format!(
                "{api} is called when there is no active component instance to be associated with. Lifecycle injection APIs can only be used during execution of setup()."
            ),
            None,
        );
        return false;
    };
    let weak = vm.downgrade();
    vm.on_hook(hook, move || {
        if let Some(vm) = weak.upgrade() {
            let _current = CurrentInstance::enter(vm);
            callback();
        }
    });
    true
}

macro_rules! lifecycle_api {
    ($($(#[$meta:meta])* $name:ident => $hook:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $name<F>(callback: F) -> bool
            where
                F: Fn() + Send + Sync + 'static,
            {
                inject_hook(stringify!($name), LifecycleHook::$hook, callback)
            }
        )*
    };
}

lifecycle_api! {
    /// Register a `beforeMount` callback on the current instance.
    ///
    /// Returns false, with a warning, outside setup.
    on_before_mount => BeforeMount;
    on_mounted => Mounted;
    on_before_update => BeforeUpdate;
    on_updated => Updated;
    on_before_unmount => BeforeDestroy;
    on_unmounted => Destroyed;
    on_activated => Activated;
    on_deactivated => Deactivated;
}
