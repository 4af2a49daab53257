//! Watchers
//!
//! A [`Watcher`] evaluates a getter while collecting the deps it reads,
//! and re-evaluates when any of them notifies.
//!
//! # How Watchers Work
//!
//! 1. `get()` pushes the watcher as the dependency target, runs the getter
//!    (and, for deep watchers, traverses the result), then swaps the newly
//!    collected deps in and unsubscribes from the ones no longer read.
//!
//! 2. A notification calls `update()`. Lazy watchers only mark themselves
//!    dirty; sync watchers run on the spot; everything else is handed to
//!    the scheduler.
//!
//! 3. `run()` re-evaluates and invokes the callback when the value changed,
//!    or unconditionally for object values and deep watchers (their
//!    contents may have changed under the same identity).
//!
//! Lazy watchers back computed properties: the owner calls `evaluate()`
//! when the watcher is dirty and `depend()` to forward its deps to the
//! outer target.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dep::{Dep, DepTarget, Subscriber, SubscriberId};
use super::instance::{Instance, WeakInstance};
use super::scheduler;
use crate::value::Value;

/// Produces the watched value.
pub type Getter = Arc<dyn Fn() -> Value + Send + Sync>;

/// Receives `(new, old)` after a change.
pub type WatchCallback = Arc<dyn Fn(Value, Value) + Send + Sync>;

/// A plain callback.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send>;

/// Receives the re-evaluation job of a watcher created with `defer_get`.
pub type Deferral = Arc<dyn Fn(Job) + Send + Sync>;

/// Construction options for a [`Watcher`].
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Traverse the value so nested reads are tracked too.
    pub deep: bool,
    /// Created through a user-facing API rather than by the host itself.
    pub user: bool,
    /// Only mark dirty on change; evaluate on demand.
    pub lazy: bool,
    /// Run on notification instead of going through the scheduler.
    pub sync: bool,
    /// Called by the scheduler right before the watcher runs.
    pub before: Option<Callback>,
    /// Hand re-evaluations to this callback instead of running them.
    pub defer_get: Option<Deferral>,
}

/// A dependency-tracking evaluation of a getter.
#[derive(Clone)]
pub struct Watcher(Arc<WatcherInner>);

struct WatcherInner {
    id: SubscriberId,
    vm: Option<WeakInstance>,
    getter: Getter,
    cb: WatchCallback,
    deep: bool,
    user: bool,
    lazy: bool,
    sync: bool,
    before: Option<Callback>,
    defer_get: Option<Deferral>,
    dirty: AtomicBool,
    active: AtomicBool,
    evaluating: AtomicBool,
    value: Mutex<Value>,
    deps: Mutex<DepRecord>,
    teardown_hooks: Mutex<Vec<Callback>>,
}

#[derive(Default)]
struct DepRecord {
    deps: Vec<Dep>,
    dep_ids: HashSet<u64>,
    new_deps: Vec<Dep>,
    new_dep_ids: HashSet<u64>,
}

impl Watcher {
    /// Create a watcher, owned by `vm` when given.
    ///
    /// Non-lazy watchers evaluate immediately.
    pub fn new(vm: Option<&Instance>, getter: Getter, cb: WatchCallback, options: WatcherOptions) -> Self {
        let watcher = Self(Arc::new(WatcherInner {
            id: SubscriberId::new(),
            vm: vm.map(Instance::downgrade),
            getter,
            cb,
            deep: options.deep,
            user: options.user,
            lazy: options.lazy,
            sync: options.sync,
            before: options.before,
            defer_get: options.defer_get,
            dirty: AtomicBool::new(options.lazy),
            active: AtomicBool::new(true),
            evaluating: AtomicBool::new(false),
            value: Mutex::new(Value::Undefined),
            deps: Mutex::new(DepRecord::default()),
            teardown_hooks: Mutex::new(Vec::new()),
        }));

        if let Some(vm) = vm {
            vm.register_watcher(&watcher);
        }
        if !watcher.0.lazy {
            let value = watcher.get();
            *watcher.0.value.lock() = value;
        }
        watcher
    }

    pub fn id(&self) -> SubscriberId {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &Watcher) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The owning instance, while it is alive.
    pub fn vm(&self) -> Option<Instance> {
        self.0.vm.as_ref().and_then(WeakInstance::upgrade)
    }

    pub fn is_active(&self) -> bool {
        self.0.active.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.0.dirty.load(Ordering::SeqCst)
    }

    pub fn is_user(&self) -> bool {
        self.0.user
    }

    /// The last evaluated value.
    pub fn value(&self) -> Value {
        self.0.value.lock().clone()
    }

    /// Evaluate the getter, re-collecting dependencies.
    pub fn get(&self) -> Value {
        let value = {
            let _target = DepTarget::push(Some(self.clone()));
            let value = (self.0.getter)();
            if self.0.deep {
                traverse(&value);
            }
            value
        };
        self.cleanup_deps();
        value
    }

    /// Record a dependency read during the current evaluation.
    pub(crate) fn add_dep(&self, dep: &Dep) {
        let subscribe = {
            let mut record = self.0.deps.lock();
            let id = dep.id();
            if record.new_dep_ids.insert(id) {
                record.new_deps.push(dep.clone());
                !record.dep_ids.contains(&id)
            } else {
                false
            }
        };
        if subscribe {
            dep.add_sub(Arc::new(self.clone()));
        }
    }

    fn cleanup_deps(&self) {
        let stale: Vec<Dep> = {
            let mut guard = self.0.deps.lock();
            let record = &mut *guard;
            let stale = record
                .deps
                .iter()
                .filter(|d| !record.new_dep_ids.contains(&d.id()))
                .cloned()
                .collect();
            record.deps = std::mem::take(&mut record.new_deps);
            record.dep_ids = std::mem::take(&mut record.new_dep_ids);
            stale
        };
        for dep in stale {
            dep.remove_sub(self.id());
        }
    }

    /// React to a dependency change.
    pub fn update(&self) {
        if self.0.lazy {
            self.0.dirty.store(true, Ordering::SeqCst);
        } else if self.0.sync {
            self.run();
        } else {
            scheduler::queue_watcher(self.clone());
        }
    }

    /// Re-evaluate and invoke the callback if the value changed.
    ///
    /// A run triggered by the watcher's own evaluation is ignored.
    pub fn run(&self) {
        if !self.is_active() || self.0.evaluating.load(Ordering::SeqCst) {
            return;
        }

        if let Some(defer) = &self.0.defer_get {
            let watcher = self.clone();
            defer(Box::new(move || {
                if watcher.is_active() {
                    let value = watcher.evaluate_guarded();
                    *watcher.0.value.lock() = value;
                }
            }));
            return;
        }

        let value = self.evaluate_guarded();
        let old = {
            let mut slot = self.0.value.lock();
            if value.same(&slot) && !value.is_object() && !self.0.deep {
                return;
            }
            std::mem::replace(&mut *slot, value.clone())
        };
        (self.0.cb)(value, old);
    }

    fn evaluate_guarded(&self) -> Value {
        self.0.evaluating.store(true, Ordering::SeqCst);
        let value = self.get();
        self.0.evaluating.store(false, Ordering::SeqCst);
        value
    }

    /// Recompute a lazy watcher and clear its dirty flag.
    pub fn evaluate(&self) {
        let value = self.get();
        *self.0.value.lock() = value;
        self.0.dirty.store(false, Ordering::SeqCst);
    }

    /// Make the current target depend on everything this watcher depends on.
    pub fn depend(&self) {
        let deps = self.0.deps.lock().deps.clone();
        for dep in deps {
            dep.depend();
        }
    }

    pub(crate) fn before(&self) {
        if let Some(before) = &self.0.before {
            before();
        }
    }

    /// Run `hook` when the watcher is torn down.
    pub fn on_teardown<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.0.teardown_hooks.lock().push(Arc::new(hook));
    }

    /// Unsubscribe from every dep and deactivate. Idempotent.
    pub fn teardown(&self) {
        if !self.0.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(vm) = self.vm() {
            if !vm.is_being_destroyed() {
                vm.remove_watcher(self.id());
            }
        }
        let deps = {
            let mut record = self.0.deps.lock();
            record.dep_ids.clear();
            std::mem::take(&mut record.deps)
        };
        for dep in deps {
            dep.remove_sub(self.id());
        }
        let hooks = std::mem::take(&mut *self.0.teardown_hooks.lock());
        for hook in hooks {
            hook();
        }
    }
}

impl Subscriber for Watcher {
    fn id(&self) -> SubscriberId {
        self.0.id
    }

    fn update(&self) {
        Watcher::update(self);
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.0.id)
            .field("lazy", &self.0.lazy)
            .field("sync", &self.0.sync)
            .field("deep", &self.0.deep)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Read every nested property of `value` so the current target depends
/// on all of them.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<u64>) {
    match value {
        Value::Object(obj) => {
            if obj.is_frozen() || !seen.insert(obj.id()) {
                return;
            }
            if let Some(ob) = obj.marks().observer() {
                ob.dep().depend();
            }
            for key in obj.keys() {
                traverse_inner(&obj.get(&key), seen);
            }
        }
        Value::Array(arr) => {
            if arr.is_frozen() || !seen.insert(arr.id()) {
                return;
            }
            if let Some(ob) = arr.marks().observer() {
                ob.dep().depend();
            }
            for item in arr.to_vec() {
                traverse_inner(&item, seen);
            }
        }
        Value::Ref(r) => traverse_inner(&r.get(), seen),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{define_reactive, install, observe, uninstall};
    use crate::value::Object;
    use crate::Config;
    use std::sync::atomic::AtomicUsize;

    fn counting_watcher(obj: &Object, key: &'static str, options: WatcherOptions) -> (Watcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let reader = obj.clone();
        let counter = calls.clone();
        let watcher = Watcher::new(
            None,
            Arc::new(move || reader.get(key)),
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            options,
        );
        (watcher, calls)
    }

    #[test]
    fn sync_watcher_runs_on_write() {
        install(Config::default());
        let obj = Object::from_entries([("a", 1)]);
        define_reactive(&obj, "a".into(), None, false);

        let (watcher, calls) = counting_watcher(&obj, "a", WatcherOptions { sync: true, ..Default::default() });
        assert_eq!(watcher.value(), Value::from(1));

        obj.set("a", 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.value(), Value::from(2));

        // Same value is not a change.
        obj.set("a", 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        uninstall();
    }

    #[test]
    fn lazy_watcher_only_marks_dirty() {
        install(Config::default());
        let obj = Object::from_entries([("a", 1)]);
        define_reactive(&obj, "a".into(), None, false);

        let (watcher, calls) = counting_watcher(&obj, "a", WatcherOptions { lazy: true, ..Default::default() });
        assert!(watcher.is_dirty());
        watcher.evaluate();
        assert!(!watcher.is_dirty());

        obj.set("a", 5);
        assert!(watcher.is_dirty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        uninstall();
    }

    #[test]
    fn teardown_unsubscribes_and_runs_hooks() {
        install(Config::default());
        let obj = Object::from_entries([("a", 1)]);
        define_reactive(&obj, "a".into(), None, false);
        let dep = obj.property_dep("a").unwrap();

        let (watcher, calls) = counting_watcher(&obj, "a", WatcherOptions { sync: true, ..Default::default() });
        let torn = Arc::new(AtomicBool::new(false));
        let flag = torn.clone();
        watcher.on_teardown(move || flag.store(true, Ordering::SeqCst));
        assert_eq!(dep.subscriber_count(), 1);

        watcher.teardown();
        watcher.teardown();
        assert!(torn.load(Ordering::SeqCst));
        assert_eq!(dep.subscriber_count(), 0);

        obj.set("a", 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        uninstall();
    }

    #[test]
    fn deep_watcher_sees_nested_writes() {
        install(Config::default());
        let inner = Object::from_entries([("b", 1)]);
        let outer = Object::from_entries([("a", Value::from(&inner))]);
        observe(&Value::from(&outer), false);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let root = outer.clone();
        let _watcher = Watcher::new(
            None,
            Arc::new(move || Value::from(&root)),
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            WatcherOptions { deep: true, sync: true, ..Default::default() },
        );

        inner.set("b", 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        uninstall();
    }
}
