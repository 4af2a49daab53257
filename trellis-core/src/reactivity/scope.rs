//! Effect Scopes
//!
//! An [`EffectScope`] groups reactive side effects so they can be disposed
//! together. Watchers and computed refs created while a scope is running
//! are owned by the scope's internal instance; stopping the scope destroys
//! that instance (tearing the watchers down), stops child scopes, then runs
//! the cleanups registered with [`on_scope_dispose`] in registration order.
//!
//! ```
//! use trellis_core::{effect_scope, install, on_scope_dispose, Config, Ref};
//!
//! install(Config::default());
//! let scope = effect_scope(false).unwrap();
//! scope.run(|| {
//!     let count = Ref::new(0).unwrap();
//!     on_scope_dispose(move || drop(count));
//! });
//! scope.stop();
//! assert!(!scope.is_active());
//! # trellis_core::uninstall();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::context::{ActiveScope, CurrentInstance};
use crate::config::warn;
use crate::error::Result;
use crate::host::{self, Instance, InstanceOptions, LifecycleHook, WeakInstance};

/// A cleanup run when its scope stops.
pub type Cleanup = Box<dyn FnOnce() + Send>;

static SCOPE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A disposal group for reactive effects.
#[derive(Clone)]
pub struct EffectScope(Arc<ScopeInner>);

struct ScopeInner {
    id: u64,
    active: AtomicBool,
    vm: ScopeVm,
    children: Mutex<Vec<EffectScope>>,
    cleanups: Mutex<Vec<Cleanup>>,
}

enum ScopeVm {
    /// A headless instance created for, and destroyed with, the scope.
    Owned(Instance),
    /// A component instance the scope belongs to.
    Bound(WeakInstance),
}

impl EffectScope {
    /// Create a scope.
    ///
    /// Unless `detached`, the scope becomes a child of the active scope, or
    /// is stopped together with the current component instance.
    pub fn new(detached: bool) -> Result<Self> {
        host::ensure_installed()?;
        let vm = Instance::new(InstanceOptions::default().named("EffectScope"));
        let scope = Self::build(ScopeVm::Owned(vm));
        if !detached {
            scope.record();
        }
        tracing::trace!(target: "trellis", scope = scope.id(), detached, "scope created");
        Ok(scope)
    }

    /// The scope owned by a component instance, created on first use.
    pub(crate) fn of_instance(vm: &Instance) -> Self {
        let (slot, created) = vm.extension_or_insert_with(|| InstanceScope(Self::build(ScopeVm::Bound(vm.downgrade()))));
        let scope = slot.0.clone();
        if created {
            let owned = scope.clone();
            vm.on_hook(LifecycleHook::Destroyed, move || owned.stop());
        }
        scope
    }

    fn build(vm: ScopeVm) -> Self {
        Self(Arc::new(ScopeInner {
            id: SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            active: AtomicBool::new(true),
            vm,
            children: Mutex::new(Vec::new()),
            cleanups: Mutex::new(Vec::new()),
        }))
    }

    fn record(&self) {
        if let Some(parent) = ActiveScope::current().filter(EffectScope::is_active) {
            parent.0.children.lock().push(self.clone());
        } else if let Some(vm) = CurrentInstance::current() {
            let scope = self.clone();
            vm.on_hook(LifecycleHook::Destroyed, move || scope.stop());
        }
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn is_active(&self) -> bool {
        self.0.active.load(Ordering::SeqCst)
    }

    /// The instance owning effects created inside this scope.
    pub(crate) fn vm(&self) -> Option<Instance> {
        match &self.0.vm {
            ScopeVm::Owned(vm) => Some(vm.clone()),
            ScopeVm::Bound(weak) => weak.upgrade(),
        }
    }

    /// Run `f` with this scope active.
    ///
    /// Returns `None` without calling `f` when the scope has been stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            warn("cannot run an inactive effect scope.", None);
            return None;
        }
        let _active = ActiveScope::enter(self.clone());
        Some(f())
    }

    /// Dispose everything created in this scope. Idempotent.
    pub fn stop(&self) {
        if !self.0.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let ScopeVm::Owned(vm) = &self.0.vm {
            vm.destroy();
        }
        let children = std::mem::take(&mut *self.0.children.lock());
        for child in children {
            child.stop();
        }
        let cleanups = std::mem::take(&mut *self.0.cleanups.lock());
        let count = cleanups.len();
        for cleanup in cleanups {
            cleanup();
        }
        tracing::debug!(target: "trellis", scope = self.id(), cleanups = count, "scope stopped");
    }

    fn add_cleanup(&self, cleanup: Cleanup) {
        self.0.cleanups.lock().push(cleanup);
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("id", &self.0.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Extension slot holding an instance's own scope.
struct InstanceScope(EffectScope);

/// Create an effect scope. See [`EffectScope::new`].
pub fn effect_scope(detached: bool) -> Result<EffectScope> {
    EffectScope::new(detached)
}

/// The scope currently running, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    ActiveScope::current()
}

/// Register `cleanup` on the active scope.
///
/// Without an active scope the callback is dropped with a warning.
pub fn on_scope_dispose<F>(cleanup: F)
where
    F: FnOnce() + Send + 'static,
{
    match ActiveScope::current() {
        Some(scope) => scope.add_cleanup(Box::new(cleanup)),
        None => warn(
            "on_scope_dispose() is called when there is no active effect scope to be associated with.",
            None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{install, uninstall};
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
    fn cleanups_run_once_in_order() {
        install(Config::default());
        let log = Arc::new(StdMutex::new(Vec::new()));
        let scope = EffectScope::new(false).unwrap();
        scope.run(|| {
            for i in 0..3 {
                let log = log.clone();
                on_scope_dispose(move || log.lock().unwrap().push(i));
            }
        });

        scope.stop();
        scope.stop();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        uninstall();
    }

    #[test]
    fn nested_scopes_stop_with_parent() {
        install(Config::default());
        let parent = EffectScope::new(false).unwrap();
        let (child, detached) = parent
            .run(|| (EffectScope::new(false).unwrap(), EffectScope::new(true).unwrap()))
            .unwrap();

        parent.stop();
        assert!(!child.is_active());
        assert!(detached.is_active());
        uninstall();
    }

    #[test]
    fn run_tracks_current_scope() {
        install(Config::default());
        let outer = EffectScope::new(false).unwrap();
        let inner = EffectScope::new(true).unwrap();
        assert!(get_current_scope().is_none());
        outer.run(|| {
            assert_eq!(get_current_scope().unwrap().id(), outer.id());
            inner.run(|| assert_eq!(get_current_scope().unwrap().id(), inner.id()));
            assert_eq!(get_current_scope().unwrap().id(), outer.id());
        });
        assert!(get_current_scope().is_none());
        uninstall();
    }

    #[test]
    fn inactive_scope_refuses_to_run() {
        let warnings = capture_warnings();
        let scope = EffectScope::new(false).unwrap();
        scope.stop();
        assert_eq!(scope.run(|| 1), None);
        assert_eq!(
            *warnings.lock().unwrap(),
            vec!["cannot run an inactive effect scope.".to_string()]
        );
        uninstall();
    }

    #[test]
    fn dispose_without_scope_warns() {
        let warnings = capture_warnings();
        on_scope_dispose(|| {});
        assert_eq!(warnings.lock().unwrap().len(), 1);
        uninstall();
    }

    #[test]
    fn scope_requires_host() {
        uninstall();
        assert!(EffectScope::new(false).is_err());
    }
}
