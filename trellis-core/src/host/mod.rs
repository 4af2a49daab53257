//! Host Runtime
//!
//! The options-style component runtime the reactivity layer is built on:
//! dependency lists, watchers, observation of plain data, a batching
//! scheduler and component instances.
//!
//! # Installation
//!
//! The runtime is per thread. Nothing in the reactivity layer works until
//! [`install`] has been called on the current thread; constructors return
//! [`Error::NotInstalled`] instead. Installing twice keeps the first
//! installation and warns.
//!
//! ```
//! use trellis_core::{install, uninstall, Config};
//!
//! install(Config::default());
//! assert!(trellis_core::is_installed());
//! uninstall();
//! ```

mod dep;
mod instance;
mod observer;
mod scheduler;
mod watcher;

pub use dep::{Dep, DepTarget, Subscriber, SubscriberId};
pub use instance::{
    ComputedDef, ComputedSetter, HostWatchOptions, Instance, InstanceOptions, LifecycleHook, Listener,
    RenderFn, WeakInstance,
};
pub use observer::{define_reactive, observe, observer_of, Observer};
pub use scheduler::{flush, next_tick, tick, MAX_UPDATE_COUNT};
pub use watcher::{traverse, Callback, Deferral, Getter, Job, WatchCallback, Watcher, WatcherOptions};

pub(crate) use observer::mark_inert;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::config::{warn, Config};
use crate::error::{Error, Result};
use scheduler::SchedulerState;

/// Per-thread runtime state.
pub(crate) struct HostState {
    config: Config,
    ticks: RefCell<VecDeque<Job>>,
    draining: Cell<bool>,
    scheduler: RefCell<SchedulerState>,
    fallback: RefCell<Option<Instance>>,
}

thread_local! {
    static HOST: RefCell<Option<Rc<HostState>>> = const { RefCell::new(None) };
}

/// Install the runtime on the current thread.
pub fn install(config: Config) {
    let installed = HOST.with(|host| {
        let mut host = host.borrow_mut();
        if host.is_some() {
            return false;
        }
        *host = Some(Rc::new(HostState {
            config,
            ticks: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            scheduler: RefCell::new(SchedulerState::default()),
            fallback: RefCell::new(None),
        }));
        true
    });

    if installed {
        tracing::debug!(target: "trellis", "host runtime installed");
    } else {
        warn("Another host runtime is already installed; keeping the first one.", None);
    }
}

/// Remove the runtime from the current thread.
///
/// Pending ticks are dropped and the shared fallback instance is destroyed.
pub fn uninstall() {
    let state = HOST.with(|host| host.borrow_mut().take());
    if let Some(state) = state {
        let fallback = state.fallback.borrow_mut().take();
        if let Some(vm) = fallback {
            vm.destroy();
        }
        state.ticks.borrow_mut().clear();
        tracing::debug!(target: "trellis", "host runtime uninstalled");
    }
}

pub fn is_installed() -> bool {
    HOST.with(|host| host.borrow().is_some())
}

/// The installed configuration.
pub fn config() -> Option<Config> {
    HOST.with(|host| host.borrow().as_ref().map(|s| s.config.clone()))
}

pub(crate) fn runtime() -> Result<Rc<HostState>> {
    HOST.with(|host| host.borrow().clone()).ok_or(Error::NotInstalled)
}

/// Fail with [`Error::NotInstalled`] unless the runtime is installed.
pub(crate) fn ensure_installed() -> Result<()> {
    runtime().map(|_| ())
}

pub(crate) fn async_updates() -> bool {
    HOST.with(|host| host.borrow().as_ref().map_or(true, |s| s.config.async_updates))
}

/// The shared instance owning watchers created outside any component.
///
/// Created on first use and kept until [`uninstall`].
pub(crate) fn fallback_instance() -> Result<Instance> {
    let host = runtime()?;
    if let Some(vm) = host.fallback.borrow().as_ref() {
        return Ok(vm.clone());
    }
    let vm = Instance::new(InstanceOptions::default().named("FallbackInstance"));
    *host.fallback.borrow_mut() = Some(vm.clone());
    Ok(vm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn install_is_per_thread_and_reversible() {
        install(Config::default());
        assert!(is_installed());
        std::thread::spawn(|| assert!(!is_installed())).join().unwrap();
        uninstall();
        assert!(!is_installed());
        assert_eq!(ensure_installed(), Err(Error::NotInstalled));
    }

    #[test]
    fn second_install_warns_and_keeps_first() {
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        install(Config::default().dev(true).warn_handler(move |msg, _| {
            sink.lock().unwrap().push(msg.to_string())
        }));
        install(Config::default().async_updates(false));

        assert!(config().unwrap().async_updates);
        assert_eq!(warnings.lock().unwrap().len(), 1);
        uninstall();
    }

    #[test]
    fn fallback_instance_is_shared() {
        install(Config::default());
        let a = fallback_instance().unwrap();
        let b = fallback_instance().unwrap();
        assert!(a.ptr_eq(&b));
        uninstall();
        assert!(a.is_destroyed());
    }
}
