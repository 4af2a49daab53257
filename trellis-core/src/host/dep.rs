//! Dependency Lists
//!
//! A [`Dep`] is the host's unit of change notification: every observed
//! property owns one, and so does every observed object or array (for
//! structural changes). Watchers subscribe to the deps they read while
//! evaluating; a write notifies the dep, which calls `update()` on every
//! subscriber.
//!
//! # The dependency target
//!
//! Which watcher a read should be attributed to is tracked on a
//! thread-local stack. Evaluating a watcher pushes it; running code that
//! must not collect dependencies (lifecycle hooks, immediate callbacks)
//! pushes an empty entry. The stack supports arbitrary nesting, e.g. a
//! computed property evaluated from inside a render.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::watcher::Watcher;

/// Unique identifier for a subscriber.
///
/// Identifiers increase monotonically, so they double as creation order:
/// the scheduler relies on this to run parents before children and user
/// watchers before the render watcher of the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything a [`Dep`] can notify.
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Called when a dependency changed.
    fn update(&self);
}

static DEP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A list of subscribers interested in one piece of state.
#[derive(Clone)]
pub struct Dep(Arc<DepInner>);

struct DepInner {
    id: u64,
    subs: Mutex<Vec<Arc<dyn Subscriber>>>,
}

impl Dep {
    pub fn new() -> Self {
        Self(Arc::new(DepInner {
            id: DEP_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            subs: Mutex::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn add_sub(&self, sub: Arc<dyn Subscriber>) {
        self.0.subs.lock().push(sub);
    }

    pub fn remove_sub(&self, id: SubscriberId) {
        self.0.subs.lock().retain(|s| s.id() != id);
    }

    /// Register this dep with the watcher currently being evaluated.
    pub fn depend(&self) {
        if let Some(target) = DepTarget::current() {
            target.add_dep(self);
        }
    }

    /// Notify every subscriber.
    ///
    /// Subscribers are snapshotted first, so a subscriber may unsubscribe
    /// or subscribe others while being notified.
    pub fn notify(&self) {
        let mut subs = self.0.subs.lock().clone();
        if !super::async_updates() {
            // Without the scheduler's sorting, keep creation order by hand.
            subs.sort_by_key(|s| s.id());
        }
        for sub in subs {
            sub.update();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subs.lock().len()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Guard for one entry on the dependency target stack.
///
/// The entry is popped when the guard is dropped, including during a
/// panic unwinding out of the evaluated code.
pub struct DepTarget {
    depth: usize,
}

impl DepTarget {
    /// Make `target` the receiver of dependency registrations.
    ///
    /// `None` suspends tracking until the guard drops.
    pub fn push(target: Option<Watcher>) -> Self {
        let depth = TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(target);
            stack.len()
        });
        Self { depth }
    }

    /// The watcher currently collecting dependencies.
    pub fn current() -> Option<Watcher> {
        TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    pub fn is_active() -> bool {
        TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// Run `f` without collecting dependencies.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _guard = Self::push(None);
        f()
    }
}

impl Drop for DepTarget {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "DepTarget mismatch: guards dropped out of order"
            );
            stack.pop();
        });
    }
}
