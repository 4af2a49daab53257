//! Activation Context
//!
//! Free functions like `watch`, `computed` and `on_scope_dispose` discover
//! their owner implicitly: the effect scope currently running, or the
//! component instance whose setup is executing. Both are tracked on
//! thread-local stacks.
//!
//! # Implementation
//!
//! Entering a scope or an instance pushes it and returns a guard; dropping
//! the guard pops it. Guards nest, so a scope run from inside another
//! scope's `run` (or a setup function creating scopes) restores the outer
//! context on exit, panics included.

use std::cell::RefCell;

use super::scope::EffectScope;
use crate::host::Instance;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
    static INSTANCE_STACK: RefCell<Vec<Instance>> = const { RefCell::new(Vec::new()) };
}

/// Guard keeping an effect scope active.
pub(crate) struct ActiveScope {
    id: u64,
}

impl ActiveScope {
    pub(crate) fn enter(scope: EffectScope) -> Self {
        let id = scope.id();
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(scope));
        Self { id }
    }

    pub(crate) fn current() -> Option<EffectScope> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(scope) = popped {
                debug_assert_eq!(
                    scope.id(),
                    self.id,
                    "ActiveScope mismatch: expected {}, got {}",
                    self.id,
                    scope.id()
                );
            }
        });
    }
}

/// Guard keeping a component instance current.
pub(crate) struct CurrentInstance {
    id: u64,
}

impl CurrentInstance {
    pub(crate) fn enter(vm: Instance) -> Self {
        let id = vm.id();
        INSTANCE_STACK.with(|stack| stack.borrow_mut().push(vm));
        Self { id }
    }

    pub(crate) fn current() -> Option<Instance> {
        INSTANCE_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Drop for CurrentInstance {
    fn drop(&mut self) {
        INSTANCE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(vm) = popped {
                debug_assert_eq!(vm.id(), self.id, "CurrentInstance mismatch");
            }
        });
    }
}

/// The instance that should own effects created right now: the active
/// scope's instance, else the current component instance.
pub(crate) fn current_scope_vm() -> Option<Instance> {
    ActiveScope::current()
        .and_then(|scope| scope.vm())
        .or_else(CurrentInstance::current)
}
