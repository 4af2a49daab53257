//! Computed Refs
//!
//! A computed ref does no caching of its own. Each one registers a single
//! computed property on a fresh headless instance and reads and writes
//! through it, so evaluation stays lazy and cached until a dependency
//! changes, exactly as the host does it for options-style components.
//!
//! The headless instance is destroyed with the instance (or scope) that
//! was current when the computed ref was created.

use std::sync::Arc;

use super::context::current_scope_vm;
use super::refs::{Ref, RefParts, RefSetter};
use crate::config::warn;
use crate::error::Result;
use crate::host::{self, ComputedDef, Instance, InstanceOptions, LifecycleHook};
use crate::value::Value;

const STATE_KEY: &str = "$$state";

/// A read-only computed ref.
///
/// Writes warn and are ignored.
pub fn computed<G>(get: G) -> Result<Ref>
where
    G: Fn() -> Value + Send + Sync + 'static,
{
    create_computed(Arc::new(get), None)
}

/// A computed ref with a setter.
pub fn writable_computed<G, S>(get: G, set: S) -> Result<Ref>
where
    G: Fn() -> Value + Send + Sync + 'static,
    S: Fn(Value) + Send + Sync + 'static,
{
    create_computed(Arc::new(get), Some(Arc::new(set)))
}

fn create_computed(get: host::Getter, set: Option<RefSetter>) -> Result<Ref> {
    host::ensure_installed()?;
    let owner = current_scope_vm();
    let writable = set.is_some();

    let vm = Instance::new(InstanceOptions::default().named("ComputedHost").computed(
        STATE_KEY,
        ComputedDef { get, set },
    ));
    if let Some(owner) = &owner {
        let hosted = vm.clone();
        owner.on_hook(LifecycleHook::Destroyed, move || hosted.destroy());
    }

    let reader = vm.clone();
    let setter: RefSetter = if writable {
        let writer = vm;
        Arc::new(move |value| {
            writer.set(STATE_KEY, value);
        })
    } else {
        let owner = owner.map(|vm| vm.downgrade());
        Arc::new(move |_| {
            let vm = owner.as_ref().and_then(|w| w.upgrade());
            warn("Write operation failed: computed value is readonly.", vm.as_ref());
        })
    };

    Ok(Ref::build(RefParts {
        get: Some(Arc::new(move || reader.get(STATE_KEY))),
        set: Some(setter),
        readonly: !writable,
        computed: true,
        trigger: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{install, uninstall};
    use crate::Config;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn reads_are_memoized() {
        install(Config::default());
        let n = Arc::new(AtomicI32::new(0));
        let counter = n.clone();
        let c = computed(move || Value::from(counter.fetch_add(1, Ordering::SeqCst) + 1)).unwrap();

        assert_eq!(c.get(), Value::from(1));
        assert_eq!(c.get(), Value::from(1));
        assert_eq!(n.load(Ordering::SeqCst), 1);
        assert!(c.is_computed());
        assert!(c.is_readonly());
        uninstall();
    }

    #[test]
    fn recomputes_after_dependency_change() {
        install(Config::default());
        let base = Ref::new(2).unwrap();
        let source = base.clone();
        let doubled = computed(move || Value::from(source.get().as_number().unwrap_or_default() * 2.0)).unwrap();

        assert_eq!(doubled.get(), Value::from(4));
        base.set(5);
        assert_eq!(doubled.get(), Value::from(10));
        uninstall();
    }

    #[test]
    fn write_without_setter_warns_once() {
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        install(Config::default().dev(true).silent(true).warn_handler(move |msg, _| {
            sink.lock().unwrap().push(msg.to_string())
        }));

        let c = computed(|| Value::from(1)).unwrap();
        c.set(2);
        assert_eq!(c.get(), Value::from(1));
        assert_eq!(
            *warnings.lock().unwrap(),
            vec!["Write operation failed: computed value is readonly.".to_string()]
        );
        uninstall();
    }

    #[test]
    fn writable_computed_routes_writes() {
        install(Config::default());
        let base = Ref::new(1).unwrap();
        let (reader, writer) = (base.clone(), base.clone());
        let plus_one = writable_computed(
            move || Value::from(reader.get().as_number().unwrap_or_default() + 1.0),
            move |v| writer.set(v.as_number().unwrap_or_default() - 1.0),
        )
        .unwrap();

        plus_one.set(10);
        assert_eq!(base.get(), Value::from(9));
        assert_eq!(plus_one.get(), Value::from(10));
        assert!(!plus_one.is_readonly());
        uninstall();
    }
}
