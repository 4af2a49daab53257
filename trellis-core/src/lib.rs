//! Trellis Core
//!
//! Composition-style reactivity (refs, reactive objects, computed refs,
//! watches and effect scopes) layered on an options-style component
//! runtime. The runtime does the actual dependency tracking and batching;
//! this crate adds the composition API on top of it.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: the dynamic value model (objects, arrays, functions)
//! - `host`: the component runtime (deps, watchers, scheduler, instances)
//! - `reactivity`: refs, reactive objects, computed, watch, effect scopes
//! - `component`: running `setup` functions on host instances
//!
//! # Example
//!
//! ```rust
//! use trellis_core::{computed, install, watch, Config, FlushMode, Ref, Value, WatchOptions};
//!
//! install(Config::default());
//!
//! // Create a ref
//! let count = Ref::new(1).unwrap();
//!
//! // Create a derived value
//! let source = count.clone();
//! let doubled = computed(move || Value::from(source.get().as_number().unwrap_or_default() * 2.0)).unwrap();
//!
//! // Watch it
//! watch(&doubled, |new, old, _| println!("{old:?} -> {new:?}"), WatchOptions::default().flush(FlushMode::Sync)).unwrap();
//!
//! // Update the ref; the watch callback runs right away
//! count.set(5);
//! assert_eq!(doubled.get(), Value::from(10));
//! # trellis_core::uninstall();
//! ```

pub mod component;
pub mod config;
pub mod error;
pub mod host;
pub mod reactivity;
pub mod value;

pub use component::{
    get_current_instance, mount_component, mount_component_with_slots, on_activated, on_before_mount,
    on_before_unmount, on_before_update, on_deactivated, on_mounted, on_unmounted, on_updated,
    ComponentOptions, SetupContext, SetupFn, SetupResult,
};
pub use config::Config;
pub use error::{Error, Result};
pub use host::{flush, install, is_installed, next_tick, tick, uninstall};
pub use reactivity::*;
pub use value::{Array, Function, Key, Native, Object, Value};
