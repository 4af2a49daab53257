//! Composition Reactivity
//!
//! Refs, reactive objects, computed refs, watches and effect scopes,
//! implemented on top of the [`host`](crate::host) runtime's observation
//! machinery.
//!
//! # Concepts
//!
//! ## Refs
//!
//! A [`Ref`] is a mutable cell. Internally it is a one-key observed object,
//! so reads and writes go through the same per-key deps as any observed
//! property.
//!
//! ## Reactive objects
//!
//! [`reactive`] observes an object in place and instruments its keys so
//! that refs stored in it unwrap on read and receive plain writes.
//!
//! ## Computed refs
//!
//! [`computed`] wraps a computed property of a headless instance. It is
//! lazy and cached until one of its dependencies changes.
//!
//! ## Watches
//!
//! [`watch`], [`watch_sources`] and [`watch_effect`] re-run user code on
//! change, with `sync`, `pre` or `post` timing.
//!
//! ## Effect scopes
//!
//! An [`EffectScope`] collects the watches and computed refs created while
//! it runs, and stops all of them at once.

mod access;
mod computed;
mod context;
mod reactive;
mod refs;
mod scope;
mod watch;

pub use computed::{computed, writable_computed};
pub use reactive::{
    del, is_reactive, is_raw, is_readonly, mark_raw, reactive, readonly, set, shallow_reactive,
    shallow_readonly, to_raw,
};
pub use refs::{
    custom_ref, is_ref, proxy_refs, shallow_ref, to_ref, to_refs, trigger_ref, unref, Ref,
    RefGetter, RefSetter, RefTracking,
};
pub use scope::{effect_scope, get_current_scope, on_scope_dispose, Cleanup, EffectScope};
pub use watch::{
    watch, watch_effect, watch_sources, FlushMode, OnCleanup, WatchEffectOptions, WatchOptions,
    WatchSource, WatchStop,
};

pub(crate) use context::CurrentInstance;
