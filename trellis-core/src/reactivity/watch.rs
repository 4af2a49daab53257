//! Watch and Effects
//!
//! `watch`, `watch_sources` and `watch_effect` are built on host watchers.
//! What they add is *when* callbacks run.
//!
//! # Flush modes
//!
//! - `sync`: the callback runs inside the write that caused it.
//! - `pre`: the callback is queued on the owning instance and runs right
//!   before its next re-render.
//! - `post`: likewise, right after the next re-render.
//!
//! Each owning instance carries a pre and a post queue, drained by its
//! `beforeUpdate` and `updated` hooks. Every queued job also schedules a
//! fallback drain on the next tick, for instances that never re-render.
//! The fallback is approximate: an instance that does render will usually
//! have drained its queues by then.
//!
//! Outside any component the watcher belongs to a shared fallback
//! instance, which never renders. There the pre/post queues are skipped;
//! the host's own watcher batching still defers non-sync callbacks to the
//! next tick.
//!
//! # Multiple sources
//!
//! Every source of a multi-source watch gets its own sync host watcher.
//! The aggregate callback fires once all sources have reported during
//! startup. After that, sync flush fires once per source change; other
//! modes coalesce changes made in the same tick into one callback.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use smallvec::SmallVec;

use super::context::current_scope_vm;
use super::reactive::is_reactive;
use super::refs::Ref;
use super::scope::Cleanup;
use crate::config::warn;
use crate::error::{Error, Result};
use crate::host::{
    self, next_tick, Getter, HostWatchOptions, Instance, Job, LifecycleHook, WatchCallback, Watcher,
    WatcherOptions,
};
use crate::value::Value;

/// When a watch callback runs relative to the owning instance's render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    Sync,
    Pre,
    #[default]
    Post,
}

impl FromStr for FlushMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sync" => Ok(Self::Sync),
            "pre" => Ok(Self::Pre),
            "post" => Ok(Self::Post),
            other => Err(Error::InvalidFlush(other.to_string())),
        }
    }
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync => "sync",
            Self::Pre => "pre",
            Self::Post => "post",
        })
    }
}

/// Options for [`watch`] and [`watch_sources`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Skip the initial callback; only report changes.
    pub lazy: bool,
    /// Track nested reads of the watched value.
    pub deep: bool,
    pub flush: FlushMode,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            lazy: true,
            deep: false,
            flush: FlushMode::Post,
        }
    }
}

impl WatchOptions {
    /// Also call back once right away with the current value.
    pub fn immediate(mut self) -> Self {
        self.lazy = false;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn flush(mut self, flush: FlushMode) -> Self {
        self.flush = flush;
        self
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Options for [`watch_effect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchEffectOptions {
    pub flush: FlushMode,
    pub deep: bool,
}

impl Default for WatchEffectOptions {
    fn default() -> Self {
        Self {
            flush: FlushMode::Pre,
            deep: false,
        }
    }
}

impl WatchEffectOptions {
    pub fn flush(mut self, flush: FlushMode) -> Self {
        self.flush = flush;
        self
    }
}

/// Something a watch can observe.
#[derive(Clone)]
pub enum WatchSource {
    Ref(Ref),
    /// A reactive object or array, watched deeply.
    Reactive(Value),
    Getter(Getter),
    /// Rejected source; watches nothing.
    Invalid,
}

impl WatchSource {
    pub fn getter<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self::Getter(Arc::new(f))
    }

    /// Classify a value, warning for values that cannot be watched.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Ref(r) => Self::Ref(r),
            Value::Function(f) => Self::Getter(Arc::new(move || f.call(&[]))),
            v if is_reactive(&v) => Self::Reactive(v),
            v => {
                warn(
                    &format!(
                        "Invalid watch source: {v:?}. A watch source can only be a getter/effect function, a ref, a reactive object, or an array of these types."
                    ),
                    None,
                );
                Self::Invalid
            }
        }
    }

    /// The getter to watch and whether it must be watched deeply.
    fn into_getter(self, deep: bool) -> (Getter, bool) {
        match self {
            Self::Ref(r) => (Arc::new(move || r.get()), deep),
            Self::Reactive(v) => (Arc::new(move || v.clone()), true),
            Self::Getter(g) => (g, deep),
            Self::Invalid => (Arc::new(|| Value::Undefined), deep),
        }
    }
}

impl From<Ref> for WatchSource {
    fn from(r: Ref) -> Self {
        Self::Ref(r)
    }
}

impl From<&Ref> for WatchSource {
    fn from(r: &Ref) -> Self {
        Self::Ref(r.clone())
    }
}

impl From<Value> for WatchSource {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl From<crate::value::Object> for WatchSource {
    fn from(obj: crate::value::Object) -> Self {
        Self::from_value(Value::Object(obj))
    }
}

impl From<crate::value::Array> for WatchSource {
    fn from(arr: crate::value::Array) -> Self {
        Self::from_value(Value::Array(arr))
    }
}

/// Registrar for cleanup work, passed to watch callbacks and effects.
///
/// A registered cleanup runs before the next callback or effect run, and
/// when the watch stops.
#[derive(Clone, Default)]
pub struct OnCleanup(Arc<Mutex<Option<Cleanup>>>);

impl OnCleanup {
    pub fn register<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.0.lock() = Some(Box::new(cleanup));
    }

    fn run(&self) {
        let cleanup = self.0.lock().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// Handle stopping a watch or effect.
#[derive(Clone)]
pub struct WatchStop {
    stop: Arc<dyn Fn() + Send + Sync>,
    stopped: Arc<AtomicBool>,
}

impl WatchStop {
    fn new(stopped: Arc<AtomicBool>, stop: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            stop: Arc::new(stop),
            stopped,
        }
    }

    /// Stop watching. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            (self.stop)();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for WatchStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStop")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Pre/post callback queues of one instance.
#[derive(Default)]
struct FlushQueues {
    pre: Mutex<Vec<Job>>,
    post: Mutex<Vec<Job>>,
}

impl FlushQueues {
    fn drain(queue: &Mutex<Vec<Job>>) {
        let jobs = std::mem::take(&mut *queue.lock());
        for job in jobs {
            job();
        }
    }
}

/// The instance owning a new watcher, and whether it is the fallback.
fn watcher_vm() -> Result<(Instance, bool)> {
    host::ensure_installed()?;
    match current_scope_vm() {
        Some(vm) => {
            install_flush_queues(&vm);
            Ok((vm, false))
        }
        None => Ok((host::fallback_instance()?, true)),
    }
}

fn install_flush_queues(vm: &Instance) -> Arc<FlushQueues> {
    let (queues, created) = vm.extension_or_insert_with(FlushQueues::default);
    if created {
        let pre = Arc::downgrade(&queues);
        vm.on_hook(LifecycleHook::BeforeUpdate, move || {
            if let Some(queues) = pre.upgrade() {
                FlushQueues::drain(&queues.pre);
            }
        });
        let post = Arc::downgrade(&queues);
        vm.on_hook(LifecycleHook::Updated, move || {
            if let Some(queues) = post.upgrade() {
                FlushQueues::drain(&queues.post);
            }
        });
    }
    queues
}

/// Queue `job` on `vm` for its next render, with a next-tick fallback.
fn queue_flush_job(vm: &Instance, job: Job, mode: FlushMode) {
    let queues = install_flush_queues(vm);
    match mode {
        FlushMode::Pre => queues.pre.lock().push(job),
        FlushMode::Post => queues.post.lock().push(job),
        FlushMode::Sync => {
            job();
            return;
        }
    }
    let fallback = Arc::downgrade(&queues);
    let _ = next_tick(move || {
        if let Some(queues) = fallback.upgrade() {
            FlushQueues::drain(&queues.pre);
            FlushQueues::drain(&queues.post);
        }
    });
}

/// Wrap `f` so it runs according to `flush` on `vm`.
fn create_scheduler(vm: &Instance, fallback: bool, flush: FlushMode, f: WatchCallback) -> WatchCallback {
    if flush == FlushMode::Sync || fallback {
        return f;
    }
    let weak = vm.downgrade();
    Arc::new(move |new, old| {
        if let Some(vm) = weak.upgrade() {
            let f = f.clone();
            queue_flush_job(&vm, Box::new(move || f(new, old)), flush);
        }
    })
}

/// Watch a single source.
///
/// The callback receives `(new, old, on_cleanup)`. A reactive object
/// source is always watched deeply.
pub fn watch<S, F>(source: S, callback: F, options: WatchOptions) -> Result<WatchStop>
where
    S: Into<WatchSource>,
    F: Fn(Value, Value, &OnCleanup) + Send + Sync + 'static,
{
    let (vm, fallback) = watcher_vm()?;
    let (getter, deep) = source.into().into_getter(options.deep);
    let stopped = Arc::new(AtomicBool::new(false));
    let cleanup = OnCleanup::default();
    let callback = Arc::new(callback);

    let apply: WatchCallback = {
        let (stopped, cleanup) = (stopped.clone(), cleanup.clone());
        Arc::new(move |new, old| {
            if stopped.load(Ordering::SeqCst) {
                return;
            }
            cleanup.run();
            callback(new, old, &cleanup);
        })
    };
    let scheduled = create_scheduler(&vm, fallback, options.flush, apply.clone());
    let host_callback: WatchCallback = if options.lazy {
        scheduled
    } else {
        // The initial call comes straight from the host; later ones follow
        // the flush mode.
        let first = AtomicBool::new(true);
        Arc::new(move |new, old| {
            if first.swap(false, Ordering::SeqCst) {
                apply(new, old);
            } else {
                scheduled(new, old);
            }
        })
    };

    let watcher = vm.watch(
        getter,
        host_callback,
        HostWatchOptions {
            immediate: !options.lazy,
            deep,
            sync: options.flush == FlushMode::Sync,
        },
    );
    {
        // Teardown also comes from scope or instance disposal; queued
        // callbacks check the flag.
        let stopped = stopped.clone();
        watcher.on_teardown(move || {
            stopped.store(true, Ordering::SeqCst);
            cleanup.run();
        });
    }
    tracing::trace!(target: "trellis", watcher = ?watcher.id(), flush = %options.flush, "watch created");

    Ok(WatchStop::new(stopped, move || watcher.teardown()))
}

/// Per-watch bookkeeping of a multi-source watch.
struct MultiState {
    new: Vec<Value>,
    old: Vec<Value>,
    reported: Vec<bool>,
    started: bool,
    pending: bool,
}

/// Watch several sources with one callback.
///
/// The callback receives the current and previous values of every source,
/// in source order.
pub fn watch_sources<I, F>(sources: I, callback: F, options: WatchOptions) -> Result<WatchStop>
where
    I: IntoIterator,
    I::Item: Into<WatchSource>,
    F: Fn(&[Value], &[Value], &OnCleanup) + Send + Sync + 'static,
{
    let (vm, fallback) = watcher_vm()?;
    let getters: SmallVec<[(Getter, bool); 4]> = sources
        .into_iter()
        .map(|source| source.into().into_getter(options.deep))
        .collect();
    let count = getters.len();
    let any_deep = getters.iter().any(|(_, deep)| *deep);
    let is_sync = options.flush == FlushMode::Sync;

    let state = Arc::new(Mutex::new(MultiState {
        new: vec![Value::Undefined; count],
        old: vec![Value::Undefined; count],
        reported: vec![false; count],
        started: options.lazy,
        pending: false,
    }));
    let stopped = Arc::new(AtomicBool::new(false));
    let cleanup = OnCleanup::default();
    let callback = Arc::new(callback);

    // `force` skips the change check, for the startup call.
    let fire: Arc<dyn Fn(bool) + Send + Sync> = {
        let (state, stopped, cleanup) = (state.clone(), stopped.clone(), cleanup.clone());
        Arc::new(move |force| {
            if stopped.load(Ordering::SeqCst) {
                return;
            }
            let (new, old) = {
                let mut st = state.lock();
                let new = st.new.clone();
                let old = std::mem::replace(&mut st.old, new.clone());
                (new, old)
            };
            let unchanged = !any_deep
                && new
                    .iter()
                    .zip(&old)
                    .all(|(n, o)| n.same(o) && !n.is_object());
            if unchanged && !force {
                return;
            }
            cleanup.run();
            callback(&new, &old, &cleanup);
        })
    };

    // Coalesce changes until the queued dispatch runs.
    let request: Arc<dyn Fn() + Send + Sync> = {
        let state = state.clone();
        let weak = vm.downgrade();
        let flush = options.flush;
        let fire = fire.clone();
        Arc::new(move || {
            {
                let mut st = state.lock();
                if st.pending {
                    return;
                }
                st.pending = true;
            }
            let (state, fire) = (state.clone(), fire.clone());
            let job: Job = Box::new(move || {
                state.lock().pending = false;
                fire(false);
            });
            if fallback {
                let _ = next_tick(job);
            } else if let Some(vm) = weak.upgrade() {
                queue_flush_job(&vm, job, flush);
            }
        })
    };

    let mut watchers: Vec<Watcher> = Vec::with_capacity(count);
    for (index, (getter, deep)) in getters.into_iter().enumerate() {
        let (state, fire, request) = (state.clone(), fire.clone(), request.clone());
        let on_change: WatchCallback = Arc::new(move |value, _old| {
            let startup = {
                let mut st = state.lock();
                st.new[index] = value;
                if st.started {
                    None
                } else {
                    st.reported[index] = true;
                    let all = st.reported.iter().all(|r| *r);
                    st.started = all;
                    Some(all)
                }
            };
            match startup {
                Some(true) => fire(true),
                Some(false) => {}
                None if is_sync => fire(false),
                None => request(),
            }
        });
        let watcher = vm.watch(
            getter,
            on_change,
            HostWatchOptions {
                immediate: !options.lazy,
                deep,
                sync: true,
            },
        );
        let (stopped, cleanup) = (stopped.clone(), cleanup.clone());
        watcher.on_teardown(move || {
            stopped.store(true, Ordering::SeqCst);
            cleanup.run();
        });
        watchers.push(watcher);
    }

    if options.lazy {
        let mut st = state.lock();
        for (index, watcher) in watchers.iter().enumerate() {
            st.new[index] = watcher.value();
            st.old[index] = watcher.value();
        }
    }

    Ok(WatchStop::new(stopped, move || {
        for watcher in &watchers {
            watcher.teardown();
        }
    }))
}

/// Run `effect` now and again whenever anything it read changes.
///
/// The effect receives an [`OnCleanup`] whose registered cleanup runs
/// before the next run and on stop.
pub fn watch_effect<F>(effect: F, options: WatchEffectOptions) -> Result<WatchStop>
where
    F: Fn(&OnCleanup) + Send + Sync + 'static,
{
    let (vm, fallback) = watcher_vm()?;
    let stopped = Arc::new(AtomicBool::new(false));
    let cleanup = OnCleanup::default();
    let is_sync = options.flush == FlushMode::Sync;

    let getter: Getter = {
        let (stopped, cleanup) = (stopped.clone(), cleanup.clone());
        Arc::new(move || {
            if !stopped.load(Ordering::SeqCst) {
                cleanup.run();
                effect(&cleanup);
            }
            Value::Undefined
        })
    };

    let defer_get: Option<host::Deferral> = if is_sync || fallback {
        None
    } else {
        let weak = vm.downgrade();
        let flush = options.flush;
        Some(Arc::new(move |job: Job| {
            if let Some(vm) = weak.upgrade() {
                queue_flush_job(&vm, job, flush);
            }
        }))
    };

    let watcher = Watcher::new(
        Some(&vm),
        getter,
        Arc::new(|_, _| {}),
        WatcherOptions {
            deep: options.deep,
            sync: is_sync,
            user: true,
            defer_get,
            ..Default::default()
        },
    );
    watcher.on_teardown(move || cleanup.run());

    Ok(WatchStop::new(stopped, move || watcher.teardown()))
}
