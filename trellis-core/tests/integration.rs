//! Integration Tests for the Reactivity Layer
//!
//! These tests exercise refs, reactive objects, computed refs, watches and
//! scopes together, through the public API only.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use trellis_core::{
    computed, effect_scope, flush, install, is_reactive, mark_raw, mount_component, next_tick,
    on_scope_dispose, reactive, tick, to_refs, uninstall, watch, watch_effect, watch_sources,
    ComponentOptions, Config, Error, FlushMode, Object, Ref, SetupResult, Value, WatchEffectOptions,
    WatchOptions,
};

fn capture_warnings() -> Arc<Mutex<Vec<String>>> {
    let warnings = Arc::new(Mutex::new(Vec::new()));
    let sink = warnings.clone();
    install(Config::default().dev(true).silent(true).warn_handler(move |msg, _| {
        sink.lock().unwrap().push(msg.to_string())
    }));
    warnings
}

fn number(value: &Value) -> f64 {
    value.as_number().unwrap_or_default()
}

/// Making an object reactive twice returns the same object.
#[test]
fn reactive_is_idempotent() {
    install(Config::default());
    let obj = Object::from_entries([("a", 1)]);
    let first = reactive(obj.clone()).unwrap();
    let second = reactive(first.clone()).unwrap();
    assert!(first.ptr_eq(&second));
    assert!(first.ptr_eq(&obj));
    uninstall();
}

/// A raw-marked object is left alone by `reactive`.
#[test]
fn raw_objects_stay_raw() {
    install(Config::default());
    let obj = mark_raw(Object::from_entries([("a", 1)]));
    let result = reactive(obj.clone()).unwrap();
    assert!(result.ptr_eq(&obj));
    assert!(!is_reactive(&Value::from(&result)));
    uninstall();
}

#[test]
fn ref_write_through() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    a.set(2);
    assert_eq!(a.get(), Value::from(2));
    uninstall();
}

/// Reading a computed ref twice without a dependency change evaluates once.
#[test]
fn computed_caches_value() {
    install(Config::default());
    let n = Arc::new(AtomicI32::new(0));
    let counter = n.clone();
    let c = computed(move || Value::from(counter.fetch_add(1, Ordering::SeqCst) + 1)).unwrap();

    assert_eq!(c.get(), Value::from(1));
    assert_eq!(c.get(), Value::from(1));
    assert_eq!(n.load(Ordering::SeqCst), 1);
    uninstall();
}

#[test]
fn computed_without_setter_warns_once() {
    let warnings = capture_warnings();
    let c = computed(|| Value::from(1)).unwrap();
    c.set(2);

    assert_eq!(c.get(), Value::from(1));
    assert_eq!(warnings.lock().unwrap().len(), 1);
    uninstall();
}

/// A deep watch on a reactive object sees nested writes.
#[test]
fn deep_watch_sees_nested_writes() {
    install(Config::default());
    let inner = Object::from_entries([("b", 1)]);
    let o = reactive(Object::from_entries([("a", Value::from(&inner))])).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();
    watch(
        o.clone(),
        move |new, old, _| log.lock().unwrap().push((new, old)),
        WatchOptions::default().deep(),
    )
    .unwrap();

    o.get("a").as_object().unwrap().set("b", 2);
    flush().unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (new, old) = &calls[0];
    assert_eq!(new.as_object().unwrap().get("a").as_object().unwrap().get("b"), Value::from(2));
    assert_eq!(old.as_object().unwrap().get("a").as_object().unwrap().get("b"), Value::from(2));
    drop(calls);
    uninstall();
}

/// Sync watches fire inside each write, in write order.
#[test]
fn sync_flush_fires_per_write() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();
    watch(
        &a,
        move |new, old, _| log.lock().unwrap().push((number(&new), number(&old))),
        WatchOptions::default().flush(FlushMode::Sync),
    )
    .unwrap();

    a.set(2);
    a.set(3);
    assert_eq!(*calls.lock().unwrap(), vec![(2.0, 1.0), (3.0, 2.0)]);
    uninstall();
}

/// Non-sync multi-source watches coalesce writes made in one tick.
#[test]
fn multi_source_watch_coalesces() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let b = Ref::new(10).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();
    watch_sources(
        [&a, &b],
        move |new, _old, _| log.lock().unwrap().push(new.iter().map(number).collect::<Vec<_>>()),
        WatchOptions::default().flush(FlushMode::Post),
    )
    .unwrap();

    a.set(2);
    b.set(20);
    assert!(calls.lock().unwrap().is_empty());
    flush().unwrap();
    assert_eq!(*calls.lock().unwrap(), vec![vec![2.0, 20.0]]);
    uninstall();
}

/// Sync multi-source watches report every source change on its own.
#[test]
fn sync_multi_source_watch_fires_per_change() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let b = Ref::new(10).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();
    watch_sources(
        [&a, &b],
        move |new, old, _| {
            log.lock().unwrap().push((
                new.iter().map(number).collect::<Vec<_>>(),
                old.iter().map(number).collect::<Vec<_>>(),
            ))
        },
        WatchOptions::default().flush(FlushMode::Sync),
    )
    .unwrap();

    a.set(2);
    b.set(20);
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            (vec![2.0, 10.0], vec![1.0, 10.0]),
            (vec![2.0, 20.0], vec![2.0, 10.0]),
        ]
    );
    uninstall();
}

/// A lazy multi-source watch fires on the first change of any one source.
#[test]
fn lazy_multi_source_watch_fires_on_first_change() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let b = Ref::new(10).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();
    watch_sources(
        [&a, &b],
        move |new, old, _| {
            log.lock().unwrap().push((
                new.iter().map(number).collect::<Vec<_>>(),
                old.iter().map(number).collect::<Vec<_>>(),
            ))
        },
        WatchOptions::default(),
    )
    .unwrap();
    flush().unwrap();
    assert!(calls.lock().unwrap().is_empty());

    a.set(2);
    flush().unwrap();
    assert_eq!(*calls.lock().unwrap(), vec![(vec![2.0, 10.0], vec![1.0, 10.0])]);
    uninstall();
}

/// A callback already queued on an instance is dropped once its watch stops.
#[test]
fn stopped_watch_skips_queued_callback() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let scope = effect_scope(false).unwrap();
    let (source, count) = (a.clone(), calls.clone());
    let handle = scope
        .run(move || {
            watch(
                &source,
                move |_, _, _| {
                    count.fetch_add(1, Ordering::SeqCst);
                },
                WatchOptions::default().flush(FlushMode::Pre),
            )
        })
        .unwrap()
        .unwrap();

    a.set(2);
    // Runs after the host has queued the callback on the scope's instance.
    let stopper = handle.clone();
    next_tick(move || stopper.stop()).unwrap();
    flush().unwrap();
    assert!(handle.is_stopped());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    uninstall();
}

/// A pending multi-source dispatch is dropped once the watch stops.
#[test]
fn stopped_multi_source_watch_skips_pending_dispatch() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let b = Ref::new(10).unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let count = calls.clone();
    let handle = watch_sources(
        [&a, &b],
        move |_, _, _| {
            count.fetch_add(1, Ordering::SeqCst);
        },
        WatchOptions::default(),
    )
    .unwrap();

    a.set(2);
    handle.stop();
    flush().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    uninstall();
}

/// Stopping a scope drops a pre callback its watch had already queued.
#[test]
fn scope_stop_skips_queued_pre_callback() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let scope = effect_scope(false).unwrap();
    let (source, count) = (a.clone(), calls.clone());
    let handle = scope
        .run(move || {
            watch(
                &source,
                move |_, _, _| {
                    count.fetch_add(1, Ordering::SeqCst);
                },
                WatchOptions::default().flush(FlushMode::Pre),
            )
        })
        .unwrap()
        .unwrap();

    a.set(2);
    let stopping = scope.clone();
    next_tick(move || stopping.stop()).unwrap();
    flush().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(handle.is_stopped());
    uninstall();
}

/// Stopping a scope drops a multi-source dispatch waiting in its pre queue.
#[test]
fn scope_stop_skips_pending_multi_source_dispatch() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let b = Ref::new(10).unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let scope = effect_scope(false).unwrap();
    let (sources, count) = ([a.clone(), b.clone()], calls.clone());
    let handle = scope
        .run(move || {
            watch_sources(
                sources,
                move |_, _, _| {
                    count.fetch_add(1, Ordering::SeqCst);
                },
                WatchOptions::default().flush(FlushMode::Pre),
            )
        })
        .unwrap()
        .unwrap();

    a.set(2);
    scope.stop();
    flush().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(handle.is_stopped());
    uninstall();
}

#[test]
fn immediate_multi_source_watch_fires_once_on_start() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let b = Ref::new(2).unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let count = calls.clone();
    watch_sources(
        [&a, &b],
        move |new, old, _| {
            assert_eq!(new.len(), 2);
            assert!(old.iter().all(Value::is_undefined));
            count.fetch_add(1, Ordering::SeqCst);
        },
        WatchOptions::default().immediate(),
    )
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    uninstall();
}

/// Stopping a scope stops its effects and runs its cleanups once, in order.
#[test]
fn scope_stop_disposes_everything() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let runs = Arc::new(AtomicI32::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let scope = effect_scope(false).unwrap();
    let (source, counter, log) = (a.clone(), runs.clone(), order.clone());
    scope.run(move || {
        let (source, counter) = (source.clone(), counter.clone());
        watch_effect(
            move |_| {
                source.get();
                counter.fetch_add(1, Ordering::SeqCst);
            },
            WatchEffectOptions::default().flush(FlushMode::Sync),
        )
        .unwrap();

        let nested = effect_scope(false).unwrap();
        let nested_log = log.clone();
        nested.run(move || on_scope_dispose(move || nested_log.lock().unwrap().push("nested")));

        let first = log.clone();
        on_scope_dispose(move || first.lock().unwrap().push("first"));
        let second = log.clone();
        on_scope_dispose(move || second.lock().unwrap().push("second"));
    });

    a.set(2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    scope.stop();
    scope.stop();
    a.set(3);
    flush().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(*order.lock().unwrap(), vec!["nested", "first", "second"]);
    uninstall();
}

/// Writing a plain value to a key holding a ref writes into the ref.
#[test]
fn assigning_to_ref_key_keeps_identity() {
    install(Config::default());
    let r = Ref::new(1).unwrap();
    let obj = reactive(Object::from_entries([("a", Value::Ref(r.clone()))])).unwrap();

    obj.set("a", 5);
    assert_eq!(obj.get("a"), Value::from(5));
    assert_eq!(r.get(), Value::from(5));
    uninstall();
}

#[test]
fn to_refs_is_bidirectional() {
    install(Config::default());
    let r = reactive(Object::from_entries([("x", 1)])).unwrap();
    let refs = to_refs(&r).unwrap();
    let x = refs.get("x").as_ref().cloned().unwrap();

    x.set(2);
    assert_eq!(r.get("x"), Value::from(2));
    r.set("x", 3);
    assert_eq!(x.get(), Value::from(3));
    uninstall();
}

/// Pre callbacks run before a re-render and post callbacks after it.
#[test]
fn pre_and_post_flush_bracket_render() {
    install(Config::default());
    let count = Ref::new(0).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));

    let (source, log) = (count.clone(), events.clone());
    mount_component(
        ComponentOptions::default().named("Bracketed").setup(move |_, _| {
            let pre = log.clone();
            watch(&source, move |_, _, _| pre.lock().unwrap().push("pre"), WatchOptions::default().flush(FlushMode::Pre))
                .unwrap();
            let post = log.clone();
            watch(&source, move |_, _, _| post.lock().unwrap().push("post"), WatchOptions::default())
                .unwrap();
            let (render_source, render_log) = (source.clone(), log.clone());
            SetupResult::Render(Arc::new(move |_| {
                render_log.lock().unwrap().push("render");
                render_source.get()
            }))
        }),
        Object::new(),
        Object::new(),
    )
    .unwrap();
    events.lock().unwrap().clear();

    count.set(1);
    flush().unwrap();
    assert_eq!(*events.lock().unwrap(), vec!["pre", "render", "post"]);
    uninstall();
}

/// Queued callbacks still drain for an instance that never re-renders.
#[test]
fn headless_component_drains_on_next_tick() {
    install(Config::default());
    let count = Ref::new(0).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (source, log) = (count.clone(), seen.clone());
    mount_component(
        ComponentOptions::default().setup(move |_, _| {
            let log = log.clone();
            watch(&source, move |new, _, _| log.lock().unwrap().push(number(&new)), WatchOptions::default())
                .unwrap();
            SetupResult::Empty
        }),
        Object::new(),
        Object::new(),
    )
    .unwrap();

    count.set(4);
    flush().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![4.0]);
    uninstall();
}

#[test]
fn apis_fail_before_install() {
    uninstall();
    assert_eq!(Ref::new(1).unwrap_err(), Error::NotInstalled);
    assert_eq!(effect_scope(false).unwrap_err(), Error::NotInstalled);
    assert_eq!(computed(|| Value::Null).unwrap_err(), Error::NotInstalled);
}

#[tokio::test]
async fn tick_runs_post_callbacks() {
    install(Config::default());
    let a = Ref::new(1).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    watch(&a, move |new, _, _| log.lock().unwrap().push(number(&new)), WatchOptions::default()).unwrap();

    a.set(7);
    tick().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![7.0]);
    uninstall();
}

#[tokio::test]
async fn next_tick_runs_in_fifo_order() {
    install(Config::default());
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let log = order.clone();
        next_tick(move || log.lock().unwrap().push(i)).unwrap();
    }
    tick().await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    uninstall();
}
