//! Update Scheduler
//!
//! Two queues live here.
//!
//! # The tick queue
//!
//! [`next_tick`] defers a callback to the next tick. Ticks are drained by
//! [`flush`], which keeps running callbacks (including ones queued while
//! draining) until the queue is empty. [`tick`] is the async form: it
//! resolves once everything queued before it has run.
//!
//! # The watcher queue
//!
//! Non-sync watchers are not run on notification. They are queued, at most
//! once each, and flushed together on the next tick:
//!
//! 1. The queue is sorted by watcher id, so parents update before children
//!    and user watchers before the render watcher of their instance.
//!
//! 2. Each watcher's `before` hook runs, then the watcher itself. Watchers
//!    queued during the flush are inserted at their sorted position.
//!
//! 3. A watcher that keeps re-queueing itself is cut off after
//!    [`MAX_UPDATE_COUNT`] runs with a warning.
//!
//! 4. Instances whose render watcher ran get their `updated` hook, in
//!    reverse queue order.

use std::collections::{HashMap, HashSet};

use tokio::sync::oneshot;

use super::dep::SubscriberId;
use super::instance::LifecycleHook;
use super::watcher::{Job, Watcher};
use super::{runtime, HostState};
use crate::config::warn;
use crate::error::{Error, Result};

/// Runs a single watcher may take in one flush before it is considered
/// an infinite loop.
pub const MAX_UPDATE_COUNT: usize = 100;

/// Watcher queue bookkeeping.
#[derive(Default)]
pub(crate) struct SchedulerState {
    queue: Vec<Watcher>,
    has: HashSet<SubscriberId>,
    circular: HashMap<SubscriberId, usize>,
    index: usize,
    waiting: bool,
    flushing: bool,
}

/// Defer `callback` to the next tick.
pub fn next_tick<F>(callback: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let host = runtime()?;
    host.ticks.borrow_mut().push_back(Box::new(callback));
    Ok(())
}

/// Run every pending tick callback until the queue is empty.
///
/// Calling `flush` from inside a tick callback is a no-op; the outer
/// flush picks up whatever was queued.
pub fn flush() -> Result<()> {
    let host = runtime()?;
    if host.draining.replace(true) {
        return Ok(());
    }
    let _reset = DrainGuard(&host);
    loop {
        let batch: Vec<Job> = host.ticks.borrow_mut().drain(..).collect();
        if batch.is_empty() {
            break;
        }
        tracing::trace!(target: "trellis", jobs = batch.len(), "flushing tick");
        for job in batch {
            job();
        }
    }
    Ok(())
}

struct DrainGuard<'a>(&'a HostState);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.draining.set(false);
    }
}

/// Wait for the next tick.
///
/// Everything queued before the call has run when this resolves.
pub async fn tick() -> Result<()> {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
    })?;
    flush()?;
    rx.await.map_err(|_| Error::NotInstalled)
}

/// Queue `watcher` for the next flush. Duplicates are ignored, except for
/// a watcher that is currently running.
pub(crate) fn queue_watcher(watcher: Watcher) {
    let Ok(host) = runtime() else {
        // No scheduler to defer to.
        watcher.run();
        return;
    };

    let id = watcher.id();
    let start_flush = {
        let mut state = host.scheduler.borrow_mut();
        if !state.has.insert(id) {
            return;
        }
        if !state.flushing {
            state.queue.push(watcher);
        } else {
            let mut i = state.queue.len();
            while i > state.index + 1 && state.queue[i - 1].id() > id {
                i -= 1;
            }
            state.queue.insert(i, watcher);
        }
        !std::mem::replace(&mut state.waiting, true)
    };

    if start_flush {
        if host.config.async_updates {
            host.ticks.borrow_mut().push_back(Box::new(flush_scheduler_queue));
        } else {
            flush_scheduler_queue();
        }
    }
}

fn flush_scheduler_queue() {
    let Ok(host) = runtime() else {
        return;
    };
    {
        let mut state = host.scheduler.borrow_mut();
        state.flushing = true;
        state.queue.sort_by_key(Watcher::id);
    }

    let mut index = 0;
    loop {
        let watcher = {
            let mut state = host.scheduler.borrow_mut();
            state.index = index;
            match state.queue.get(index) {
                Some(w) => w.clone(),
                None => break,
            }
        };
        watcher.before();
        let id = watcher.id();
        host.scheduler.borrow_mut().has.remove(&id);
        watcher.run();

        if host.config.dev {
            let looping = {
                let mut state = host.scheduler.borrow_mut();
                if state.has.contains(&id) {
                    let count = state.circular.entry(id).or_insert(0);
                    *count += 1;
                    *count > MAX_UPDATE_COUNT
                } else {
                    false
                }
            };
            if looping {
                let vm = watcher.vm();
                let message = if watcher.is_user() {
                    "You may have an infinite update loop in a watcher."
                } else {
                    "You may have an infinite update loop in a component render function."
                };
                warn(message, vm.as_ref());
                break;
            }
        }
        index += 1;
    }

    let updated = {
        let mut state = host.scheduler.borrow_mut();
        let updated = std::mem::take(&mut state.queue);
        *state = SchedulerState::default();
        updated
    };
    call_updated_hooks(&updated);
}

fn call_updated_hooks(queue: &[Watcher]) {
    for watcher in queue.iter().rev() {
        let Some(vm) = watcher.vm() else {
            continue;
        };
        if vm.is_render_watcher(watcher) && vm.is_mounted() && !vm.is_destroyed() {
            vm.call_hook(LifecycleHook::Updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{install, uninstall};
    use crate::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn ticks_run_in_order_and_drain_nested() {
        install(Config::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (log.clone(), log.clone());
        next_tick(move || {
            a.lock().unwrap().push(1);
            let c = a.clone();
            next_tick(move || c.lock().unwrap().push(3)).unwrap();
        })
        .unwrap();
        next_tick(move || b.lock().unwrap().push(2)).unwrap();

        flush().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        uninstall();
    }

    #[test]
    fn next_tick_requires_host() {
        uninstall();
        assert_eq!(next_tick(|| {}), Err(Error::NotInstalled));
        assert_eq!(flush(), Err(Error::NotInstalled));
    }

    #[test]
    fn nested_flush_is_a_no_op() {
        install(Config::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        next_tick(move || {
            r.fetch_add(1, Ordering::SeqCst);
            flush().unwrap();
        })
        .unwrap();
        flush().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        uninstall();
    }

    #[tokio::test]
    async fn tick_resolves_after_queued_work() {
        install(Config::default());
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        next_tick(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        tick().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        uninstall();
    }
}
