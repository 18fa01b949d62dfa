//! Bookkeeping of the calls and watchers of one client.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::operation::OperationName;

/// Invoked every time the client becomes idle.
pub type IdleCallback = Arc<dyn Fn() + Send + Sync>;

/// A watcher that can be refetched or canceled by name.
pub(crate) trait ActiveWatcher: Send + Sync {
    fn refetch(&self);
    fn cancel(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct WatcherId(u64);

#[derive(Default)]
struct Registry {
    active: usize,
    watchers: HashMap<OperationName, HashMap<WatcherId, Arc<dyn ActiveWatcher>>>,
}

#[derive(Default)]
struct Inner {
    registry: Mutex<Registry>,
    next_watcher: AtomicU64,
    idle_callback: Option<IdleCallback>,
}

/// Counts the in-flight calls and the active watchers of a client.
#[derive(Clone, Default)]
pub(crate) struct CallTracker {
    inner: Arc<Inner>,
}

impl fmt::Debug for CallTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTracker")
            .field("active", &self.active_calls_count())
            .finish()
    }
}

/// Keeps a call counted as in flight until dropped.
#[must_use]
pub(crate) struct CallGuard {
    tracker: CallTracker,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}

impl CallTracker {
    pub(crate) fn new(idle_callback: Option<IdleCallback>) -> Self {
        Self {
            inner: Arc::new(Inner {
                idle_callback,
                ..Default::default()
            }),
        }
    }

    /// Number of in-flight calls plus active watchers.
    pub(crate) fn active_calls_count(&self) -> usize {
        self.inner.registry.lock().active
    }

    pub(crate) fn track_call(&self) -> CallGuard {
        self.inner.registry.lock().active += 1;
        CallGuard {
            tracker: self.clone(),
        }
    }

    pub(crate) fn next_watcher_id(&self) -> WatcherId {
        WatcherId(self.inner.next_watcher.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register_watcher(
        &self,
        name: &OperationName,
        id: WatcherId,
        watcher: Arc<dyn ActiveWatcher>,
    ) {
        let mut registry = self.inner.registry.lock();
        let previous = registry
            .watchers
            .entry(name.clone())
            .or_default()
            .insert(id, watcher);
        if previous.is_none() {
            registry.active += 1;
        }
    }

    pub(crate) fn unregister_watcher(&self, name: &OperationName, id: WatcherId) {
        let idle = {
            let mut registry = self.inner.registry.lock();
            let removed = match registry.watchers.get_mut(name) {
                Some(watchers) => {
                    let removed = watchers.remove(&id).is_some();
                    if watchers.is_empty() {
                        registry.watchers.remove(name);
                    }
                    removed
                }
                None => false,
            };
            if !removed {
                return;
            }
            registry.active -= 1;
            registry.active == 0
        };
        if idle {
            self.notify_idle();
        }
    }

    /// Active watchers of the given operations.
    pub(crate) fn active_watchers(&self, names: &[OperationName]) -> Vec<Arc<dyn ActiveWatcher>> {
        let registry = self.inner.registry.lock();
        names
            .iter()
            .filter_map(|name| registry.watchers.get(name))
            .flat_map(|watchers| watchers.values().cloned())
            .collect()
    }

    pub(crate) fn all_watchers(&self) -> Vec<Arc<dyn ActiveWatcher>> {
        self.inner
            .registry
            .lock()
            .watchers
            .values()
            .flat_map(|watchers| watchers.values().cloned())
            .collect()
    }

    fn decrement(&self) {
        let idle = {
            let mut registry = self.inner.registry.lock();
            registry.active = registry.active.saturating_sub(1);
            registry.active == 0
        };
        if idle {
            self.notify_idle();
        }
    }

    fn notify_idle(&self) {
        if let Some(callback) = &self.inner.idle_callback {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct NoopWatcher {
        refetched: AtomicUsize,
    }

    impl ActiveWatcher for NoopWatcher {
        fn refetch(&self) {
            self.refetched.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {}
    }

    fn idle_counter() -> (Arc<AtomicUsize>, IdleCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let callback_count = count.clone();
        (
            count,
            Arc::new(move || {
                callback_count.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn idle_callback_fires_when_count_drops_to_zero() {
        let (idle, callback) = idle_counter();
        let tracker = CallTracker::new(Some(callback));

        let first = tracker.track_call();
        let second = tracker.track_call();
        assert_eq!(tracker.active_calls_count(), 2);

        drop(first);
        assert_eq!(idle.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(idle.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.active_calls_count(), 0);
    }

    #[test]
    fn watchers_are_indexed_by_name() {
        let (idle, callback) = idle_counter();
        let tracker = CallTracker::new(Some(callback));
        let watcher = Arc::new(NoopWatcher {
            refetched: AtomicUsize::new(0),
        });
        let hero = OperationName::new("HeroName");
        let id = tracker.next_watcher_id();

        tracker.register_watcher(&hero, id, watcher.clone());
        assert_eq!(tracker.active_calls_count(), 1);

        for active in tracker.active_watchers(&[hero.clone(), OperationName::new("Other")]) {
            active.refetch();
        }
        assert_eq!(watcher.refetched.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.all_watchers().len(), 1);

        tracker.unregister_watcher(&hero, id);
        tracker.unregister_watcher(&hero, id);
        assert_eq!(tracker.active_calls_count(), 0);
        assert_eq!(idle.load(Ordering::SeqCst), 1);
        assert!(tracker.active_watchers(&[hero]).is_empty());
    }
}
