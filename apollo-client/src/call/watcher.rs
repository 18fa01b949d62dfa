//! Query watchers: queries re-delivered whenever the records they read change.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::ApolloCallback;
use super::CallOptions;
use super::deliver;
use super::dispatch;
use super::tracker::ActiveWatcher;
use super::tracker::WatcherId;
use crate::cache::CacheControl;
use crate::cache::store::StoreSubscriber;
use crate::cache::store::SubscriptionId;
use crate::client::ClientContext;
use crate::error::ApolloError;
use crate::graphql;
use crate::graphql::Response;
use crate::json_ext::Value;

/// Keeps delivering the result of a query as the cache changes.
///
/// Once started with [`enqueue_and_watch`](QueryWatcher::enqueue_and_watch), the watcher
/// subscribes to the records its last response depends on and re-executes with its refetch
/// cache control when any of them changes. Identical consecutive responses are delivered once.
pub struct QueryWatcher<D = Value> {
    inner: Arc<WatcherInner<D>>,
}

struct WatcherInner<D> {
    id: WatcherId,
    context: Arc<ClientContext>,
    options: CallOptions,
    state: Mutex<WatcherState<D>>,
}

struct WatcherState<D> {
    started: bool,
    canceled: bool,
    refetch_cache_control: CacheControl,
    callback: Option<Arc<dyn ApolloCallback<D>>>,
    /// Bumped on every fetch, results of older fetches are dropped.
    generation: u64,
    active_call: Option<CancellationToken>,
    subscription: Option<SubscriptionId>,
    last_delivered: Option<(Option<Value>, Vec<graphql::Error>)>,
}

impl<D> fmt::Debug for QueryWatcher<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("QueryWatcher")
            .field("operation", self.inner.options.operation.name())
            .field("started", &state.started)
            .field("canceled", &state.canceled)
            .field("refetch_cache_control", &state.refetch_cache_control)
            .finish()
    }
}

impl<D> QueryWatcher<D> {
    pub(crate) fn new(context: Arc<ClientContext>, options: CallOptions) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                id: context.tracker.next_watcher_id(),
                context,
                options,
                state: Mutex::new(WatcherState {
                    started: false,
                    canceled: false,
                    refetch_cache_control: CacheControl::CacheFirst,
                    callback: None,
                    generation: 0,
                    active_call: None,
                    subscription: None,
                    last_delivered: None,
                }),
            }),
        }
    }

    /// Cache control used when the watcher re-executes. Defaults to
    /// [`CacheControl::CacheFirst`].
    ///
    /// # Panics
    ///
    /// If the watcher was already started.
    pub fn with_refetch_cache_control(self, cache_control: CacheControl) -> Self {
        {
            let mut state = self.inner.state.lock();
            assert!(!state.started, "already executed");
            state.refetch_cache_control = cache_control;
        }
        self
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.state.lock().canceled
    }
}

impl<D> QueryWatcher<D>
where
    D: DeserializeOwned + Send + 'static,
{
    /// Execute the query and keep delivering its result to `callback`.
    ///
    /// # Panics
    ///
    /// If the watcher was already started.
    pub fn enqueue_and_watch<C>(&self, callback: C)
    where
        C: ApolloCallback<D>,
    {
        let callback: Arc<dyn ApolloCallback<D>> = Arc::new(callback);
        let canceled = {
            let mut state = self.inner.state.lock();
            assert!(!state.started, "already executed");
            state.started = true;
            state.callback = Some(callback.clone());
            state.canceled
        };
        if canceled {
            callback.on_canceled_error(ApolloError::Canceled);
            return;
        }

        self.inner.context.tracker.register_watcher(
            self.inner.options.operation.name(),
            self.inner.id,
            Arc::new(QueryWatcher {
                inner: self.inner.clone(),
            }),
        );
        self.inner.fetch(self.inner.options.cache_control);
    }

    /// Re-execute the query with the refetch cache control.
    pub fn refetch(&self) {
        self.inner.refetch();
    }

    /// Stop watching. The callback receives a canceled error if an execution was in flight.
    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

impl<D> ActiveWatcher for QueryWatcher<D>
where
    D: DeserializeOwned + Send + 'static,
{
    fn refetch(&self) {
        self.inner.refetch();
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

impl<D> WatcherInner<D>
where
    D: DeserializeOwned + Send + 'static,
{
    fn refetch(self: &Arc<Self>) {
        let cache_control = self.state.lock().refetch_cache_control;
        self.fetch(cache_control);
    }

    fn fetch(self: &Arc<Self>, cache_control: CacheControl) {
        let (generation, cancellation) = {
            let mut state = self.state.lock();
            if !state.started || state.canceled {
                return;
            }
            if let Some(previous) = state.active_call.take() {
                previous.cancel();
            }
            state.generation += 1;
            let cancellation = CancellationToken::new();
            state.active_call = Some(cancellation.clone());
            (state.generation, cancellation)
        };

        let options = CallOptions {
            cache_control,
            ..self.options.clone()
        };
        let guard = self.context.tracker.track_call();
        let inner = self.clone();
        let span = tracing::info_span!(
            "apollo.watch",
            operation = %self.options.operation.name(),
            cache_control = ?cache_control,
        );
        self.context.dispatcher.spawn(
            async move {
                let result = dispatch(&inner.context, &options, &cancellation).await;
                inner.on_result(generation, result);
                drop(guard);
            }
            .instrument(span),
        );
    }

    fn on_result(self: &Arc<Self>, generation: u64, result: Result<Response<Value>, ApolloError>) {
        let callback = {
            let mut state = self.state.lock();
            if state.canceled || state.generation != generation {
                return;
            }
            state.active_call = None;

            match &result {
                // superseded by a newer fetch
                Err(ApolloError::Canceled) => return,
                Err(_) => state.last_delivered = None,
                Ok(response) => {
                    self.track_dependencies(&mut state, response.dependent_keys.clone());
                    let delivered = (response.data.clone(), response.errors.clone());
                    if state.last_delivered.as_ref() == Some(&delivered) {
                        tracing::trace!("response unchanged, not delivering it again");
                        return;
                    }
                    state.last_delivered = Some(delivered);
                }
            }
            state.callback.clone()
        };

        if let Some(callback) = callback {
            deliver(&*callback, result.and_then(Response::into_typed::<D>));
        }
    }

    fn track_dependencies(self: &Arc<Self>, state: &mut WatcherState<D>, keys: HashSet<String>) {
        let store = &self.context.store;
        match state.subscription {
            Some(id) if store.update_subscription(id, keys.clone()) => {}
            _ => {
                let subscriber = Arc::new(WatcherSubscriber {
                    inner: Arc::downgrade(self),
                });
                state.subscription = Some(store.subscribe(keys, subscriber));
            }
        }
    }

    fn cancel(&self) {
        let (callback, in_flight, subscription, started) = {
            let mut state = self.state.lock();
            if state.canceled {
                return;
            }
            state.canceled = true;
            (
                state.callback.clone(),
                state.active_call.take(),
                state.subscription.take(),
                state.started,
            )
        };

        if let Some(subscription) = subscription {
            self.context.store.unsubscribe(subscription);
        }
        if started {
            self.context
                .tracker
                .unregister_watcher(self.options.operation.name(), self.id);
        }
        if let Some(cancellation) = in_flight {
            cancellation.cancel();
            if let Some(callback) = callback {
                callback.on_canceled_error(ApolloError::Canceled);
            }
        }
    }
}

/// Re-executes its watcher when the records it depends on change.
struct WatcherSubscriber<D> {
    inner: Weak<WatcherInner<D>>,
}

impl<D> StoreSubscriber for WatcherSubscriber<D>
where
    D: DeserializeOwned + Send + 'static,
{
    fn on_records_changed(&self, _changed_keys: &HashSet<String>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.refetch();
        }
    }
}
