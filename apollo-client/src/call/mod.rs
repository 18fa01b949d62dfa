//! Executing operations: one-shot calls, their callbacks and their lifecycle.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::CacheControl;
use crate::cache::headers::CacheHeaders;
use crate::cache::http::HttpCachePolicy;
use crate::client::ClientContext;
use crate::error::ApolloError;
use crate::graphql::Response;
use crate::json_ext::Value;
use crate::operation::Operation;
use crate::operation::OperationName;
use crate::services::Request;

mod refetcher;
pub(crate) mod tracker;
pub mod watcher;

pub use tracker::IdleCallback;
pub use watcher::QueryWatcher;

use self::refetcher::QueryRefetcher;

/// Receives the outcome of an execution.
///
/// Exactly one method is invoked per execution. The per-kind error hooks default to
/// [`on_failure`](ApolloCallback::on_failure).
///
/// Closures taking a `Result<Response<D>, ApolloError>` are callbacks.
pub trait ApolloCallback<D>: Send + Sync + 'static {
    fn on_response(&self, response: Response<D>);

    fn on_failure(&self, error: ApolloError);

    /// The server answered with a non-2xx status.
    fn on_http_error(&self, error: ApolloError) {
        self.on_failure(error)
    }

    /// The request could not be sent or its response could not be received.
    fn on_network_error(&self, error: ApolloError) {
        self.on_failure(error)
    }

    /// The response could not be parsed or did not match the operation.
    fn on_parse_error(&self, error: ApolloError) {
        self.on_failure(error)
    }

    /// The call was canceled before a response was delivered.
    fn on_canceled_error(&self, error: ApolloError) {
        self.on_failure(error)
    }
}

impl<D, F> ApolloCallback<D> for F
where
    F: Fn(Result<Response<D>, ApolloError>) + Send + Sync + 'static,
{
    fn on_response(&self, response: Response<D>) {
        self(Ok(response))
    }

    fn on_failure(&self, error: ApolloError) {
        self(Err(error))
    }
}

pub(crate) fn deliver<D, C>(callback: &C, result: Result<Response<D>, ApolloError>)
where
    C: ApolloCallback<D> + ?Sized,
{
    match result {
        Ok(response) => callback.on_response(response),
        Err(error @ ApolloError::Canceled) => callback.on_canceled_error(error),
        Err(error @ ApolloError::Http { .. }) => callback.on_http_error(error),
        Err(error @ ApolloError::Network { .. }) => callback.on_network_error(error),
        Err(error @ ApolloError::Parse { .. }) => callback.on_parse_error(error),
        Err(error) => callback.on_failure(error),
    }
}

/// How a call is executed. Immutable once the call started.
#[derive(Clone, Debug)]
pub(crate) struct CallOptions {
    pub(crate) operation: Arc<Operation>,
    pub(crate) cache_control: CacheControl,
    pub(crate) cache_headers: CacheHeaders,
    pub(crate) http_cache_policy: Option<HttpCachePolicy>,
    pub(crate) refetch_operations: Vec<Arc<Operation>>,
    pub(crate) refetch_names: Vec<OperationName>,
}

impl CallOptions {
    pub(crate) fn new(operation: Arc<Operation>, cache_control: CacheControl) -> Self {
        Self {
            operation,
            cache_control,
            cache_headers: CacheHeaders::none(),
            http_cache_policy: None,
            refetch_operations: Vec::new(),
            refetch_names: Vec::new(),
        }
    }

    fn request(&self, cancellation: CancellationToken) -> Request {
        Request {
            operation: self.operation.clone(),
            cache_control: self.cache_control,
            cache_headers: self.cache_headers.clone(),
            http_cache_policy: self.http_cache_policy.clone(),
            cancellation,
        }
    }
}

/// Run one execution through a fresh chain.
///
/// Cancellation wins over whatever the chain produced.
pub(crate) async fn dispatch(
    context: &ClientContext,
    options: &CallOptions,
    cancellation: &CancellationToken,
) -> Result<Response<Value>, ApolloError> {
    if cancellation.is_cancelled() {
        return Err(ApolloError::Canceled);
    }

    let chain = context.chain_factory.create(cancellation.clone());
    let request = options.request(cancellation.clone());
    let result = tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(ApolloError::Canceled),
        result = chain.proceed(request) => result,
    };
    if cancellation.is_cancelled() {
        return Err(ApolloError::Canceled);
    }
    result.map(|response| response.response.unwrap_or_default())
}

/// Where a call is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    NotExecuted,
    Executing,
    Completed,
    Canceled,
}

#[derive(Default)]
struct CallState {
    executed: AtomicBool,
    completed: AtomicBool,
    cancellation: CancellationToken,
    refetcher: Mutex<Option<QueryRefetcher>>,
}

impl CallState {
    fn start(&self) {
        if self.executed.swap(true, Ordering::SeqCst) {
            panic!("already executed");
        }
    }

    fn cancel(&self) {
        self.cancellation.cancel();
        if let Some(refetcher) = self.refetcher.lock().as_ref() {
            refetcher.cancel();
        }
    }
}

/// A single execution of an operation.
///
/// A call executes at most once, through [`execute`](ApolloCall::execute) or
/// [`enqueue`](ApolloCall::enqueue). Cloning gives a fresh call with the same options.
pub struct ApolloCall<D = Value> {
    context: Arc<ClientContext>,
    options: CallOptions,
    state: Arc<CallState>,
    _data: PhantomData<fn() -> D>,
}

impl<D> Clone for ApolloCall<D> {
    fn clone(&self) -> Self {
        Self::new(self.context.clone(), self.options.clone())
    }
}

impl<D> fmt::Debug for ApolloCall<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApolloCall")
            .field("operation", self.options.operation.name())
            .field("cache_control", &self.options.cache_control)
            .field("state", &self.state())
            .finish()
    }
}

impl<D> ApolloCall<D> {
    pub(crate) fn new(context: Arc<ClientContext>, options: CallOptions) -> Self {
        Self {
            context,
            options,
            state: Default::default(),
            _data: PhantomData,
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.options.operation
    }

    pub fn with_cache_control(mut self, cache_control: CacheControl) -> Self {
        self.assert_not_executed();
        self.options.cache_control = cache_control;
        self
    }

    pub fn with_cache_headers(mut self, cache_headers: CacheHeaders) -> Self {
        self.assert_not_executed();
        self.options.cache_headers = cache_headers;
        self
    }

    pub fn with_http_cache_policy(mut self, http_cache_policy: HttpCachePolicy) -> Self {
        self.assert_not_executed();
        self.options.http_cache_policy = Some(http_cache_policy);
        self
    }

    /// Refetch these operations from the network once this call succeeds.
    pub fn refetch_queries(mut self, operations: Vec<Arc<Operation>>) -> Self {
        self.assert_not_executed();
        self.options.refetch_operations = operations;
        self
    }

    /// Refetch the active watchers of these operations once this call succeeds.
    pub fn refetch_query_names<N>(mut self, names: impl IntoIterator<Item = N>) -> Self
    where
        N: Into<OperationName>,
    {
        self.assert_not_executed();
        self.options.refetch_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Cancel the call and the refetches it started.
    ///
    /// A response arriving afterwards is dropped and the execution ends with
    /// [`ApolloError::Canceled`]. Records already merged in the cache stay there.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.state.cancellation.is_cancelled()
    }

    pub fn state(&self) -> ExecutionState {
        if self.is_canceled() {
            ExecutionState::Canceled
        } else if self.state.completed.load(Ordering::SeqCst) {
            ExecutionState::Completed
        } else if self.state.executed.load(Ordering::SeqCst) {
            ExecutionState::Executing
        } else {
            ExecutionState::NotExecuted
        }
    }

    /// Watch the result of this query.
    ///
    /// # Panics
    ///
    /// If the operation is not a query.
    pub fn watcher(&self) -> QueryWatcher<D> {
        assert!(
            self.options.operation.is_query(),
            "only queries can be watched"
        );
        QueryWatcher::new(self.context.clone(), self.options.clone())
    }

    fn assert_not_executed(&self) {
        assert!(
            !self.state.executed.load(Ordering::SeqCst),
            "already executed"
        );
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "apollo.call",
            operation = %self.options.operation.name(),
            cache_control = ?self.options.cache_control,
        )
    }
}

impl<D> ApolloCall<D>
where
    D: DeserializeOwned + Send + 'static,
{
    /// Execute the call on the current task.
    ///
    /// # Panics
    ///
    /// If the call was already executed.
    pub async fn execute(&self) -> Result<Response<D>, ApolloError> {
        self.state.start();
        let _guard = self.context.tracker.track_call();
        run(&self.context, &self.options, &self.state)
            .instrument(self.span())
            .await
            .and_then(Response::into_typed)
    }

    /// Execute the call on the dispatcher and hand the outcome to `callback`.
    ///
    /// # Panics
    ///
    /// If the call was already executed.
    pub fn enqueue<C>(&self, callback: C)
    where
        C: ApolloCallback<D>,
    {
        self.state.start();
        let guard = self.context.tracker.track_call();
        let context = self.context.clone();
        let options = self.options.clone();
        let state = self.state.clone();

        self.context.dispatcher.spawn(
            async move {
                let result = run(&context, &options, &state)
                    .await
                    .and_then(Response::into_typed::<D>);
                deliver(&callback, result);
                drop(guard);
            }
            .instrument(self.span()),
        );
    }
}

async fn run(
    context: &Arc<ClientContext>,
    options: &CallOptions,
    state: &CallState,
) -> Result<Response<Value>, ApolloError> {
    let result = dispatch(context, options, &state.cancellation).await;
    state.completed.store(true, Ordering::SeqCst);
    if state.cancellation.is_cancelled() {
        return Err(ApolloError::Canceled);
    }

    if result.is_ok()
        && (!options.refetch_operations.is_empty() || !options.refetch_names.is_empty())
    {
        let refetcher = QueryRefetcher::start(
            context,
            &options.refetch_operations,
            &options.refetch_names,
            &state.cancellation,
        );
        *state.refetcher.lock() = Some(refetcher);
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        http: AtomicUsize,
        network: AtomicUsize,
        parse: AtomicUsize,
        canceled: AtomicUsize,
        failure: AtomicUsize,
    }

    impl ApolloCallback<Value> for Recorder {
        fn on_response(&self, _response: Response<Value>) {}

        fn on_failure(&self, _error: ApolloError) {
            self.failure.fetch_add(1, Ordering::SeqCst);
        }

        fn on_http_error(&self, _error: ApolloError) {
            self.http.fetch_add(1, Ordering::SeqCst);
        }

        fn on_network_error(&self, _error: ApolloError) {
            self.network.fetch_add(1, Ordering::SeqCst);
        }

        fn on_parse_error(&self, _error: ApolloError) {
            self.parse.fetch_add(1, Ordering::SeqCst);
        }

        fn on_canceled_error(&self, _error: ApolloError) {
            self.canceled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn errors_are_routed_to_their_hook() {
        let recorder = Recorder::default();
        deliver::<Value, _>(
            &recorder,
            Err(ApolloError::Http {
                status: http::StatusCode::BAD_GATEWAY,
                body: Default::default(),
            }),
        );
        deliver::<Value, _>(&recorder, Err(ApolloError::network("refused")));
        deliver::<Value, _>(&recorder, Err(ApolloError::parse("not json")));
        deliver::<Value, _>(&recorder, Err(ApolloError::Canceled));
        deliver::<Value, _>(
            &recorder,
            Err(ApolloError::Interceptor {
                reason: "denied".to_string(),
            }),
        );

        for count in [
            &recorder.http,
            &recorder.network,
            &recorder.parse,
            &recorder.canceled,
            &recorder.failure,
        ] {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn closures_receive_every_outcome() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counted = failures.clone();
        let callback = move |result: Result<Response<Value>, ApolloError>| {
            if result.is_err() {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        };

        deliver::<Value, _>(&callback, Err(ApolloError::Canceled));
        deliver::<Value, _>(&callback, Err(ApolloError::network("refused")));
        deliver::<Value, _>(&callback, Ok(Response::default()));
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }
}
