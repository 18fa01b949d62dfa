//! The client: entry point executing operations against one server and one store.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::cache::CacheControl;
use crate::cache::key_resolver::CacheKeyResolver;
use crate::cache::key_resolver::DefaultCacheKeyResolver;
use crate::cache::storage::LruNormalizedCache;
use crate::cache::storage::MemoryCache;
use crate::cache::storage::NormalizedCache;
use crate::cache::store::ApolloStore;
use crate::call::ApolloCall;
use crate::call::CallOptions;
use crate::call::IdleCallback;
use crate::call::tracker::CallTracker;
use crate::configuration::Configuration;
use crate::error::ClientBuildError;
use crate::operation::Operation;
use crate::services::BoxService;
use crate::services::HttpClientFactory;
use crate::services::ReqwestHttpClient;
use crate::services::chain::ApolloInterceptor;
use crate::services::chain::ChainFactory;

/// Everything a call needs, shared by the calls and watchers of one client.
pub(crate) struct ClientContext {
    pub(crate) store: ApolloStore,
    pub(crate) chain_factory: ChainFactory,
    pub(crate) dispatcher: Handle,
    pub(crate) tracker: CallTracker,
    pub(crate) default_cache_control: CacheControl,
}

/// Executes GraphQL operations, serving them from the normalized cache when it can.
///
/// Cloning is cheap, clones share the store, the interceptors and the call tracker.
#[derive(Clone)]
pub struct ApolloClient {
    context: Arc<ClientContext>,
}

impl fmt::Debug for ApolloClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApolloClient")
            .field("store", &self.context.store)
            .field("tracker", &self.context.tracker)
            .finish()
    }
}

impl ApolloClient {
    pub fn builder() -> ApolloClientBuilder {
        ApolloClientBuilder::default()
    }

    /// Prepare a query. The call uses the configured default cache control.
    pub fn query<D>(&self, operation: impl Into<Arc<Operation>>) -> ApolloCall<D> {
        self.call(operation.into(), self.context.default_cache_control)
    }

    /// Prepare a mutation. Mutations always go to the network.
    pub fn mutate<D>(&self, operation: impl Into<Arc<Operation>>) -> ApolloCall<D> {
        self.call(operation.into(), CacheControl::NetworkOnly)
    }

    fn call<D>(&self, operation: Arc<Operation>, cache_control: CacheControl) -> ApolloCall<D> {
        ApolloCall::new(self.context.clone(), CallOptions::new(operation, cache_control))
    }

    pub fn store(&self) -> &ApolloStore {
        &self.context.store
    }

    /// Number of calls in flight plus active watchers.
    pub fn active_calls_count(&self) -> usize {
        self.context.tracker.active_calls_count()
    }

    pub fn clear_normalized_cache(&self) {
        self.context.store.clear_all();
    }

    /// Cancel every active watcher. Calls in flight run to completion.
    pub fn close(&self) {
        for watcher in self.context.tracker.all_watchers() {
            watcher.cancel();
        }
    }
}

/// Builder of an [`ApolloClient`].
///
/// Only the configuration is required. The normalized cache defaults to an unbounded in-memory
/// cache, or to a bounded one when the configuration sets an eviction policy. The HTTP client
/// defaults to [`ReqwestHttpClient`] and the dispatcher to the current tokio runtime.
#[derive(Default)]
pub struct ApolloClientBuilder {
    configuration: Option<Configuration>,
    http_client: Option<Arc<dyn HttpClientFactory>>,
    normalized_cache: Option<Box<dyn NormalizedCache>>,
    cache_key_resolver: Option<Arc<dyn CacheKeyResolver>>,
    interceptors: Vec<Arc<dyn ApolloInterceptor>>,
    dispatcher: Option<Handle>,
    idle_callback: Option<IdleCallback>,
}

impl ApolloClientBuilder {
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        assert!(
            self.configuration.is_none(),
            "configuration was specified twice"
        );
        self.configuration = Some(configuration);
        self
    }

    /// Transport executing the requests. Any `Clone` tower service over
    /// `http::Request<Bytes>` qualifies.
    pub fn http_client(mut self, http_client: impl HttpClientFactory) -> Self {
        self.http_client = Some(Arc::new(http_client));
        self
    }

    pub fn normalized_cache(mut self, normalized_cache: impl NormalizedCache + 'static) -> Self {
        self.normalized_cache = Some(Box::new(normalized_cache));
        self
    }

    pub fn cache_key_resolver(mut self, resolver: impl CacheKeyResolver + 'static) -> Self {
        self.cache_key_resolver = Some(Arc::new(resolver));
        self
    }

    /// Add an interceptor. Interceptors run in the order they are added, before the cache.
    pub fn interceptor(mut self, interceptor: impl ApolloInterceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Add an interceptor from a closure wrapping the rest of the chain.
    pub fn interceptor_hook(
        self,
        callback: impl Fn(BoxService) -> BoxService + Send + Sync + 'static,
    ) -> Self {
        self.interceptor(InterceptorHook(callback))
    }

    pub fn dispatcher(mut self, dispatcher: Handle) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Called every time the client becomes idle: no call in flight and no active watcher.
    pub fn idle_callback(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.idle_callback = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<ApolloClient, ClientBuildError> {
        let configuration = self
            .configuration
            .ok_or(ClientBuildError::MissingConfiguration)?;
        configuration.validate()?;

        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Handle::try_current().map_err(|_| ClientBuildError::NoDispatcher)?,
        };
        let http_client: Arc<dyn HttpClientFactory> = match self.http_client {
            Some(http_client) => http_client,
            None => Arc::new(ReqwestHttpClient::new()?),
        };
        let normalized_cache: Box<dyn NormalizedCache> = match self.normalized_cache {
            Some(normalized_cache) => normalized_cache,
            None => match &configuration.cache.eviction {
                Some(eviction) => Box::new(LruNormalizedCache::new(eviction)),
                None => Box::new(MemoryCache::new()),
            },
        };
        let resolver: Arc<dyn CacheKeyResolver> = match self.cache_key_resolver {
            Some(resolver) => resolver,
            None => Arc::new(DefaultCacheKeyResolver),
        };

        let store = ApolloStore::new(normalized_cache, resolver, dispatcher.clone());
        let chain_factory = ChainFactory::new(
            self.interceptors,
            store.clone(),
            http_client,
            configuration.server_url.clone(),
            configuration.send_operation_identifiers,
        );
        tracing::debug!(
            server_url = %configuration.server_url,
            "apollo client created"
        );

        Ok(ApolloClient {
            context: Arc::new(ClientContext {
                store,
                chain_factory,
                dispatcher,
                tracker: CallTracker::new(self.idle_callback),
                default_cache_control: configuration.cache.default_control,
            }),
        })
    }
}

struct InterceptorHook<F>(F);

impl<F> ApolloInterceptor for InterceptorHook<F>
where
    F: Fn(BoxService) -> BoxService + Send + Sync + 'static,
{
    fn intercept(&self, service: BoxService) -> BoxService {
        (self.0)(service)
    }
}
