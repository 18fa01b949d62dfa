//! Assembly and execution of the interceptor chain.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use url::Url;

use super::BoxService;
use super::Request;
use super::ServiceResult;
use super::cache::CacheService;
use super::http::HttpClientFactory;
use super::parse::ParseService;
use super::server::ServerService;
use crate::cache::store::ApolloStore;

/// An application stage of the chain.
///
/// Interceptors run before the built-in stages, the first registered being the outermost. An
/// interceptor receives the rest of the chain and returns the service to call in its place: it
/// may inspect or rewrite the request, delegate, post-process the response, or answer on its own.
pub trait ApolloInterceptor: Send + Sync + 'static {
    fn intercept(&self, service: BoxService) -> BoxService;
}

/// Builds one chain per execution.
#[derive(Clone)]
pub(crate) struct ChainFactory {
    interceptors: Arc<Vec<Arc<dyn ApolloInterceptor>>>,
    store: ApolloStore,
    http_client: Arc<dyn HttpClientFactory>,
    server_url: Url,
    send_operation_identifiers: bool,
}

impl ChainFactory {
    pub(crate) fn new(
        interceptors: Vec<Arc<dyn ApolloInterceptor>>,
        store: ApolloStore,
        http_client: Arc<dyn HttpClientFactory>,
        server_url: Url,
        send_operation_identifiers: bool,
    ) -> Self {
        Self {
            interceptors: Arc::new(interceptors),
            store,
            http_client,
            server_url,
            send_operation_identifiers,
        }
    }

    pub(crate) fn create(&self, cancellation: CancellationToken) -> InterceptorChain {
        let server = ServerService::new(
            self.http_client.clone(),
            self.server_url.clone(),
            self.send_operation_identifiers,
        )
        .boxed();
        let parse = ParseService::new(self.store.clone(), server).boxed();
        let cache = CacheService::new(self.store.clone(), parse).boxed();
        let service = self
            .interceptors
            .iter()
            .rev()
            .fold(cache, |service, interceptor| interceptor.intercept(service));

        InterceptorChain {
            service,
            cancellation,
        }
    }
}

/// The stages one execution goes through.
pub struct InterceptorChain {
    service: BoxService,
    cancellation: CancellationToken,
}

impl InterceptorChain {
    pub fn new(service: BoxService, cancellation: CancellationToken) -> Self {
        Self {
            service,
            cancellation,
        }
    }

    /// Run the request through the chain on the current task.
    pub async fn proceed(self, request: Request) -> ServiceResult {
        self.service.oneshot(request).await
    }

    /// Run the request through the chain on the dispatcher, handing the result to `callback`.
    pub fn proceed_async<F>(self, dispatcher: &Handle, request: Request, callback: F)
    where
        F: FnOnce(ServiceResult) + Send + 'static,
    {
        dispatcher.spawn(async move {
            callback(self.proceed(request).await);
        });
    }

    /// Cancel whatever the chain is doing. In-flight network requests are dropped.
    pub fn dispose(&self) {
        self.cancellation.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
