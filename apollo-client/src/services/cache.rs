//! Serves operations from the normalized cache and writes network responses to it.

use std::task::Poll;

use futures::future::BoxFuture;
use tower::Service;

use super::BoxService;
use super::Request;
use super::Response;
use crate::cache::CacheControl;
use crate::cache::headers::CacheHeaders;
use crate::cache::store::ApolloStore;
use crate::error::ApolloError;
use crate::graphql;
use crate::operation::Operation;

pub(crate) struct CacheService {
    store: ApolloStore,
    inner: BoxService,
}

impl CacheService {
    pub(crate) fn new(store: ApolloStore, inner: BoxService) -> Self {
        Self { store, inner }
    }
}

impl Service<Request> for CacheService {
    type Response = Response;
    type Error = ApolloError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let store = self.store.clone();
        let operation = request.operation.clone();
        let cache_headers = request.cache_headers.clone();
        let cache_control = request.cache_control;
        let cancellation = request.cancellation.clone();

        // only queries are answered from the cache
        if operation.is_query() && cache_control.reads_cache_first() {
            match read(&store, &operation, &cache_headers) {
                Some(response) => {
                    tracing::debug!(operation = %operation.name(), "Cache HIT for operation");
                    return Box::pin(async move { Ok(response) });
                }
                None if cache_control == CacheControl::CacheOnly => {
                    tracing::debug!(operation = %operation.name(), "Cache MISS for operation");
                    let miss = graphql::Response {
                        from_cache: true,
                        ..Default::default()
                    };
                    return Box::pin(async move { Ok(Response::from_cache(miss, None)) });
                }
                None => {
                    tracing::debug!(operation = %operation.name(), "Cache MISS for operation");
                }
            }
        }

        let response = self.inner.call(request);
        Box::pin(async move {
            match response.await {
                Ok(response) => {
                    write(&store, &cache_headers, &response);
                    Ok(response)
                }
                Err(ApolloError::Canceled) => Err(ApolloError::Canceled),
                Err(error) if operation.is_query() && cache_control == CacheControl::NetworkFirst => {
                    if cancellation.is_cancelled() {
                        return Err(ApolloError::Canceled);
                    }
                    match read(&store, &operation, &cache_headers) {
                        Some(response) => {
                            tracing::debug!(
                                operation = %operation.name(),
                                "network failed, serving cached response: {error}"
                            );
                            Ok(response)
                        }
                        None => Err(error),
                    }
                }
                Err(error) => Err(error),
            }
        })
    }
}

fn read(
    store: &ApolloStore,
    operation: &Operation,
    cache_headers: &CacheHeaders,
) -> Option<Response> {
    store
        .read_operation(operation, cache_headers)
        .map(|(response, records)| Response::from_cache(response, Some(records)))
}

/// Merge the records of a network response and publish what changed.
///
/// A failed merge is logged and never fails the operation.
fn write(store: &ApolloStore, cache_headers: &CacheHeaders, response: &Response) {
    let Some(records) = response.records.as_ref().filter(|records| !records.is_empty()) else {
        return;
    };
    match store.write_transaction(|transaction| transaction.merge(records.clone(), cache_headers))
    {
        Ok(changed_keys) => store.publish(changed_keys),
        Err(error) => tracing::error!("failed to write response to the normalized cache: {error}"),
    }
}
