//! Turns the raw HTTP response into a GraphQL response and its records.

use std::task::Poll;

use bytes::Bytes;
use futures::future::BoxFuture;
use tower::Service;

use super::BoxService;
use super::Request;
use super::Response;
use crate::cache::record::Record;
use crate::cache::store::ApolloStore;
use crate::error::ApolloError;
use crate::graphql;
use crate::json_ext::Value;
use crate::operation::Operation;

pub(crate) struct ParseService {
    store: ApolloStore,
    inner: BoxService,
}

impl ParseService {
    pub(crate) fn new(store: ApolloStore, inner: BoxService) -> Self {
        Self { store, inner }
    }
}

impl Service<Request> for ParseService {
    type Response = Response;
    type Error = ApolloError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let operation = request.operation.clone();
        let store = self.store.clone();
        let response = self.inner.call(request);

        Box::pin(async move {
            let response = response.await?;
            let http_response = match response.http_response {
                Some(http_response) => http_response,
                // answered below without going to the network
                None => return Ok(response),
            };
            let (response, records) = parse(&store, &operation, &http_response)?;
            Ok(Response::new(
                Some(http_response),
                Some(response),
                Some(records),
            ))
        })
    }
}

fn parse(
    store: &ApolloStore,
    operation: &Operation,
    http_response: &http::Response<Bytes>,
) -> Result<(graphql::Response, Vec<Record>), ApolloError> {
    let status = http_response.status();
    if !status.is_success() {
        return Err(ApolloError::Http {
            status,
            body: http_response.body().clone(),
        });
    }

    let mut response = graphql::Response::from_bytes(http_response.body())?;
    let records = match &response.data {
        Some(Value::Object(data)) => {
            let normalized = store
                .normalize_response(operation, data)
                .map_err(ApolloError::parse)?;
            response.dependent_keys = normalized.dependent_keys.clone();
            normalized.into_records()
        }
        _ => Vec::new(),
    };
    Ok((response, records))
}
