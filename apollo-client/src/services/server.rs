//! The last stage: sends the operation to the server.

use std::sync::Arc;
use std::task::Poll;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::HeaderValue;
use http::header::ACCEPT;
use http::header::CONTENT_TYPE;
use md5::Digest;
use md5::Md5;
use serde_json_bytes::ByteString;
use tower::Service;
use tower::ServiceExt;
use url::Url;

use super::Request;
use super::Response;
use super::http::HttpClientFactory;
use crate::cache::http::HttpCachePolicy;
use crate::error::ApolloError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::operation::Operation;

const APPLICATION_JSON: HeaderValue = HeaderValue::from_static("application/json");

#[derive(Clone)]
pub(crate) struct ServerService {
    http_client: Arc<dyn HttpClientFactory>,
    server_url: Url,
    send_operation_identifiers: bool,
}

impl ServerService {
    pub(crate) fn new(
        http_client: Arc<dyn HttpClientFactory>,
        server_url: Url,
        send_operation_identifiers: bool,
    ) -> Self {
        Self {
            http_client,
            server_url,
            send_operation_identifiers,
        }
    }

    fn http_request(&self, request: &Request) -> Result<http::Request<Bytes>, ApolloError> {
        let body = request_body(&request.operation, self.send_operation_identifiers)?;

        let mut http_request = http::Request::builder()
            .method(http::Method::POST)
            .uri(self.server_url.as_str())
            .header(ACCEPT, APPLICATION_JSON)
            .header(CONTENT_TYPE, APPLICATION_JSON)
            .body(Bytes::new())
            .map_err(|error| ApolloError::network(format!("invalid request: {error}")))?;

        let http_cache_policy = request
            .http_cache_policy
            .clone()
            .or_else(|| HttpCachePolicy::derived_from(request.cache_control));
        if let Some(policy) = http_cache_policy.filter(|_| request.operation.is_query()) {
            policy
                .apply(&cache_key(&body), http_request.headers_mut())
                .map_err(|error| ApolloError::network(format!("invalid request: {error}")))?;
        }

        *http_request.body_mut() = body;
        Ok(http_request)
    }
}

/// `{"query": ..., "variables": ...}`, or `{"id": ..., "variables": ...}` when sending operation
/// identifiers.
pub(crate) fn request_body(
    operation: &Operation,
    send_operation_identifiers: bool,
) -> Result<Bytes, ApolloError> {
    let mut body = Object::new();
    if send_operation_identifiers {
        body.insert("id", Value::String(operation.operation_id().into()));
    } else {
        let query: String = operation
            .document()
            .chars()
            .filter(|c| *c != '\n')
            .collect();
        body.insert("query", Value::String(ByteString::from(query)));
    }
    body.insert("variables", Value::Object(operation.variables().clone()));

    serde_json::to_vec(&body)
        .map(Bytes::from)
        .map_err(|error| ApolloError::network(format!("could not serialize request: {error}")))
}

/// Key under which an HTTP cache layer stores the response to a request body.
pub(crate) fn cache_key(body: &[u8]) -> String {
    hex::encode(Md5::digest(body))
}

impl Service<Request> for ServerService {
    type Response = Response;
    type Error = ApolloError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let http_request = self.http_request(&request);
        let http_client = self.http_client.create();
        let cancellation = request.cancellation.clone();

        Box::pin(async move {
            let http_request = http_request?;
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => Err(ApolloError::Canceled),
                result = http_client.oneshot(http_request) => {
                    let http_response = result.map_err(ApolloError::network)?;
                    Ok(Response::new(Some(http_response), None, None))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;
    use tower::BoxError;
    use tower::service_fn;

    use super::*;
    use crate::cache::CacheControl;
    use crate::operation::OperationKind;

    fn operation(kind: OperationKind) -> Arc<Operation> {
        Arc::new(
            Operation::builder()
                .kind(kind)
                .name("HeroName")
                .document("query HeroName($episode: Episode) {\n  hero(episode: $episode) {\n    name\n  }\n}")
                .operation_id("hero-name-id")
                .variables(json!({"episode": "JEDI"}).as_object().cloned().unwrap())
                .selections(vec![])
                .build(),
        )
    }

    fn url() -> Url {
        Url::parse("http://localhost:4000/graphql").unwrap()
    }

    #[test]
    fn query_body() {
        let body = request_body(&operation(OperationKind::Query), false).unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            r#"{"query":"query HeroName($episode: Episode) {  hero(episode: $episode) {    name  }}","variables":{"episode":"JEDI"}}"#
        );
    }

    #[test]
    fn operation_identifier_body() {
        let body = request_body(&operation(OperationKind::Query), true).unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            r#"{"id":"hero-name-id","variables":{"episode":"JEDI"}}"#
        );
    }

    #[test]
    fn empty_variables_are_sent() {
        let operation = Operation::builder()
            .name("Version")
            .document("{ version }")
            .selections(vec![])
            .build();
        let body = request_body(&operation, false).unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            r#"{"query":"{ version }","variables":{}}"#
        );
    }

    fn service<F>(f: F) -> ServerService
    where
        F: Fn(http::Request<Bytes>) -> http::Response<Bytes> + Clone + Send + Sync + 'static,
    {
        ServerService::new(
            Arc::new(service_fn(move |request: http::Request<Bytes>| {
                let f = f.clone();
                async move { Ok::<_, BoxError>(f(request)) }
            })),
            url(),
            false,
        )
    }

    #[test]
    fn headers() {
        let server = service(|_| http::Response::new(Bytes::new()));
        let request = Request::builder()
            .operation(operation(OperationKind::Query))
            .build();
        let http_request = server.http_request(&request).unwrap();

        assert_eq!(*http_request.method(), http::Method::POST);
        assert_eq!(http_request.uri(), "http://localhost:4000/graphql");
        assert_eq!(http_request.headers()[ACCEPT], "application/json");
        assert_eq!(http_request.headers()[CONTENT_TYPE], "application/json");
        assert!(!http_request.headers().contains_key("x-apollo-cache-key"));
    }

    #[test]
    fn http_cache_headers_for_queries() {
        let server = service(|_| http::Response::new(Bytes::new()));
        let request = Request::builder()
            .operation(operation(OperationKind::Query))
            .http_cache_policy(HttpCachePolicy::cache_first().expire_after(Duration::from_secs(1)))
            .build();
        let http_request = server.http_request(&request).unwrap();

        let headers = http_request.headers();
        assert_eq!(
            headers["x-apollo-cache-key"],
            cache_key(http_request.body()).as_str()
        );
        assert_eq!(headers["x-apollo-cache-fetch-strategy"], "CACHE_FIRST");
        assert_eq!(headers["x-apollo-expire-timeout"], "1000");

        let request = Request::builder()
            .operation(operation(OperationKind::Query))
            .cache_control(CacheControl::ExpireAfterRead)
            .build();
        let http_request = server.http_request(&request).unwrap();
        assert_eq!(http_request.headers()["x-apollo-expire-after-read"], "true");

        let request = Request::builder()
            .operation(operation(OperationKind::Mutation))
            .cache_control(CacheControl::NetworkBeforeStale)
            .build();
        let http_request = server.http_request(&request).unwrap();
        assert!(!http_request.headers().contains_key("x-apollo-cache-key"));
    }

    #[tokio::test]
    async fn executes_through_the_transport() {
        let server = service(|request| {
            assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
            http::Response::new(Bytes::from_static(br#"{"data":{}}"#))
        });
        let request = Request::builder()
            .operation(operation(OperationKind::Query))
            .build();

        let response = server.oneshot(request).await.unwrap();
        assert_eq!(
            response.http_response.unwrap().body(),
            &Bytes::from_static(br#"{"data":{}}"#)
        );
        assert!(response.response.is_none());
    }

    #[tokio::test]
    async fn transport_failures_are_network_errors() {
        let server = ServerService::new(
            Arc::new(service_fn(|_: http::Request<Bytes>| async {
                Err::<http::Response<Bytes>, BoxError>("connection refused".into())
            })),
            url(),
            false,
        );
        let request = Request::builder()
            .operation(operation(OperationKind::Query))
            .build();

        let error = server.oneshot(request).await.unwrap_err();
        assert_eq!(
            error,
            ApolloError::Network {
                reason: "connection refused".to_string()
            }
        );
    }

    #[tokio::test]
    async fn cancellation_drops_the_request() {
        let server = ServerService::new(
            Arc::new(service_fn(|_: http::Request<Bytes>| async {
                futures::future::pending::<Result<http::Response<Bytes>, BoxError>>().await
            })),
            url(),
            false,
        );
        let cancellation = tokio_util::sync::CancellationToken::new();
        let request = Request::builder()
            .operation(operation(OperationKind::Query))
            .cancellation(cancellation.clone())
            .build();

        let handle = tokio::spawn(server.oneshot(request));
        cancellation.cancel();
        assert_eq!(handle.await.unwrap().unwrap_err(), ApolloError::Canceled);
    }
}
