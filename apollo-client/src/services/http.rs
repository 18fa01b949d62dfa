//! The transport seam: how requests reach the server.

use std::task::Poll;

use bytes::Bytes;
use futures::future::BoxFuture;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;

use crate::error::ClientBuildError;

pub type HttpRequest = http::Request<Bytes>;
pub type HttpResponse = http::Response<Bytes>;

pub type HttpClientService = tower::util::BoxService<HttpRequest, HttpResponse, BoxError>;

/// Creates the transport service executing one request.
pub trait HttpClientFactory: Send + Sync + 'static {
    fn create(&self) -> HttpClientService;
}

impl<S> HttpClientFactory for S
where
    S: Service<HttpRequest, Response = HttpResponse, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    <S as Service<HttpRequest>>::Future: Send,
{
    fn create(&self) -> HttpClientService {
        self.clone().boxed()
    }
}

/// The default transport, backed by reqwest.
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, ClientBuildError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| ClientBuildError::HttpClient(error.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Service<HttpRequest> for ReqwestHttpClient {
    type Response = HttpResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: HttpRequest) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move {
            let request = reqwest::Request::try_from(request)?;
            let response = client.execute(request).await?;

            let mut builder = http::Response::builder()
                .status(response.status())
                .version(response.version());
            if let Some(headers) = builder.headers_mut() {
                headers.extend(
                    response
                        .headers()
                        .iter()
                        .map(|(name, value)| (name.clone(), value.clone())),
                );
            }
            let body = response.bytes().await?;
            Ok::<_, BoxError>(builder.body(body)?)
        })
    }
}
