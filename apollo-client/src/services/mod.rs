//! The stages an operation goes through: application interceptors, then the cache, parse and
//! server stages.
//!
//! Every stage is a tower service over [`Request`] and [`Response`]. An interceptor wraps the rest
//! of the chain and can short-circuit it or delegate to it.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheControl;
use crate::cache::headers::CacheHeaders;
use crate::cache::http::HttpCachePolicy;
use crate::cache::record::Record;
use crate::error::ApolloError;
use crate::graphql;
use crate::operation::Operation;

pub(crate) mod cache;
pub mod chain;
pub mod http;
pub(crate) mod parse;
pub(crate) mod server;

pub use chain::ApolloInterceptor;
pub use http::HttpClientFactory;
pub use http::HttpClientService;
pub use http::ReqwestHttpClient;

pub type BoxService = tower::util::BoxService<Request, Response, ApolloError>;
pub type ServiceResult = Result<Response, ApolloError>;

/// An operation going down the chain, along with how it should be served.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Request {
    pub operation: Arc<Operation>,
    pub cache_control: CacheControl,
    pub cache_headers: CacheHeaders,
    pub http_cache_policy: Option<HttpCachePolicy>,
    /// Canceled when the call owning the chain is canceled.
    pub cancellation: CancellationToken,
}

#[buildstructor::buildstructor]
impl Request {
    /// This is the constructor (or builder) to use when constructing a real Request.
    ///
    /// Omitted values default to the cache-first control, no headers and no HTTP cache policy.
    #[builder(visibility = "pub")]
    fn new(
        operation: Arc<Operation>,
        cache_control: Option<CacheControl>,
        cache_headers: Option<CacheHeaders>,
        http_cache_policy: Option<HttpCachePolicy>,
        cancellation: Option<CancellationToken>,
    ) -> Self {
        Self {
            operation,
            cache_control: cache_control.unwrap_or_default(),
            cache_headers: cache_headers.unwrap_or_default(),
            http_cache_policy,
            cancellation: cancellation.unwrap_or_default(),
        }
    }
}

/// What came back up the chain.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct Response {
    /// The raw HTTP response, when the operation went to the network.
    pub http_response: Option<::http::Response<Bytes>>,
    /// The parsed response.
    pub response: Option<graphql::Response>,
    /// Records parsed from the network response, or read to serve it from the cache.
    pub records: Option<Vec<Record>>,
}

impl Response {
    pub fn new(
        http_response: Option<::http::Response<Bytes>>,
        response: Option<graphql::Response>,
        records: Option<Vec<Record>>,
    ) -> Self {
        Self {
            http_response,
            response,
            records,
        }
    }

    pub(crate) fn from_cache(response: graphql::Response, records: Option<Vec<Record>>) -> Self {
        Self {
            http_response: None,
            response: Some(response),
            records,
        }
    }
}
