//! Directives for an HTTP cache layer sitting below the client.
//!
//! The client does not cache raw responses itself: it only tags queries with headers an HTTP
//! caching layer of the transport can act upon.

use std::time::Duration;

use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;

use crate::cache::CacheControl;

pub const CACHE_KEY_HEADER: HeaderName = HeaderName::from_static("x-apollo-cache-key");
pub const CACHE_FETCH_STRATEGY_HEADER: HeaderName =
    HeaderName::from_static("x-apollo-cache-fetch-strategy");
pub const CACHE_EXPIRE_TIMEOUT_HEADER: HeaderName =
    HeaderName::from_static("x-apollo-expire-timeout");
pub const CACHE_EXPIRE_AFTER_READ_HEADER: HeaderName =
    HeaderName::from_static("x-apollo-expire-after-read");
pub const CACHE_PREFETCH_HEADER: HeaderName = HeaderName::from_static("x-apollo-prefetch");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    CacheOnly,
    NetworkOnly,
    CacheFirst,
    NetworkFirst,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStrategy::CacheOnly => "CACHE_ONLY",
            FetchStrategy::NetworkOnly => "NETWORK_ONLY",
            FetchStrategy::CacheFirst => "CACHE_FIRST",
            FetchStrategy::NetworkFirst => "NETWORK_FIRST",
        }
    }
}

/// How the HTTP cache layer should serve a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCachePolicy {
    pub fetch_strategy: FetchStrategy,
    /// How long a cached response stays fresh. Unbounded when absent.
    pub expire_timeout: Option<Duration>,
    /// Drop the cached response once it has been served.
    pub expire_after_read: bool,
}

impl HttpCachePolicy {
    pub fn new(fetch_strategy: FetchStrategy) -> Self {
        Self {
            fetch_strategy,
            expire_timeout: None,
            expire_after_read: false,
        }
    }

    pub fn cache_only() -> Self {
        Self::new(FetchStrategy::CacheOnly)
    }

    pub fn network_only() -> Self {
        Self::new(FetchStrategy::NetworkOnly)
    }

    pub fn cache_first() -> Self {
        Self::new(FetchStrategy::CacheFirst)
    }

    pub fn network_first() -> Self {
        Self::new(FetchStrategy::NetworkFirst)
    }

    pub fn expire_after(mut self, timeout: Duration) -> Self {
        self.expire_timeout = Some(timeout);
        self
    }

    pub fn expire_after_read(mut self) -> Self {
        self.expire_after_read = true;
        self
    }

    /// The policy implied by a cache control when none was set explicitly.
    pub(crate) fn derived_from(cache_control: CacheControl) -> Option<Self> {
        match cache_control {
            CacheControl::NetworkBeforeStale => Some(Self::network_first()),
            CacheControl::ExpireAfterRead => Some(Self::cache_first().expire_after_read()),
            _ => None,
        }
    }

    /// Tag a request whose body hashes to `cache_key`.
    pub(crate) fn apply(
        &self,
        cache_key: &str,
        headers: &mut HeaderMap,
    ) -> Result<(), http::Error> {
        let expire_timeout = self
            .expire_timeout
            .map(|timeout| timeout.as_millis())
            .unwrap_or_default();
        headers.insert(CACHE_KEY_HEADER, HeaderValue::from_str(cache_key)?);
        headers.insert(
            CACHE_FETCH_STRATEGY_HEADER,
            HeaderValue::from_static(self.fetch_strategy.as_str()),
        );
        headers.insert(
            CACHE_EXPIRE_TIMEOUT_HEADER,
            HeaderValue::from_str(&expire_timeout.to_string())?,
        );
        headers.insert(
            CACHE_EXPIRE_AFTER_READ_HEADER,
            HeaderValue::from_static(if self.expire_after_read {
                "true"
            } else {
                "false"
            }),
        );
        headers.insert(CACHE_PREFETCH_HEADER, HeaderValue::from_static("false"));
        Ok(())
    }
}
