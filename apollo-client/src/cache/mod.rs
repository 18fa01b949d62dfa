//! The normalized cache: records, their storage, and the store coordinating reads, writes and
//! change notifications.

pub mod headers;
pub mod http;
pub mod key_resolver;
pub(crate) mod normalizer;
pub(crate) mod reader;
pub mod record;
pub mod storage;
pub mod store;

use serde::Deserialize;
use serde::Serialize;

/// How a call combines the normalized cache with the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControl {
    /// Serve from the cache only. A miss is returned as a response without data.
    CacheOnly,
    /// Serve from the cache when every field is present, otherwise go to the network.
    #[default]
    CacheFirst,
    /// Go to the network, fall back to the cache when the request fails.
    NetworkFirst,
    /// Go to the network only. The response is still written to the cache.
    NetworkOnly,
    /// Go to the network, letting an HTTP cache layer serve stale data first.
    NetworkBeforeStale,
    /// Let an HTTP cache layer serve the response and evict it once read.
    ExpireAfterRead,
}

impl CacheControl {
    /// Whether the cache is read before going to the network.
    pub(crate) fn reads_cache_first(&self) -> bool {
        matches!(self, CacheControl::CacheOnly | CacheControl::CacheFirst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names() {
        let controls: Vec<CacheControl> = serde_yaml::from_str(
            "[cache_only, cache_first, network_first, network_only, network_before_stale, expire_after_read]",
        )
        .unwrap();
        assert_eq!(
            controls,
            vec![
                CacheControl::CacheOnly,
                CacheControl::CacheFirst,
                CacheControl::NetworkFirst,
                CacheControl::NetworkOnly,
                CacheControl::NetworkBeforeStale,
                CacheControl::ExpireAfterRead,
            ]
        );
        assert_eq!(CacheControl::default(), CacheControl::CacheFirst);
    }
}
