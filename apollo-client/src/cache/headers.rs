use std::collections::HashMap;
use std::sync::Arc;

/// Skip writing the response to the normalized cache.
pub const DO_NOT_STORE: &str = "do-not-store";

/// Remove the records read by an operation once it has been served from the cache.
pub const EVICT_AFTER_READ: &str = "evict-after-read";

/// Directives passed down to the normalized cache along with an operation.
///
/// Headers never change the operation itself, only how the cache treats it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheHeaders {
    headers: Arc<HashMap<String, String>>,
}

impl CacheHeaders {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn builder() -> CacheHeadersBuilder {
        CacheHeadersBuilder::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// A directive is on when it is present with any value other than `false`.
    pub(crate) fn is_enabled(&self, name: &str) -> bool {
        self.header(name)
            .is_some_and(|value| !value.eq_ignore_ascii_case("false"))
    }

    pub(crate) fn do_not_store(&self) -> bool {
        self.is_enabled(DO_NOT_STORE)
    }

    pub(crate) fn evict_after_read(&self) -> bool {
        self.is_enabled(EVICT_AFTER_READ)
    }

    /// Start a builder holding a copy of these headers.
    pub fn to_builder(&self) -> CacheHeadersBuilder {
        CacheHeadersBuilder {
            headers: (*self.headers).clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheHeadersBuilder {
    headers: HashMap<String, String>,
}

impl CacheHeadersBuilder {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> CacheHeaders {
        CacheHeaders {
            headers: Arc::new(self.headers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives() {
        let headers = CacheHeaders::builder()
            .header(DO_NOT_STORE, "true")
            .header(EVICT_AFTER_READ, "false")
            .build();
        assert!(headers.do_not_store());
        assert!(!headers.evict_after_read());
        assert!(headers.has_header(EVICT_AFTER_READ));
        assert!(!CacheHeaders::none().do_not_store());
    }

    #[test]
    fn to_builder_copies() {
        let headers = CacheHeaders::builder().header("a", "1").build();
        let extended = headers.to_builder().header(DO_NOT_STORE, "true").build();
        assert!(!headers.do_not_store());
        assert!(extended.do_not_store());
        assert_eq!(extended.header("a"), Some("1"));
    }
}
