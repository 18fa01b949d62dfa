//! Client errors.
use bytes::Bytes;
use displaydoc::Display;
use http::StatusCode;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;

/// Error types for operation execution.
///
/// Every execution ends with either a response or exactly one of these.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum ApolloError {
    /// network request failed: {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    Network {
        /// The reason the request failed.
        reason: String,
    },

    /// HTTP request failed with status {status}
    Http {
        /// Status of the non-2xx response.
        status: StatusCode,
        /// Raw body of the response, kept for diagnostics.
        body: Bytes,
    },

    /// response was malformed: {reason}
    Parse {
        /// The reason the response could not be parsed.
        reason: String,
    },

    /// operation was canceled
    Canceled,

    /// interceptor failed: {reason}
    Interceptor {
        /// The reason the interceptor failed.
        reason: String,
    },
}

impl ApolloError {
    pub(crate) fn network(error: impl std::fmt::Display) -> Self {
        ApolloError::Network {
            reason: error.to_string(),
        }
    }

    pub(crate) fn parse(error: impl std::fmt::Display) -> Self {
        ApolloError::Parse {
            reason: error.to_string(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ApolloError::Canceled)
    }
}

/// Errors raised by a normalized cache backend.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheError {
    /// record '{key}' could not be stored: {reason}
    Store { key: String, reason: String },

    /// could not normalize response: {0}
    Normalization(String),
}

/// Errors raised while building an [`ApolloClient`](crate::ApolloClient).
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum ClientBuildError {
    /// a tokio runtime is required: call `dispatcher()` or build the client inside a runtime
    NoDispatcher,

    /// a configuration is required
    MissingConfiguration,

    /// could not create the HTTP client: {0}
    HttpClient(String),

    /// invalid configuration: {0}
    Configuration(#[from] ConfigurationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ApolloError::Network {
                reason: "connection refused".to_string()
            }
            .to_string(),
            "network request failed: connection refused"
        );
        assert_eq!(
            ApolloError::Http {
                status: StatusCode::NOT_FOUND,
                body: Bytes::from_static(b"nope"),
            }
            .to_string(),
            "HTTP request failed with status 404 Not Found"
        );
        assert_eq!(ApolloError::Canceled.to_string(), "operation was canceled");
    }
}
