//! A GraphQL client with a normalized cache.
//!
//! Operations go through a chain of interceptors: the application's, then the cache, parse and
//! server stages. Responses are flattened into records keyed by entity identity, so that every
//! query reading an entity sees the latest version of it, and watchers are re-run when the
//! records they depend on change.

#![warn(unreachable_pub)]

pub mod json_ext;

pub mod cache;
pub mod call;
mod client;
pub mod configuration;
pub mod error;
pub mod graphql;
pub mod operation;
pub mod services;
pub mod spec;

pub use cache::CacheControl;
pub use cache::store::ApolloStore;
pub use call::ApolloCall;
pub use call::ApolloCallback;
pub use call::ExecutionState;
pub use call::QueryWatcher;
pub use client::ApolloClient;
pub use client::ApolloClientBuilder;
pub use configuration::Configuration;
pub use error::ApolloError;
pub use operation::Operation;
pub use operation::OperationKind;
pub use operation::OperationName;
pub use services::ApolloInterceptor;
