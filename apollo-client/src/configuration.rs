//! Logic for loading configuration in to an object model
use std::str::FromStr;

use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::cache::CacheControl;
use crate::cache::storage::EvictionPolicy;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
    /// could not deserialize configuration: {0}
    DeserializeConfigError(serde_yaml::Error),
}

/// The configuration for the client.
///
/// Can be created through `serde::Deserialize` from various formats, with [`Configuration::builder`],
/// or from YAML with [`Configuration::from_yaml`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// GraphQL endpoint every operation is posted to.
    pub server_url: Url,

    /// Send the operation identifier instead of the query document.
    #[serde(default)]
    pub send_operation_identifiers: bool,

    /// Normalized cache options.
    #[serde(default)]
    pub cache: CacheConfiguration,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfiguration {
    /// Cache control used by calls that do not override it.
    pub default_control: CacheControl,

    /// Bound the normalized cache. The cache is unbounded when absent.
    pub eviction: Option<EvictionPolicy>,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(
        server_url: Url,
        send_operation_identifiers: Option<bool>,
        cache: Option<CacheConfiguration>,
    ) -> Self {
        Self {
            server_url,
            send_operation_identifiers: send_operation_identifiers.unwrap_or_default(),
            cache: cache.unwrap_or_default(),
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration =
            serde_yaml::from_str(yaml).map_err(ConfigurationError::DeserializeConfigError)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if !matches!(self.server_url.scheme(), "http" | "https") {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "server_url must use http or https",
                error: self.server_url.to_string(),
            });
        }
        if let Some(eviction) = &self.cache.eviction {
            if eviction.max_entries == 0 {
                return Err(ConfigurationError::InvalidConfiguration {
                    message: "cache.eviction.max_entries must be greater than 0",
                    error: "0".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_yaml(s)
    }
}
