//! Connection configurations for the client registry.
//!
//! This module provides the `ConnectionConfigSet` type, a read-only mapping from a
//! connection name to the `ConnectionConfig` used to build a client for that name.
//! Configurations are plain data: the endpoint description (`params`) and the client
//! behaviour description (`options`) are handed to a `ClientFactory` untouched.
//!
//! # Configuration Sources
//!
//! - **Direct Configuration**: Build the set in code with `with_connection`
//! - **JSON**: Parse a JSON object with `from_json_str`
//! - **Environment Variables**: Read that JSON object from `REDIS_CONNECTIONS`
//!
//! # Examples
//!
//! ## Direct Configuration
//!
//! ```rust
//! use redis_registry::connection_config::{ConnectionConfig, ConnectionConfigSet, Params};
//!
//! let connections = ConnectionConfigSet::default().with_connection(
//!     "cache",
//!     ConnectionConfig::with_params(Params::from("tcp://10.0.0.1:6379")),
//! );
//! assert!(connections.contains("cache"));
//! ```
//!
//! ## JSON Configuration
//!
//! ```rust
//! use redis_registry::connection_config::ConnectionConfigSet;
//!
//! let connections = ConnectionConfigSet::from_json_str(
//!     r#"{
//!         "multi": {
//!             "params": [
//!                 { "host": "10.0.0.1", "port": 6379 },
//!                 { "host": "10.0.0.2", "port": 6379 }
//!             ]
//!         }
//!     }"#,
//! )?;
//! assert_eq!(connections.len(), 1);
//! # Ok::<(), redis_registry::connection_config::Error>(())
//! ```

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Name of the connection used when the caller does not pick one.
pub const DEFAULT_CONNECTION: &str = "default";

/// Environment variable read by `ConnectionConfigSet::from_env`.
pub const CONNECTIONS_ENV: &str = "REDIS_CONNECTIONS";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Environment variable is not usable: {1}")]
    EnvVar(std::env::VarError, String),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A single connection target.
///
/// Either a connection URI such as `tcp://10.0.0.1:6379`, or a map of connection
/// parameters such as `{"host": "10.0.0.1", "port": 6379}`. The registry never looks
/// inside an endpoint; interpretation belongs to the factory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Uri(String),
    Parameters(Map<String, Value>),
}

impl From<&str> for Endpoint {
    fn from(uri: &str) -> Self {
        Endpoint::Uri(uri.to_string())
    }
}

impl From<String> for Endpoint {
    fn from(uri: String) -> Self {
        Endpoint::Uri(uri)
    }
}

impl From<Map<String, Value>> for Endpoint {
    fn from(parameters: Map<String, Value>) -> Self {
        Endpoint::Parameters(parameters)
    }
}

/// The connection target part of a configuration.
///
/// A sequence of endpoints keeps its order all the way to the factory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Single(Endpoint),
    Multiple(Vec<Endpoint>),
}

impl Params {
    /// Returns the endpoints in configuration order.
    pub fn endpoints(&self) -> Vec<&Endpoint> {
        match self {
            Params::Single(endpoint) => vec![endpoint],
            Params::Multiple(endpoints) => endpoints.iter().collect(),
        }
    }
}

impl From<Endpoint> for Params {
    fn from(endpoint: Endpoint) -> Self {
        Params::Single(endpoint)
    }
}

impl From<&str> for Params {
    fn from(uri: &str) -> Self {
        Params::Single(uri.into())
    }
}

impl From<String> for Params {
    fn from(uri: String) -> Self {
        Params::Single(uri.into())
    }
}

impl From<Vec<Endpoint>> for Params {
    fn from(endpoints: Vec<Endpoint>) -> Self {
        Params::Multiple(endpoints)
    }
}

/// Configuration for one named connection.
///
/// Both fields are optional. A missing field means "use the factory's defaults".
///
/// # Fields
///
/// - `params`: Where to connect, a single endpoint or an ordered list of endpoints
/// - `options`: How the client should behave; an opaque JSON value. Older
///   configuration files spell this field `config`, which is accepted as well.
///   When an entry carries both, `options` wins and `config` is ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawConnectionConfig")]
pub struct ConnectionConfig {
    pub params: Option<Params>,
    pub options: Option<Value>,
}

// Accepts both spellings of the options field.
#[derive(Deserialize)]
struct RawConnectionConfig {
    #[serde(default)]
    params: Option<Params>,
    #[serde(default)]
    options: Option<Value>,
    #[serde(default)]
    config: Option<Value>,
}

impl From<RawConnectionConfig> for ConnectionConfig {
    fn from(raw: RawConnectionConfig) -> Self {
        if raw.options.is_some() && raw.config.is_some() {
            debug!("Both options and config are set, ignoring config");
        }
        Self {
            params: raw.params,
            options: raw.options.or(raw.config),
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration with only connection parameters.
    pub fn with_params(params: impl Into<Params>) -> Self {
        Self {
            params: Some(params.into()),
            options: None,
        }
    }

    /// Set the client options of this configuration.
    pub fn options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// The set of named connection configurations known to a registry.
///
/// Connection names are unique. The set may be empty, in which case only the
/// `default` connection can be resolved, using the factory's defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionConfigSet {
    connections: HashMap<String, ConnectionConfig>,
}

impl ConnectionConfigSet {
    /// Add or replace the configuration for `name`.
    ///
    /// # Arguments
    ///
    /// * `name` - The connection name.
    /// * `config` - The configuration used to build clients for `name`.
    ///
    /// # Returns
    ///
    /// The set, with the connection added.
    pub fn with_connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), config);
        self
    }

    /// Parse a set from a JSON object keyed by connection name.
    ///
    /// # Arguments
    ///
    /// * `json` - A JSON object, e.g. `{"default": {"params": "tcp://127.0.0.1"}}`.
    ///
    /// # Returns
    ///
    /// The parsed set, or `Error::Serde` if the document is not a valid set.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let connections: Self = serde_json::from_str(json)?;
        trace!("parsed {} connection configuration(s)", connections.len());
        Ok(connections)
    }

    /// Create a set from the `REDIS_CONNECTIONS` environment variable.
    ///
    /// An unset variable yields an empty set.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_env_var(CONNECTIONS_ENV)
    }

    /// Create a set from the JSON held by the environment variable `key`.
    ///
    /// # Arguments
    ///
    /// * `key` - Name of the environment variable.
    ///
    /// # Returns
    ///
    /// The parsed set. An unset variable yields an empty set; a variable that is not
    /// valid unicode yields `Error::EnvVar`.
    pub fn from_env_var(key: &str) -> Result<Self, Error> {
        match std::env::var(key) {
            Ok(json) => {
                debug!("Loading connection configurations from {}", key);
                Self::from_json_str(&json)
            }
            Err(std::env::VarError::NotPresent) => {
                debug!("{} is not set, using an empty connection set", key);
                Ok(Self::default())
            }
            Err(e) => Err(Error::EnvVar(e, key.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl FromIterator<(String, ConnectionConfig)> for ConnectionConfigSet {
    fn from_iter<I: IntoIterator<Item = (String, ConnectionConfig)>>(iter: I) -> Self {
        Self {
            connections: iter.into_iter().collect(),
        }
    }
}
