//! # Redis client registry
//!
//! A `ClientRegistry` hands out Redis clients by connection name. Each name maps to a
//! `ConnectionConfig` in a `ConnectionConfigSet`; the client for a name is built the
//! first time it is requested and the same handle is returned from then on.
//!
//! Clients are built by a `ClientFactory`. `RedisFactory` builds clients with the
//! `redis` crate; any other factory can be plugged in.
//!
//! ```rust,no_run
//! use redis_registry::ClientRegistry;
//! use redis_registry::connection_config::ConnectionConfigSet;
//! use redis_registry::redis_client::RedisFactory;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let connections = ConnectionConfigSet::from_env()?;
//! let registry = ClientRegistry::initialize(RedisFactory, Some(connections))?;
//!
//! let client = registry.get_default_client().await?;
//! let mut connection = client.get_multiplexed_async_connection().await?;
//! # Ok(())
//! # }
//! ```

use async_std::sync::RwLock;
use connection_config::{ConnectionConfigSet, DEFAULT_CONNECTION, Params};
use factory::ClientFactory;
use log::{debug, trace};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub mod connection_config;
pub mod factory;
pub mod redis_client;

pub use connection_config::{ConnectionConfig, Endpoint};
pub use redis_client::{RedisClient, RedisFactory};

/// Different types of errors that can occur when using the registry.
///
/// `E` is the error type of the registry's `ClientFactory`. Factory errors are
/// carried unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error<E: std::error::Error + 'static> {
    #[error("Connection configuration not found: {0}")]
    ConfigurationNotFound(String),
    #[error("Client library unavailable: {0}")]
    LibraryUnavailable(#[source] E),
    #[error("Client construction failed: {0}")]
    Factory(#[source] E),
}

/// Named clients, built on first use and shared afterwards.
///
/// At most one cached client exists per connection name. Cached clients are never
/// replaced or evicted; they live as long as the registry. Failed constructions are
/// not cached.
///
/// The registry is meant to be created once at start-up and shared, e.g. in an
/// `Arc`, with the code that needs clients.
pub struct ClientRegistry<F: ClientFactory> {
    factory: F,
    connections: ConnectionConfigSet,
    clients: RwLock<HashMap<String, Arc<F::Client>>>,
}

impl<F: ClientFactory> ClientRegistry<F> {
    /// Create a new registry.
    ///
    /// No client is built here.
    ///
    /// # Arguments
    ///
    /// * `factory` - The factory used to build clients.
    /// * `connections` - The named connection configurations. `None` behaves like an
    ///   empty set: only the `default` connection resolves, with factory defaults.
    ///
    /// # Returns
    ///
    /// A new registry, or `Error::LibraryUnavailable` if the factory reports that
    /// its client library cannot be used.
    pub fn initialize(
        factory: F,
        connections: Option<ConnectionConfigSet>,
    ) -> Result<Self, Error<F::Error>> {
        factory
            .ensure_available()
            .map_err(Error::LibraryUnavailable)?;

        let connections = connections.unwrap_or_default();
        debug!(
            "Initialized client registry with {} connection configuration(s)",
            connections.len()
        );

        Ok(Self {
            factory,
            connections,
            clients: RwLock::new(HashMap::new()),
        })
    }

    /// Get the client for a connection name.
    ///
    /// # Arguments
    ///
    /// * `name` - The connection name to get the client for.
    ///
    /// # Returns
    ///
    /// The cached client for `name`, building and caching it first if needed.
    ///
    /// The cache is checked under a read lock. On a miss the write lock is taken, the
    /// cache is checked again, and the client is built while the write lock is held, so
    /// concurrent first requests for a name produce a single factory call. While a
    /// client is being built, every other caller waits, including callers whose client
    /// is already cached, so a slow factory delays the whole registry.
    ///
    /// Fails with `Error::ConfigurationNotFound` when `name` is neither configured nor
    /// `default`, and with `Error::Factory` when the factory fails. Nothing is cached
    /// in either case.
    pub async fn get_client(&self, name: &str) -> Result<Arc<F::Client>, Error<F::Error>> {
        if let Some(client) = self.clients.read().await.get(name) {
            trace!("Client cache hit for connection {}", name);
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(name) {
            trace!("Client for connection {} was built while waiting", name);
            return Ok(client.clone());
        }

        let client = Arc::new(self.construct(name).await?);
        clients.insert(name.to_string(), client.clone());
        debug!("Cached client for connection {}", name);

        Ok(client)
    }

    /// Get the client for the `default` connection.
    pub async fn get_default_client(&self) -> Result<Arc<F::Client>, Error<F::Error>> {
        self.get_client(DEFAULT_CONNECTION).await
    }

    /// Create a new client for a connection name, bypassing the cache.
    ///
    /// Every call builds an independent client. The cached client for `name`, if any,
    /// is neither used nor changed.
    ///
    /// # Arguments
    ///
    /// * `name` - The connection name to create the client for.
    ///
    /// # Returns
    ///
    /// A new client, or the same errors as `get_client`.
    pub async fn create_client(&self, name: &str) -> Result<Arc<F::Client>, Error<F::Error>> {
        Ok(Arc::new(self.construct(name).await?))
    }

    /// Create a new client for the `default` connection, bypassing the cache.
    pub async fn create_default_client(&self) -> Result<Arc<F::Client>, Error<F::Error>> {
        self.create_client(DEFAULT_CONNECTION).await
    }

    /// Whether a client for `name` has been built and cached.
    pub async fn is_cached(&self, name: &str) -> bool {
        self.clients.read().await.contains_key(name)
    }

    /// Names of the connections that have a cached client.
    pub async fn cached_names(&self) -> Vec<String> {
        self.clients.read().await.keys().cloned().collect()
    }

    pub fn connections(&self) -> &ConnectionConfigSet {
        &self.connections
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    async fn construct(&self, name: &str) -> Result<F::Client, Error<F::Error>> {
        let (params, options) = self.resolve(name)?;
        trace!("Building client for connection {}", name);
        self.factory
            .construct(params, options)
            .await
            .map_err(Error::Factory)
    }

    fn resolve(&self, name: &str) -> Result<(Option<&Params>, Option<&Value>), Error<F::Error>> {
        match self.connections.get(name) {
            Some(config) => Ok((config.params.as_ref(), config.options.as_ref())),
            None if name == DEFAULT_CONNECTION => Ok((None, None)),
            None => Err(Error::ConfigurationNotFound(name.to_string())),
        }
    }
}
