//! The seam between the registry and the client library it manages.

use crate::connection_config::Params;
use async_trait::async_trait;
use serde_json::Value;

/// Builds client handles from connection parameters and options.
///
/// The registry calls `construct` at most once per connection name for cached
/// clients, and once per call for uncached ones. Construction may block on network
/// I/O; the registry does not impose timeouts or retries.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use redis_registry::connection_config::Params;
/// use redis_registry::factory::ClientFactory;
/// use serde_json::Value;
///
/// struct EchoFactory;
///
/// #[async_trait]
/// impl ClientFactory for EchoFactory {
///     type Client = Option<Params>;
///     type Error = std::io::Error;
///
///     async fn construct(
///         &self,
///         params: Option<&Params>,
///         _options: Option<&Value>,
///     ) -> Result<Self::Client, Self::Error> {
///         Ok(params.cloned())
///     }
/// }
/// ```
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// The client handle produced by this factory.
    type Client: Send + Sync;

    /// The error returned when a client cannot be built.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Checks, once at registry start-up, that the client library can be used.
    fn ensure_available(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Build a new client.
    ///
    /// # Arguments
    ///
    /// * `params` - Where to connect. `None` selects the library's default target.
    /// * `options` - How the client should behave. `None` selects the library defaults.
    ///
    /// # Returns
    ///
    /// A new, independent client handle.
    async fn construct(
        &self,
        params: Option<&Params>,
        options: Option<&Value>,
    ) -> Result<Self::Client, Self::Error>;
}
