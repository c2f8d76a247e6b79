//! # Redis clients for the registry
//!
//! This module provides `RedisFactory`, the `ClientFactory` that builds
//! `redis::Client` handles, and `RedisClient`, the handle it returns.
//!
//! Endpoints may be written the way older PHP configurations wrote them:
//!
//! - `tcp://10.0.0.1:6379` or a bare `10.0.0.1:6379` becomes `redis://10.0.0.1:6379`
//! - `tls://host` becomes `rediss://host:6379`
//! - `unix:/tmp/redis.sock` becomes `redis+unix:///tmp/redis.sock` (unix targets only)
//! - `{"host": "10.0.0.2", "port": 6380, "database": 2}` becomes `redis://10.0.0.2:6380/2`
//!
//! `database`, `password` and `username` are also read from a URI's query string.
//! No connection is made while building a client; the `redis` crate connects
//! when a connection is requested.

use crate::connection_config::{Endpoint, Params};
use crate::factory::ClientFactory;
use async_trait::async_trait;
use cfg_if::cfg_if;
use log::{debug, trace};
use serde_json::{Map, Value};
use url::Url;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6379;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Unsupported connection scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Invalid client options: {0}")]
    InvalidOptions(String),
    #[error("Endpoint list is empty")]
    NoEndpoints,
    #[error("Url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Client behaviour read from a connection's `options`.
///
/// `prefix` is applied by `RedisClient::prefixed`. Every other key is kept as-is in
/// `extra` for application code to interpret.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientOptions {
    pub prefix: Option<String>,
    pub extra: Map<String, Value>,
}

impl ClientOptions {
    fn from_value(value: Option<&Value>) -> Result<Self, Error> {
        let mut extra = match value {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(Error::InvalidOptions(format!(
                    "expected an object, got {}",
                    other
                )));
            }
        };
        let prefix = match extra.remove("prefix") {
            None | Some(Value::Null) => None,
            Some(Value::String(prefix)) => Some(prefix),
            Some(other) => {
                return Err(Error::InvalidOptions(format!(
                    "prefix must be a string, got {}",
                    other
                )));
            }
        };
        Ok(Self { prefix, extra })
    }
}

/// A Redis client built from one connection configuration.
///
/// Holds one `redis::Client` per configured endpoint, in configuration order. The
/// first endpoint is the primary one; connection helpers use it.
#[derive(Clone, Debug)]
pub struct RedisClient {
    // never empty
    endpoints: Vec<redis::Client>,
    options: ClientOptions,
}

impl RedisClient {
    pub fn endpoints(&self) -> &[redis::Client] {
        &self.endpoints
    }

    pub fn primary(&self) -> &redis::Client {
        &self.endpoints[0]
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns `key` with the configured prefix, if any, prepended.
    pub fn prefixed(&self, key: &str) -> String {
        match &self.options.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }

    /// Open a blocking connection to the primary endpoint.
    pub fn get_connection(&self) -> redis::RedisResult<redis::Connection> {
        self.primary().get_connection()
    }

    /// Open a multiplexed async connection to the primary endpoint.
    pub async fn get_multiplexed_async_connection(
        &self,
    ) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        self.primary().get_multiplexed_async_connection().await
    }
}

/// Builds `RedisClient`s with the `redis` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct RedisFactory;

#[async_trait]
impl ClientFactory for RedisFactory {
    type Client = RedisClient;
    type Error = Error;

    async fn construct(
        &self,
        params: Option<&Params>,
        options: Option<&Value>,
    ) -> Result<Self::Client, Self::Error> {
        let options = ClientOptions::from_value(options)?;
        let urls = match params {
            None => vec![parameters_url(&Map::new())?],
            Some(params) => params
                .endpoints()
                .into_iter()
                .map(endpoint_url)
                .collect::<Result<Vec<_>, _>>()?,
        };
        if urls.is_empty() {
            return Err(Error::NoEndpoints);
        }

        let endpoints = urls
            .iter()
            .map(|url| redis::Client::open(url.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Built redis client with {} endpoint(s)", endpoints.len());

        Ok(RedisClient { endpoints, options })
    }
}

/// Converts an endpoint into a connection URL accepted by `redis::Client::open`.
pub fn endpoint_url(endpoint: &Endpoint) -> Result<String, Error> {
    match endpoint {
        Endpoint::Uri(uri) => parameters_url(&uri_parameters(uri)?),
        Endpoint::Parameters(parameters) => parameters_url(parameters),
    }
}

fn uri_parameters(uri: &str) -> Result<Map<String, Value>, Error> {
    let uri = if uri.contains("://") || uri.starts_with("unix:") {
        uri.to_string()
    } else {
        format!("tcp://{}", uri)
    };
    let url = Url::parse(&uri).map_err(|e| Error::InvalidEndpoint(format!("{}: {}", uri, e)))?;

    let mut parameters = Map::new();
    parameters.insert("scheme".to_string(), url.scheme().into());
    match url.scheme() {
        "unix" | "redis+unix" => {
            parameters.insert("path".to_string(), url.path().into());
        }
        _ => {
            if let Some(host) = url.host_str() {
                parameters.insert("host".to_string(), host.into());
            }
            if let Some(port) = url.port() {
                parameters.insert("port".to_string(), port.into());
            }
            if !url.username().is_empty() {
                parameters.insert("username".to_string(), url.username().into());
            }
            if let Some(password) = url.password() {
                parameters.insert("password".to_string(), password.into());
            }
            let database = url.path().trim_start_matches('/');
            if !database.is_empty() {
                parameters.insert("database".to_string(), database.into());
            }
        }
    }

    for (key, value) in url.query_pairs() {
        let key = match key.as_ref() {
            "db" | "database" => "database",
            "pass" | "password" => "password",
            "user" | "username" => "username",
            other => {
                trace!("Ignoring endpoint parameter {}", other);
                continue;
            }
        };
        parameters.insert(key.to_string(), Value::String(value.into_owned()));
    }
    Ok(parameters)
}

fn parameters_url(parameters: &Map<String, Value>) -> Result<String, Error> {
    match string_param(parameters, "scheme")?.unwrap_or("tcp") {
        "tcp" | "redis" => network_url("redis", parameters),
        "tls" | "rediss" => network_url("rediss", parameters),
        "unix" | "redis+unix" => unix_url(parameters),
        other => Err(Error::UnsupportedScheme(other.to_string())),
    }
}

fn network_url(scheme: &str, parameters: &Map<String, Value>) -> Result<String, Error> {
    let host = string_param(parameters, "host")?.unwrap_or(DEFAULT_HOST);
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    let port = match integer_param(parameters, "port")? {
        Some(port) => u16::try_from(port)
            .map_err(|_| Error::InvalidEndpoint(format!("port out of range: {}", port)))?,
        None => DEFAULT_PORT,
    };

    let mut url = Url::parse(&format!("{}://{}:{}", scheme, host, port))?;
    if let Some(database) = integer_param(parameters, "database")? {
        url.set_path(&format!("/{}", database));
    }
    if let Some(username) = string_param(parameters, "username")? {
        url.set_username(username)
            .map_err(|_| Error::InvalidEndpoint(format!("cannot set username on {}", host)))?;
    }
    if let Some(password) = string_param(parameters, "password")? {
        url.set_password(Some(password))
            .map_err(|_| Error::InvalidEndpoint(format!("cannot set password on {}", host)))?;
    }
    Ok(url.to_string())
}

cfg_if! {
    if #[cfg(unix)] {
        fn unix_url(parameters: &Map<String, Value>) -> Result<String, Error> {
            let path = string_param(parameters, "path")?
                .ok_or_else(|| Error::InvalidEndpoint("unix endpoint without a path".to_string()))?;
            if !path.starts_with('/') {
                return Err(Error::InvalidEndpoint(format!("unix socket path must be absolute: {}", path)));
            }

            let mut query = Vec::new();
            if let Some(database) = integer_param(parameters, "database")? {
                query.push(("db", database.to_string()));
            }
            if let Some(username) = string_param(parameters, "username")? {
                query.push(("user", username.to_string()));
            }
            if let Some(password) = string_param(parameters, "password")? {
                query.push(("pass", password.to_string()));
            }

            let mut url = Url::parse(&format!("redis+unix://{}", path))?;
            if !query.is_empty() {
                url.query_pairs_mut().extend_pairs(query);
            }
            Ok(url.to_string())
        }
    } else {
        fn unix_url(_parameters: &Map<String, Value>) -> Result<String, Error> {
            Err(Error::UnsupportedScheme("unix".to_string()))
        }
    }
}

fn string_param<'a>(parameters: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, Error> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(other) => Err(Error::InvalidEndpoint(format!(
            "{} must be a string, got {}",
            key, other
        ))),
    }
}

fn integer_param(parameters: &Map<String, Value>, key: &str) -> Result<Option<i64>, Error> {
    let invalid = || Error::InvalidEndpoint(format!("{} must be an integer", key));
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number.as_i64().map(Some).ok_or_else(invalid),
        Some(Value::String(value)) => value.parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::setup;
    use redis::ConnectionAddr;
    use serde_json::json;

    fn parameters(value: Value) -> Endpoint {
        match value {
            Value::Object(map) => Endpoint::Parameters(map),
            other => panic!("not a parameter map: {other}"),
        }
    }

    fn tcp_addr(client: &redis::Client) -> (String, u16) {
        match &client.get_connection_info().addr {
            ConnectionAddr::Tcp(host, port) => (host.clone(), *port),
            other => panic!("unexpected address {other:?}"),
        }
    }

    #[test]
    fn test_tcp_uri_becomes_redis_url() {
        setup();
        let url = endpoint_url(&Endpoint::from("tcp://10.0.0.1:6379")).unwrap();
        assert_eq!(url, "redis://10.0.0.1:6379");
    }

    #[test]
    fn test_bare_host_and_port() {
        let url = endpoint_url(&Endpoint::from("10.0.0.1:6380")).unwrap();
        assert_eq!(url, "redis://10.0.0.1:6380");
    }

    #[test]
    fn test_uri_without_port_gets_default_port() {
        let url = endpoint_url(&Endpoint::from("tcp://127.0.0.1")).unwrap();
        assert_eq!(url, "redis://127.0.0.1:6379");
    }

    #[test]
    fn test_uri_query_parameters() {
        let url =
            endpoint_url(&Endpoint::from("tcp://10.0.0.1:6379?database=15&password=secret"))
                .unwrap();
        assert_eq!(url, "redis://:secret@10.0.0.1:6379/15");
    }

    #[test]
    fn test_redis_url_keeps_database_and_credentials() {
        let url = endpoint_url(&Endpoint::from("redis://user:pw@10.0.0.1:6379/3")).unwrap();
        assert_eq!(url, "redis://user:pw@10.0.0.1:6379/3");
    }

    #[test]
    fn test_tls_uri() {
        let url = endpoint_url(&Endpoint::from("tls://cache.internal")).unwrap();
        assert_eq!(url, "rediss://cache.internal:6379");
    }

    #[test]
    fn test_parameter_map() {
        let endpoint = parameters(json!({"host": "10.0.0.2", "port": 6380, "database": 2}));
        assert_eq!(endpoint_url(&endpoint).unwrap(), "redis://10.0.0.2:6380/2");
    }

    #[test]
    fn test_parameter_map_ipv6_host() {
        let endpoint = parameters(json!({"host": "::1"}));
        assert_eq!(endpoint_url(&endpoint).unwrap(), "redis://[::1]:6379");
    }

    #[test]
    fn test_parameter_map_numeric_strings() {
        let endpoint = parameters(json!({"host": "10.0.0.2", "port": "6390"}));
        assert_eq!(endpoint_url(&endpoint).unwrap(), "redis://10.0.0.2:6390");
    }

    #[test]
    fn test_invalid_port() {
        let endpoint = parameters(json!({"port": 70000}));
        assert!(matches!(endpoint_url(&endpoint), Err(Error::InvalidEndpoint(_))));

        let endpoint = parameters(json!({"port": "six"}));
        assert!(matches!(endpoint_url(&endpoint), Err(Error::InvalidEndpoint(_))));
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = endpoint_url(&Endpoint::from("http://10.0.0.1"));
        assert!(matches!(result, Err(Error::UnsupportedScheme(scheme)) if scheme == "http"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_socket_uri() {
        let url = endpoint_url(&Endpoint::from("unix:/tmp/redis.sock")).unwrap();
        assert_eq!(url, "redis+unix:///tmp/redis.sock");

        let url = endpoint_url(&parameters(
            json!({"scheme": "unix", "path": "/run/redis.sock", "database": 1}),
        ))
        .unwrap();
        assert_eq!(url, "redis+unix:///run/redis.sock?db=1");
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_socket_requires_path() {
        let result = endpoint_url(&parameters(json!({"scheme": "unix"})));
        assert!(matches!(result, Err(Error::InvalidEndpoint(_))));
    }

    #[test]
    fn test_options() {
        let options = ClientOptions::from_value(Some(&json!({
            "prefix": "app:",
            "connections": {"tcp": "phpiredis"}
        })))
        .unwrap();
        assert_eq!(options.prefix.as_deref(), Some("app:"));
        assert_eq!(options.extra.get("connections"), Some(&json!({"tcp": "phpiredis"})));

        assert_eq!(ClientOptions::from_value(None).unwrap(), ClientOptions::default());
        assert!(matches!(
            ClientOptions::from_value(Some(&json!("fast"))),
            Err(Error::InvalidOptions(_))
        ));
        assert!(matches!(
            ClientOptions::from_value(Some(&json!({"prefix": 1}))),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[tokio::test]
    async fn test_construct_with_defaults() {
        let client = RedisFactory.construct(None, None).await.unwrap();
        assert_eq!(client.endpoints().len(), 1);
        assert_eq!(tcp_addr(client.primary()), (DEFAULT_HOST.to_string(), DEFAULT_PORT));
        assert_eq!(client.prefixed("key"), "key");
    }

    #[tokio::test]
    async fn test_construct_multiple_endpoints_in_order() {
        let params = Params::Multiple(vec![
            parameters(json!({"host": "10.0.0.1", "port": 6379})),
            parameters(json!({"host": "10.0.0.2", "port": 6379})),
        ]);
        let options = json!({"prefix": "multi:"});
        let client = RedisFactory
            .construct(Some(&params), Some(&options))
            .await
            .unwrap();

        let hosts: Vec<_> = client.endpoints().iter().map(|c| tcp_addr(c).0).collect();
        assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(client.prefixed("key"), "multi:key");
    }

    #[tokio::test]
    async fn test_construct_tls_endpoint() {
        let params = Params::from("tls://cache.internal:6380");
        let client = RedisFactory.construct(Some(&params), None).await.unwrap();
        match &client.primary().get_connection_info().addr {
            ConnectionAddr::TcpTls { host, port, .. } => {
                assert_eq!(host, "cache.internal");
                assert_eq!(*port, 6380);
            }
            other => panic!("unexpected address {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_construct_database_selection() {
        let params = Params::from("tcp://10.0.0.1:6379/4");
        let client = RedisFactory.construct(Some(&params), None).await.unwrap();
        assert_eq!(client.primary().get_connection_info().redis.db, 4);
    }

    #[tokio::test]
    async fn test_construct_empty_endpoint_list() {
        let params = Params::Multiple(Vec::new());
        let result = RedisFactory.construct(Some(&params), None).await;
        assert!(matches!(result, Err(Error::NoEndpoints)));
    }
}
