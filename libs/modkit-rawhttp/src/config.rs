use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default connect and read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the shadow copy kept for error-body recovery
pub const SHADOW_BUFFER_CAPACITY: usize = 4096;

/// Bytes queued while no body decision has been made before reading pauses
pub const UNDECIDED_READ_AHEAD: usize = 4096;

/// Unread bytes a streaming consumer may fall behind before reading pauses
pub const STREAM_HIGH_WATER_MARK: usize = 64 * 1024;

/// Largest chunk read from a blocking request body source in one go
pub const MAX_WRITE_CHUNK: usize = 16 * 1024;

/// Default number of bytes drained from a discarded body before the connection is dropped
pub const DEFAULT_DISCARD_DRAIN_LIMIT: usize = 64 * 1024;

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
///
/// Controls whether the client enforces TLS or allows insecure HTTP.
/// Unix domain socket connections are local and never use TLS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (for testing with mock servers only)
    ///
    /// **WARNING**: This should only be used for local testing with mock servers.
    /// Never use in production as it exposes traffic to interception.
    AllowInsecureHttp,
}

/// Overall HTTP client configuration
///
/// Deserializable so that it can be embedded in a module's configuration
/// section. Durations use humantime notation (`"30s"`, `"1m 30s"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpClientConfig {
    /// Base URI every request starts from (required at build time)
    ///
    /// Scheme and authority select the TCP endpoint; any path becomes the prefix
    /// that [`crate::HttpRequest::append_path_part`] extends.
    pub base_uri: Option<String>,

    /// Timeout for establishing a connection, TLS handshake included (default: 30 seconds)
    #[serde(with = "humantime_duration")]
    pub connect_timeout: Duration,

    /// Timeout for each read from the connection (default: 30 seconds)
    ///
    /// Applies while waiting for the response head, a `100 Continue`, and body bytes.
    #[serde(with = "humantime_duration")]
    pub read_timeout: Duration,

    /// Buffer streaming request bodies before sending (default: true)
    ///
    /// When enabled, a streaming body is read to the end on the offload executor so
    /// that it can be sent with an exact `Content-Length`. Bodies of unknown length
    /// are buffered even when this is disabled, unless the request carries
    /// `Expect: 100-continue`.
    pub buffered: bool,

    /// Number of event loop worker threads (default: 0, meaning one per CPU)
    ///
    /// Ignored when the client is given a shared [`crate::EventLoop`].
    pub async_pool_size: usize,

    /// Connect through this Unix domain socket instead of TCP (default: None)
    ///
    /// The base URI is still used for the request target and `Host` header.
    pub domain_socket: Option<PathBuf>,

    /// Transport security mode (default: `TlsOnly`)
    ///
    /// Use `AllowInsecureHttp` only for testing with local mock servers.
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    ///
    /// Ignored when an explicit `rustls::ClientConfig` is handed to the builder.
    pub tls_roots: TlsRootConfig,

    /// Maximum bytes read from a discarded body before the connection is dropped
    /// (default: 64 KiB)
    pub discard_drain_limit: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_uri: None,
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            buffered: true,
            async_pool_size: 0,
            domain_socket: None,
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            discard_drain_limit: DEFAULT_DISCARD_DRAIN_LIMIT,
        }
    }
}

impl HttpClientConfig {
    /// Create configuration for testing with mock servers (allows insecure HTTP)
    ///
    /// **WARNING**: This configuration allows plain HTTP connections.
    /// Use only for local testing with mock servers, never in production.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            async_pool_size: 2,
            transport: TransportSecurity::AllowInsecureHttp,
            ..Self::default()
        }
    }
}

/// Serde adapter for `Duration` fields written in humantime notation.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*value))
    }
}
