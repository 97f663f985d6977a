use crate::client::{ClientShared, HttpClient};
use crate::config::{HttpClientConfig, TlsRootConfig, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use crate::filter::{ClientFilter, FilterChain, RequestInterceptor};
use crate::runtime::EventLoop;
use crate::serializer::{JsonSerializer, Serializer};
use crate::tls::{TlsSource, build_https_connector};
use crate::transport::{Connector, ExchangeSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing an [`HttpClient`].
///
/// Starts from an [`HttpClientConfig`] (usually deserialized from a module's
/// configuration) and layers code-only settings on top: interceptors, filters,
/// the serializer, a custom TLS configuration and a shared event loop.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    chain: FilterChain,
    serializer: Arc<dyn Serializer>,
    tls_config: Option<rustls::ClientConfig>,
    event_loop: Option<Arc<EventLoop>>,
}

impl HttpClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            chain: FilterChain::default(),
            serializer: Arc::new(JsonSerializer),
            tls_config: None,
            event_loop: None,
        }
    }

    /// Set the base URI every request starts from
    #[must_use]
    pub fn base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.config.base_uri = Some(base_uri.into());
        self
    }

    /// Set the connect timeout (TLS handshake included)
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the timeout applied to each read from the connection
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Buffer streaming request bodies before sending them
    #[must_use]
    pub fn buffered(mut self, buffered: bool) -> Self {
        self.config.buffered = buffered;
        self
    }

    /// Worker threads of the dedicated event loop (0 = one per CPU)
    ///
    /// Ignored when [`event_loop`](Self::event_loop) is set.
    #[must_use]
    pub fn async_pool_size(mut self, size: usize) -> Self {
        self.config.async_pool_size = size;
        self
    }

    /// Connect through a Unix domain socket instead of TCP
    #[must_use]
    pub fn domain_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.domain_socket = Some(path.into());
        self
    }

    /// Set transport security mode
    ///
    /// Use `TransportSecurity::AllowInsecureHttp` only for testing with mock servers.
    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow insecure HTTP connections (for testing only)
    ///
    /// Equivalent to `.transport(TransportSecurity::AllowInsecureHttp)`.
    ///
    /// **WARNING**: This should only be used for local testing with mock servers.
    /// Never use in production as it exposes traffic to interception.
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "modkit_rawhttp::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Select the root certificate store
    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Use a prepared rustls configuration (client certificates, private CAs)
    ///
    /// Takes precedence over [`tls_roots`](Self::tls_roots).
    #[must_use]
    pub fn tls_config(mut self, config: rustls::ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Replace the default JSON body serializer
    #[must_use]
    pub fn serializer(mut self, serializer: impl Serializer) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Drive connections on a shared event loop instead of a dedicated one
    #[must_use]
    pub fn event_loop(mut self, event_loop: Arc<EventLoop>) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    /// Register a request interceptor; lower priorities run first
    #[must_use]
    pub fn interceptor(mut self, priority: i32, interceptor: impl RequestInterceptor) -> Self {
        self.chain.add_interceptor(priority, Arc::new(interceptor));
        self
    }

    /// Register a client filter
    #[must_use]
    pub fn filter(mut self, filter: impl ClientFilter) -> Self {
        self.chain.add_filter(filter);
        self
    }

    /// Bytes drained from a discarded response body before the connection is dropped
    #[must_use]
    pub fn discard_drain_limit(mut self, limit: usize) -> Self {
        self.config.discard_drain_limit = limit;
        self
    }

    /// Build the HTTP client
    ///
    /// # Errors
    /// Returns an error if the base URI is missing or invalid, TLS
    /// initialization fails, or the dedicated event loop cannot be started
    pub fn build(self) -> Result<HttpClient, HttpError> {
        // Domain sockets are local and never use TLS
        let scheme_policy = if self.config.domain_socket.is_some() {
            TransportSecurity::AllowInsecureHttp
        } else {
            self.config.transport
        };
        let base_uri = validate_base_uri(self.config.base_uri.as_deref(), scheme_policy)?;

        // Warn if insecure HTTP is enabled (should only be used for testing)
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let source = match self.tls_config {
            Some(config) => TlsSource::Custom(config),
            None => TlsSource::Roots(self.config.tls_roots),
        };
        let https = build_https_connector(
            source,
            self.config.transport,
            Connector::tcp(self.config.connect_timeout),
        )?;
        let connector = Connector::new(
            https,
            self.config.domain_socket.clone(),
            self.config.connect_timeout,
            self.config.transport,
        );

        let event_loop = match self.event_loop {
            Some(event_loop) => event_loop,
            None => Arc::new(EventLoop::new(self.config.async_pool_size)?),
        };

        let settings = ExchangeSettings {
            read_timeout: self.config.read_timeout,
            drain_limit: self.config.discard_drain_limit,
            offload: event_loop.offload_executor(),
        };

        tracing::debug!(
            base_uri = %base_uri,
            domain_socket = ?self.config.domain_socket,
            buffered = self.config.buffered,
            hooks = !self.chain.is_empty(),
            "built raw HTTP client"
        );

        Ok(HttpClient {
            shared: Arc::new(ClientShared {
                base_uri,
                connector,
                settings,
                event_loop,
                chain: self.chain,
                serializer: self.serializer,
                buffered: self.config.buffered,
            }),
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate the base URI against the transport security configuration.
///
/// Uses `http::Uri` parsing rather than string prefix matching.
fn validate_base_uri(
    base_uri: Option<&str>,
    transport: TransportSecurity,
) -> Result<String, HttpError> {
    let Some(url) = base_uri else {
        return Err(HttpError::InvalidUri {
            url: String::new(),
            kind: InvalidUriKind::Missing,
            reason: "base URI is required".to_owned(),
        });
    };

    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("https") => Ok(url.to_owned()),
        Some("http") => match transport {
            TransportSecurity::AllowInsecureHttp => Ok(url.to_owned()),
            TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
            }),
        },
        Some(scheme) => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
        None => Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        }),
    }
}
