use crate::config::TransportSecurity;
use crate::error::{HttpError, TimeoutPhase};
use http::Uri;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tower::ServiceExt;

/// Byte stream carrying one HTTP/1.1 exchange.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// An open connection.
pub type Connection = Box<dyn Io>;

/// Opens one fresh connection per exchange.
#[derive(Clone)]
pub struct Connector {
    https: HttpsConnector<HttpConnector>,
    domain_socket: Option<PathBuf>,
    connect_timeout: Duration,
    transport: TransportSecurity,
}

impl Connector {
    pub fn new(
        https: HttpsConnector<HttpConnector>,
        domain_socket: Option<PathBuf>,
        connect_timeout: Duration,
        transport: TransportSecurity,
    ) -> Self {
        Self {
            https,
            domain_socket,
            connect_timeout,
            transport,
        }
    }

    /// Plain TCP connector with the connect timeout applied.
    pub fn tcp(connect_timeout: Duration) -> HttpConnector {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);
        http.set_connect_timeout(Some(connect_timeout));
        http
    }

    /// Connect to the origin of `uri`, or to the configured domain socket.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::InvalidScheme` when plain HTTP is not allowed, and
    /// `Connect`, `Tls` or `Timeout` when the connection cannot be opened.
    pub async fn connect(&self, uri: &Uri) -> Result<Connection, HttpError> {
        if let Some(path) = &self.domain_socket {
            return self.connect_socket(path).await;
        }

        check_scheme(uri, self.transport)?;
        let connecting = self.https.clone().oneshot(uri.clone());
        match tokio::time::timeout(self.connect_timeout, connecting).await {
            Err(_) => Err(HttpError::Timeout {
                phase: TimeoutPhase::Connect,
                duration: self.connect_timeout,
            }),
            Ok(Err(err)) => Err(classify_connect_error(err, self.connect_timeout)),
            Ok(Ok(stream)) => {
                tracing::trace!(uri = %uri, "connected");
                Ok(Box::new(TokioIo::new(stream)))
            }
        }
    }

    #[cfg(unix)]
    async fn connect_socket(&self, path: &std::path::Path) -> Result<Connection, HttpError> {
        let connecting = tokio::net::UnixStream::connect(path);
        match tokio::time::timeout(self.connect_timeout, connecting).await {
            Err(_) => Err(HttpError::Timeout {
                phase: TimeoutPhase::Connect,
                duration: self.connect_timeout,
            }),
            Ok(Err(err)) => Err(HttpError::Connect(Box::new(err))),
            Ok(Ok(stream)) => {
                tracing::trace!(path = %path.display(), "connected to domain socket");
                Ok(Box::new(stream))
            }
        }
    }

    #[cfg(not(unix))]
    async fn connect_socket(&self, path: &std::path::Path) -> Result<Connection, HttpError> {
        Err(HttpError::InvalidArgument {
            message: format!("domain socket {} is not supported on this platform", path.display()),
            source: None,
        })
    }
}

fn check_scheme(uri: &Uri, transport: TransportSecurity) -> Result<(), HttpError> {
    match uri.scheme_str() {
        Some("https") => Ok(()),
        Some("http") if transport == TransportSecurity::AllowInsecureHttp => Ok(()),
        Some("http") => Err(HttpError::InvalidScheme {
            scheme: "http".to_owned(),
            reason: "plain HTTP requires TransportSecurity::AllowInsecureHttp".to_owned(),
        }),
        other => Err(HttpError::InvalidScheme {
            scheme: other.unwrap_or_default().to_owned(),
            reason: "only http and https are supported".to_owned(),
        }),
    }
}

fn classify_connect_error(err: crate::error::BoxError, timeout: Duration) -> HttpError {
    let mut tls = false;
    let mut timed_out = false;
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err.as_ref());
    while let Some(current) = source {
        if current.is::<rustls::Error>() {
            tls = true;
        }
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            tls |= io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>());
            timed_out |= io.kind() == std::io::ErrorKind::TimedOut;
        }
        source = current.source();
    }

    if tls {
        HttpError::Tls(err)
    } else if timed_out {
        HttpError::Timeout {
            phase: TimeoutPhase::Connect,
            duration: timeout,
        }
    } else {
        HttpError::Connect(err)
    }
}
