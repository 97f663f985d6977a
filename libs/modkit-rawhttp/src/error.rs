use std::time::Duration;
use thiserror::Error;

/// Boxed error used for sources that come from collaborators (serializers, filters, TLS).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
    /// No base URI was configured for the client
    Missing,
}

/// Which I/O phase ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TimeoutPhase {
    /// Establishing the connection, including the TLS handshake
    Connect,
    /// Waiting for response bytes
    Read,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Read => f.write_str("read"),
        }
    }
}

/// HTTP client error types
///
/// Errors fall into a few families that callers usually branch on:
/// - processing errors ([`HttpError::is_processing`]): the exchange failed at the
///   transport level and a retry policy may act on it;
/// - argument errors ([`HttpError::is_invalid_argument`]): the request itself is
///   unusable, retrying cannot help;
/// - contract violations such as [`HttpError::AlreadyDecided`].
///
/// HTTP error statuses are never reported here. A 500 response is a successful exchange.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request content was rejected before anything went on the wire
    /// (for example the body object could not be serialized)
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
        /// Reason the scheme was rejected
        reason: String,
    },

    /// A streaming request body produced a different number of bytes than declared
    #[error("Request body length mismatch: declared {expected} bytes, got {actual}")]
    BodyLengthMismatch { expected: u64, actual: u64 },

    /// Connection could not be established
    #[error("Connect error: {0}")]
    Connect(#[source] BoxError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// An I/O phase timed out
    #[error("{phase} timed out after {duration:?}")]
    Timeout {
        phase: TimeoutPhase,
        duration: Duration,
    },

    /// Transport error (socket read/write failure, connection reset)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// The peer sent bytes that are not valid HTTP/1.1 framing
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Response body could not be decoded into the requested type
    #[error("Deserialization failed: {0}")]
    Deserialization(#[source] BoxError),

    /// A body decision (buffer, stream, discard) was requested twice
    #[error("Response body already consumed as {0}")]
    AlreadyDecided(&'static str),

    /// A blocking body read would have parked the thread that drives connection I/O
    #[error("Blocking body read attempted on the event loop")]
    BlockingReadOnEventLoop,

    /// The body future was cancelled because the response was closed
    #[error("Response body read cancelled")]
    Cancelled,

    /// Neither the main body path nor the shadow copy can provide the body
    #[error("Response body unavailable: {0}")]
    BodyUnavailable(String),

    /// Response filters removed the response without reporting a failure
    #[error("Response was discarded by a filter")]
    ResponseDiscarded,

    /// An offloaded blocking task failed to complete
    #[error("Offloaded task failed: {0}")]
    Offload(String),

    /// Event loop could not be created
    #[error("Event loop error: {0}")]
    Runtime(#[source] std::io::Error),

    /// Error raised by a client filter
    #[error("Filter error: {0}")]
    Filter(#[source] BoxError),

    /// An error that has other errors attached as suppressed causes
    #[error("{error}")]
    Suppressed {
        error: Box<HttpError>,
        suppressed: Vec<HttpError>,
    },
}

impl HttpError {
    /// Build an [`HttpError::InvalidArgument`] with a source error.
    pub fn invalid_argument(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Wrap an arbitrary error raised by a filter.
    pub fn filter(source: impl Into<BoxError>) -> Self {
        Self::Filter(source.into())
    }

    /// Attach `other` to this error as a suppressed cause.
    ///
    /// The primary error keeps its identity for classification; suppressed errors
    /// are kept in the order they were attached.
    #[must_use]
    pub fn with_suppressed(self, other: HttpError) -> Self {
        match self {
            Self::Suppressed {
                error,
                mut suppressed,
            } => {
                suppressed.push(other);
                Self::Suppressed { error, suppressed }
            }
            primary => Self::Suppressed {
                error: Box::new(primary),
                suppressed: vec![other],
            },
        }
    }

    /// The primary error, looking through suppression wrappers.
    #[must_use]
    pub fn root(&self) -> &HttpError {
        match self {
            Self::Suppressed { error, .. } => error.root(),
            other => other,
        }
    }

    /// Errors attached as suppressed causes, oldest first.
    #[must_use]
    pub fn suppressed(&self) -> &[HttpError] {
        match self {
            Self::Suppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Returns `true` for transport-level failures: connect and read timeouts,
    /// refused connections, TLS failures, broken connections and malformed framing.
    ///
    /// Callers use this to decide whether an operation may be retried.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        matches!(
            self.root(),
            Self::Connect(_)
                | Self::Tls(_)
                | Self::Timeout { .. }
                | Self::Transport(_)
                | Self::MalformedResponse(_)
        )
    }

    /// Returns `true` when the request itself was unusable.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self.root(),
            Self::InvalidArgument { .. }
                | Self::InvalidUri { .. }
                | Self::InvalidScheme { .. }
                | Self::InvalidHeaderName(_)
                | Self::InvalidHeaderValue(_)
                | Self::BodyLengthMismatch { .. }
        )
    }

    /// Returns `true` for body encode/decode failures.
    #[must_use]
    pub fn is_serialization(&self) -> bool {
        matches!(
            self.root(),
            Self::InvalidArgument { source: Some(_), .. } | Self::Deserialization(_)
        )
    }
}

/// Map an I/O error from the connection or a body source into the error taxonomy.
///
/// Errors produced by this crate travel through `io::Error` in blocking readers
/// and are unwrapped back to their original variant.
pub fn from_io(err: std::io::Error) -> HttpError {
    if err.get_ref().is_some_and(|inner| inner.is::<HttpError>()) {
        if let Some(Ok(http)) = err.into_inner().map(|inner| inner.downcast::<HttpError>()) {
            return *http;
        }
        return HttpError::Transport("body source failed".into());
    }
    HttpError::Transport(Box::new(err))
}

impl From<HttpError> for std::io::Error {
    fn from(err: HttpError) -> Self {
        std::io::Error::other(err)
    }
}
