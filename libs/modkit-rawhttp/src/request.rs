use crate::body::{BackpressureMode, RequestBody};
use crate::client::ClientShared;
use crate::error::{HttpError, InvalidUriKind};
use crate::headers::Headers;
use crate::response::HttpResponse;
use crate::runtime::OffloadExecutor;
use crate::serializer::encode;
use crate::transport::{ExchangeSettings, WireRequest, exchange};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, HeaderValue, TRANSFER_ENCODING};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::Instrument;

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    /// The `http` crate equivalent
    #[must_use]
    pub fn as_http(self) -> http::Method {
        match self {
            Self::Get => http::Method::GET,
            Self::Head => http::Method::HEAD,
            Self::Post => http::Method::POST,
            Self::Put => http::Method::PUT,
            Self::Delete => http::Method::DELETE,
            Self::Patch => http::Method::PATCH,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_http().as_str())
    }
}

type Attribute = Arc<dyn Any + Send + Sync>;

/// A mutable request bound to the client that created it.
///
/// Created by [`HttpClient::create_request`](crate::HttpClient::create_request).
/// The URI starts at the client's base URI and grows with
/// [`append_path_part`](Self::append_path_part) and [`query`](Self::query).
///
/// Invalid headers do not fail immediately; the first one is reported by
/// [`execute`](Self::execute).
///
/// # Example
///
/// ```ignore
/// let mut request = client.create_request(Method::Put);
/// request
///     .append_path_part("b")
///     .append_path_part(bucket)
///     .append_path_part("o")
///     .append_path_part(object)
///     .header("content-type", "application/octet-stream")
///     .header("expect", "100-continue")
///     .body_stream_with_length(file, len);
///
/// let response = request.execute().await?;
/// ```
#[must_use = "HttpRequest does nothing until .execute() is called"]
pub struct HttpRequest {
    client: Arc<ClientShared>,
    method: Method,
    uri: String,
    query: String,
    headers: Headers,
    attributes: HashMap<String, Attribute>,
    body: RequestBody,
    offload: Option<Arc<dyn OffloadExecutor>>,
    expect_continue: bool,
    /// Error captured while building (deferred to `execute()`)
    error: Option<HttpError>,
}

impl HttpRequest {
    pub(crate) fn new(client: Arc<ClientShared>, method: Method) -> Self {
        let uri = client.base_uri.clone();
        Self {
            client,
            method,
            uri,
            query: String::new(),
            headers: Headers::new(),
            attributes: HashMap::new(),
            body: RequestBody::Empty,
            offload: None,
            expect_continue: false,
            error: None,
        }
    }

    /// Request method
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// URI built so far, including the query string if any
    #[must_use]
    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            self.uri.clone()
        } else {
            format!("{}?{}", self.uri, self.query)
        }
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Whether the request waits for `100 Continue` before sending its body
    #[must_use]
    pub fn expect_continue(&self) -> bool {
        self.expect_continue
    }

    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Append a path segment with exactly one `/` between it and the current path.
    pub fn append_path_part(&mut self, part: &str) -> &mut Self {
        match (self.uri.ends_with('/'), part.strip_prefix('/')) {
            (true, Some(rest)) => self.uri.push_str(rest),
            (false, None) => {
                self.uri.push('/');
                self.uri.push_str(part);
            }
            _ => self.uri.push_str(part),
        }
        self
    }

    /// Append `name=value` to the query string.
    ///
    /// Nothing is encoded; pass already URL-encoded values.
    pub fn query(&mut self, name: &str, value: &str) -> &mut Self {
        if !self.query.is_empty() {
            self.query.push('&');
        }
        self.query.push_str(name);
        self.query.push('=');
        self.query.push_str(value);
        self
    }

    /// Append a header value; existing values are kept.
    ///
    /// `Expect: 100-continue` (any case) makes the request wait for the server's
    /// go-ahead before sending its body.
    pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
        if self.error.is_some() {
            return self;
        }

        match self.headers.append(name, value) {
            Ok(()) => {
                if name.eq_ignore_ascii_case("expect") {
                    self.expect_continue = value.eq_ignore_ascii_case("100-continue");
                }
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Remove every value of a header.
    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.remove(name);
        if name.eq_ignore_ascii_case("expect") {
            self.expect_continue = false;
        }
        self
    }

    /// Set a UTF-8 text body, replacing any previous body
    pub fn body_string(&mut self, body: impl Into<String>) -> &mut Self {
        self.body = RequestBody::Full(Bytes::from(body.into()));
        self
    }

    /// Set a raw body, replacing any previous body
    pub fn body_bytes(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = RequestBody::Full(body.into());
        self
    }

    /// Stream the body from a blocking reader of unknown length.
    ///
    /// Unless the request uses `Expect: 100-continue`, a body of unknown length is
    /// read to the end before sending; otherwise it goes out chunked.
    pub fn body_stream(&mut self, reader: impl Read + Send + 'static) -> &mut Self {
        self.body = RequestBody::Stream {
            reader: Box::new(reader),
            length: None,
        };
        self
    }

    /// Stream the body from a blocking reader that yields exactly `length` bytes.
    pub fn body_stream_with_length(
        &mut self,
        reader: impl Read + Send + 'static,
        length: u64,
    ) -> &mut Self {
        self.body = RequestBody::Stream {
            reader: Box::new(reader),
            length: Some(length),
        };
        self
    }

    /// Send no body
    pub fn empty_body(&mut self) -> &mut Self {
        self.body = RequestBody::Empty;
        self
    }

    /// Alias of [`empty_body`](Self::empty_body)
    pub fn body_none(&mut self) -> &mut Self {
        self.empty_body()
    }

    /// Serialize `value` with the client's serializer and use it as the body.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::InvalidArgument` if the value cannot be serialized.
    /// The previous body is kept in that case.
    pub fn body_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, HttpError> {
        let bytes = encode(self.client.serializer.as_ref(), value)?;
        self.body = RequestBody::Full(Bytes::from(bytes));
        Ok(self)
    }

    /// Attach opaque per-request metadata, replacing a previous value of the same name.
    pub fn attribute<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) -> &mut Self {
        self.attributes.insert(name.into(), Arc::new(value));
        self
    }

    /// Attribute `name`, if present and of type `T`
    #[must_use]
    pub fn get_attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name)?.downcast_ref::<T>()
    }

    /// Remove and return attribute `name`
    pub fn remove_attribute(&mut self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.attributes.remove(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Run blocking body reads and response decoding on `executor` instead of
    /// the event loop's blocking pool.
    pub fn set_offload_executor(&mut self, executor: Arc<dyn OffloadExecutor>) -> &mut Self {
        self.offload = Some(executor);
        self
    }

    /// Duplicate this request; see [`copy_with`](Self::copy_with).
    pub fn copy(&mut self) -> HttpRequest {
        self.copy_with(BackpressureMode::default())
    }

    /// Duplicate this request so that both copies can be executed.
    ///
    /// Headers and attributes are copied. An in-memory body is shared; a
    /// streaming body is split so that each copy reads every byte, paced by
    /// `mode`. A discarded request copies without a body.
    pub fn copy_with(&mut self, mode: BackpressureMode) -> HttpRequest {
        let error = self.error.as_ref().map(|err| HttpError::InvalidArgument {
            message: format!("copied from an invalid request: {err}"),
            source: None,
        });

        HttpRequest {
            client: Arc::clone(&self.client),
            method: self.method,
            uri: self.uri.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            attributes: self.attributes.clone(),
            body: self.body.duplicate(mode),
            offload: self.offload.clone(),
            expect_continue: self.expect_continue,
            error,
        }
    }

    /// Release the body without sending it. Safe to call more than once.
    pub fn discard(&mut self) {
        self.body = RequestBody::Empty;
    }

    /// Send the request and wait for the response head.
    ///
    /// Stages, in order: stream buffering, interceptors, finalization (URI,
    /// `Host`, framing headers), filter `before_request` hooks, the exchange,
    /// filter `after_response` hooks.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` if:
    /// - a header set on the request was invalid;
    /// - an interceptor or filter failed;
    /// - the URI cannot be parsed or its scheme is not allowed;
    /// - the exchange failed (see [`HttpError::is_processing`]).
    ///
    /// HTTP error statuses are returned as responses.
    pub async fn execute(mut self) -> Result<HttpResponse, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let client = Arc::clone(&self.client);
        let offload = self
            .offload
            .clone()
            .unwrap_or_else(|| Arc::clone(&client.settings.offload));

        // Unknown-length streams are sent as bytes unless the server is asked for 100-continue
        if self.body.is_stream()
            && (client.buffered || self.body.length().is_none())
            && !self.expect_continue
        {
            let body = std::mem::take(&mut self.body);
            self.body = body.into_buffered(offload.as_ref()).await?;
            tracing::trace!(bytes = ?self.body.length(), "buffered streaming request body");
        }

        client.chain.intercept(&mut self)?;
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let uri = self.finalize()?;
        let state = client.chain.before(&self);

        let wire = WireRequest {
            method: self.method.as_http(),
            uri,
            headers: self.headers.clone(),
            body: std::mem::take(&mut self.body),
            expect_continue: self.expect_continue,
        };
        let settings = ExchangeSettings {
            offload,
            ..client.settings.clone()
        };
        let span = tracing::debug_span!(
            "rawhttp.exchange",
            method = %self.method,
            uri = %wire.uri,
        );

        let task = client
            .event_loop
            .spawn_io(exchange(client.connector.clone(), wire, settings).instrument(span));
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join) if join.is_cancelled() => Err(HttpError::Cancelled),
            Err(join) => Err(HttpError::Transport(Box::new(join))),
        }
        .map(|wire| {
            let (status, headers, body) = wire.into_parts();
            HttpResponse::new(
                status,
                Headers::from(headers),
                body,
                Arc::clone(&client.serializer),
                self.offload.clone(),
            )
        });

        if let Err(err) = &outcome {
            tracing::debug!(error = %err, method = %self.method, "exchange failed");
        }
        client.chain.after(&self, outcome, state)
    }

    /// Parse the final URI and add `Host` and framing headers the caller left out.
    fn finalize(&mut self) -> Result<http::Uri, HttpError> {
        let full = self.uri();
        let uri: http::Uri = full
            .parse()
            .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                url: full.clone(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            })?;

        let Some(authority) = uri.authority() else {
            return Err(HttpError::InvalidUri {
                url: full,
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        };

        if !self.headers.contains(HOST.as_str()) {
            let host = authority.as_str().rsplit('@').next().unwrap_or_default();
            self.headers.insert(HOST, HeaderValue::from_str(host)?);
        }

        if !self.headers.contains(CONTENT_LENGTH.as_str())
            && !self.headers.contains(TRANSFER_ENCODING.as_str())
        {
            match self.body.length() {
                Some(length) => self.headers.insert(CONTENT_LENGTH, HeaderValue::from(length)),
                None => self
                    .headers
                    .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked")),
            }
        }

        Ok(uri)
    }
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("uri", &self.uri())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("expect_continue", &self.expect_continue)
            .finish_non_exhaustive()
    }
}
