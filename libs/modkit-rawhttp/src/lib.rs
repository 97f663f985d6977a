#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Low-level HTTP/1.1 client for `ModKit`
//!
//! This crate drives HTTP/1.1 exchanges directly on top of tokio sockets:
//! - One connection per exchange over TCP, TLS (rustls) or a Unix domain socket
//! - Streamed or buffered request bodies, `Content-Length` or chunked
//! - `Expect: 100-continue` negotiation
//! - Deferred response body decisions (buffer, stream or discard) with
//!   backpressure and a bounded shadow copy for error-body recovery
//! - Request interceptors and priority-ordered client filters
//! - An explicit [`EventLoop`] instead of process-wide runtimes
//!
//! # Response bodies
//!
//! Nothing is read past the response head until the caller decides what to do
//! with the body. The first body accessor fixes the decision; a second,
//! different one fails with [`HttpError::AlreadyDecided`]. Closing or dropping
//! the response discards an undecided body.
//!
//! # Example
//!
//! ```ignore
//! use modkit_rawhttp::{HttpClient, Method};
//!
//! let client = HttpClient::builder()
//!     .base_uri("https://objectstorage.example.com/n/ns")
//!     .build()?;
//!
//! let mut request = client.create_request(Method::Put);
//! request
//!     .append_path_part("b/logs/o/app.log")
//!     .header("expect", "100-continue")
//!     .body_stream_with_length(file, len);
//!
//! let response = request.execute().await?;
//! if !response.status().is_success() {
//!     tracing::warn!(body = %response.text_body().await?, "upload rejected");
//! }
//! ```

mod body;
mod builder;
mod client;
mod config;
mod error;
mod filter;
mod headers;
mod request;
mod response;
mod runtime;
mod serializer;
mod tls;
mod transport;

pub use body::{BackpressureMode, BodyReader, BodySource, RequestBody};
pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{
    DEFAULT_DISCARD_DRAIN_LIMIT, DEFAULT_TIMEOUT, HttpClientConfig, SHADOW_BUFFER_CAPACITY,
    TlsRootConfig, TransportSecurity,
};
pub use error::{BoxError, HttpError, InvalidUriKind, TimeoutPhase};
pub use filter::{ClientFilter, RequestInterceptor};
pub use headers::Headers;
pub use request::{HttpRequest, Method};
pub use response::HttpResponse;
pub use runtime::{EventLoop, OffloadExecutor};
pub use serializer::{JsonSerializer, Serializer};
