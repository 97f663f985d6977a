use crate::body::{BodyPipeline, BodyReader};
use crate::error::HttpError;
use crate::headers::Headers;
use crate::runtime::{OffloadExecutor, offload};
use crate::serializer::{Serializer, decode};
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// HTTP response with a lazily decided body.
///
/// The body is neither buffered nor streamed until one of the body accessors
/// is called; that first call fixes how the body is consumed:
///
/// - [`body`](Self::body), [`list_body`](Self::list_body),
///   [`text_body`](Self::text_body) and [`bytes`](Self::bytes) buffer it;
/// - [`stream_body`](Self::stream_body) streams it.
///
/// After a stream decision the buffered accessors fall back to a copy of the
/// first 4096 bytes, which is enough to read a typical error body. Closing or
/// dropping an undecided response discards the body.
///
/// HTTP error statuses are not errors here; check [`status`](Self::status).
///
/// # Example
///
/// ```ignore
/// let mut request = client.create_request(Method::Get);
/// request.append_path_part("buckets");
/// let response = request.execute().await?;
///
/// if response.status().is_success() {
///     let buckets: Vec<Bucket> = response.list_body().await?;
/// } else {
///     tracing::warn!(body = %response.text_body().await?, "listing failed");
/// }
/// ```
pub struct HttpResponse {
    status: StatusCode,
    headers: Headers,
    body: Arc<BodyPipeline>,
    serializer: Arc<dyn Serializer>,
    offload: Option<Arc<dyn OffloadExecutor>>,
}

impl HttpResponse {
    pub(crate) fn new(
        status: StatusCode,
        headers: Headers,
        body: Arc<BodyPipeline>,
        serializer: Arc<dyn Serializer>,
        offload: Option<Arc<dyn OffloadExecutor>>,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            serializer,
            offload,
        }
    }

    /// Response without a body, for exercising filters.
    #[cfg(test)]
    pub(crate) fn detached(status: u16) -> Self {
        Self::new(
            StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            Headers::new(),
            BodyPipeline::empty(),
            Arc::new(crate::serializer::JsonSerializer),
            None,
        )
    }

    /// Get the response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Numeric status code
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Decode the body with the client's serializer.
    ///
    /// A zero-length body yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Deserialization` if the body does not decode into `T`,
    /// a processing error if the connection failed, or
    /// `HttpError::AlreadyDecided` if the body was already consumed.
    pub async fn body<T>(&self) -> Result<Option<T>, HttpError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let bytes = self.buffered().await?;
        match &self.offload {
            Some(executor) => {
                let serializer = Arc::clone(&self.serializer);
                offload(executor.as_ref(), move || decode::<T>(serializer.as_ref(), &bytes)).await?
            }
            None => decode::<T>(self.serializer.as_ref(), &bytes),
        }
    }

    /// Decode the body as a list; an empty body yields an empty list.
    ///
    /// # Errors
    ///
    /// Same as [`body`](Self::body).
    pub async fn list_body<T>(&self) -> Result<Vec<T>, HttpError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Ok(self.body::<Vec<T>>().await?.unwrap_or_default())
    }

    /// Body as text. Invalid UTF-8 sequences are replaced.
    ///
    /// # Errors
    ///
    /// Same as [`bytes`](Self::bytes).
    pub async fn text_body(&self) -> Result<String, HttpError> {
        let bytes = self.buffered().await?;
        match &self.offload {
            Some(executor) => {
                offload(executor.as_ref(), move || String::from_utf8_lossy(&bytes).into_owned()).await
            }
            None => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    /// Raw body bytes.
    ///
    /// # Errors
    ///
    /// Returns the connection failure that ended the body,
    /// `HttpError::Cancelled` if the body was closed while buffering, or
    /// `HttpError::AlreadyDecided` if the body was already consumed differently.
    pub async fn bytes(&self) -> Result<Bytes, HttpError> {
        self.buffered().await
    }

    /// Stream the body.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::AlreadyDecided` if the body was already consumed.
    pub fn stream_body(&self) -> Result<BodyReader, HttpError> {
        self.body.as_stream()
    }

    /// Release the response. Safe to call more than once.
    ///
    /// An undecided body is discarded; a stream handed out by
    /// [`stream_body`](Self::stream_body) stays readable until it is dropped.
    pub fn close(&mut self) {
        if !self.body.is_streaming() {
            self.body.close();
        }
    }

    async fn buffered(&self) -> Result<Bytes, HttpError> {
        match self.body.as_buffer() {
            Ok(pending) => pending.await.unwrap_or(Err(HttpError::Cancelled)),
            Err(HttpError::AlreadyDecided(decision)) if self.body.is_streaming() => {
                let (bytes, overflowed) = self.body.shadow().await?;
                if overflowed {
                    return Err(HttpError::AlreadyDecided(decision));
                }
                tracing::trace!(bytes = bytes.len(), "serving body from shadow copy");
                Ok(bytes)
            }
            Err(err) => Err(err),
        }
    }
}

impl Drop for HttpResponse {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body.decision_name())
            .finish_non_exhaustive()
    }
}
