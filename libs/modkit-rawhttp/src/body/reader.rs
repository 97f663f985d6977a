use super::pipeline::BodyPipeline;
use crate::error::HttpError;
use bytes::Bytes;
use futures::Stream;
use std::io::{self, Read};
use std::sync::Arc;

/// Streaming view of a response body.
///
/// Implements [`Read`] for blocking consumers (never call it from connection
/// I/O; that is reported as `HttpError::BlockingReadOnEventLoop`) and offers
/// [`BodyReader::next_chunk`] / [`BodyReader::into_stream`] for async ones.
///
/// Dropping the reader closes the body and releases the connection.
pub struct BodyReader {
    pipeline: Arc<BodyPipeline>,
}

impl BodyReader {
    pub(crate) fn new(pipeline: Arc<BodyPipeline>) -> Self {
        Self { pipeline }
    }

    /// Next chunk of the body, `None` once it is complete.
    ///
    /// # Errors
    ///
    /// Returns the connection error that ended the body.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        self.pipeline.next_chunk().await
    }

    /// Convert into a `Stream` of chunks. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, HttpError>> + Send {
        futures::stream::unfold(Some(self), |reader| async move {
            let mut reader = reader?;
            match reader.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Stop reading; remaining bytes are dropped.
    pub fn close(&mut self) {
        self.pipeline.close();
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pipeline.read_blocking(buf).map_err(io::Error::from)
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        self.pipeline.close();
    }
}

impl std::fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyReader").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_stream_yields_replayed_and_live_chunks() {
        let pipeline = BodyPipeline::new(1024);
        pipeline.push(Bytes::from_static(b"early,"));
        let reader = pipeline.as_stream().unwrap();
        pipeline.push(Bytes::from_static(b"late"));
        pipeline.finish();

        let chunks: Vec<Bytes> = reader.into_stream().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"early,late");
    }

    #[tokio::test]
    async fn test_stream_ends_after_error() {
        let pipeline = BodyPipeline::new(1024);
        let reader = pipeline.as_stream().unwrap();
        pipeline.fail(HttpError::Transport("reset".into()));

        let items: Vec<_> = futures::StreamExt::collect(reader.into_stream()).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn test_drop_closes_pipeline() {
        let pipeline = BodyPipeline::new(1024);
        let reader = pipeline.as_stream().unwrap();
        drop(reader);

        assert_eq!(pipeline.push(Bytes::from_static(b"x")), crate::body::Demand::Stop);
    }
}
