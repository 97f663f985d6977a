use super::split::{BackpressureMode, split};
use crate::error::HttpError;
use crate::runtime::{OffloadExecutor, offload};
use bytes::Bytes;
use std::io::Read;

/// Caller-supplied blocking body source.
pub type BodySource = Box<dyn Read + Send + 'static>;

/// Request body in one of its three representations.
#[derive(Default)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// In-memory bytes; cloning shares the buffer
    Full(Bytes),
    /// Blocking reader, with its length when known
    Stream {
        reader: BodySource,
        length: Option<u64>,
    },
}

impl RequestBody {
    /// Declared length: `Some(0)` for no body, `None` for a stream of unknown length.
    #[must_use]
    pub fn length(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Full(bytes) => Some(bytes.len() as u64),
            Self::Stream { length, .. } => *length,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Full(bytes) => bytes.is_empty(),
            Self::Stream { length, .. } => *length == Some(0),
        }
    }

    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    /// Produce an independent copy. A stream is split so that both this body
    /// and the copy yield the full byte sequence.
    pub fn duplicate(&mut self, mode: BackpressureMode) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Full(bytes) => Self::Full(bytes.clone()),
            Self::Stream { reader, length } => {
                let length = *length;
                let source = std::mem::replace(reader, Box::new(std::io::empty()));
                let (mine, theirs) = split(source, mode);
                *reader = Box::new(mine);
                Self::Stream {
                    reader: Box::new(theirs),
                    length,
                }
            }
        }
    }

    /// Read a stream body to the end on `executor`; other bodies are returned as is.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Transport` when the source fails and
    /// `HttpError::BodyLengthMismatch` when a declared length is not met.
    pub async fn into_buffered(self, executor: &dyn OffloadExecutor) -> Result<Self, HttpError> {
        let Self::Stream { mut reader, length } = self else {
            return Ok(self);
        };
        let bytes = offload(executor, move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        })
        .await?
        .map_err(crate::error::from_io)?;

        if let Some(expected) = length
            && expected != bytes.len() as u64
        {
            return Err(HttpError::BodyLengthMismatch {
                expected,
                actual: bytes.len() as u64,
            });
        }
        tracing::trace!(bytes = bytes.len(), "buffered streaming request body");
        Ok(Self::Full(Bytes::from(bytes)))
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream { length, .. } => f.debug_struct("Stream").field("length", length).finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::runtime::Handle;

    #[test]
    fn test_lengths() {
        assert_eq!(RequestBody::Empty.length(), Some(0));
        assert_eq!(RequestBody::Full(Bytes::from_static(b"abc")).length(), Some(3));
        let stream = RequestBody::Stream {
            reader: Box::new(Cursor::new(vec![1, 2])),
            length: None,
        };
        assert_eq!(stream.length(), None);
        assert!(stream.is_stream());
        assert!(!stream.is_empty());
    }

    #[test]
    fn test_duplicate_full_shares_bytes() {
        let mut body = RequestBody::Full(Bytes::from_static(b"shared"));
        let copy = body.duplicate(BackpressureMode::Fastest);
        match (body, copy) {
            (RequestBody::Full(a), RequestBody::Full(b)) => assert_eq!(a.as_ptr(), b.as_ptr()),
            other => panic!("unexpected bodies: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_stream_keeps_length() {
        let mut body = RequestBody::Stream {
            reader: Box::new(Cursor::new(b"payload".to_vec())),
            length: Some(7),
        };
        let copy = body.duplicate(BackpressureMode::Fastest);
        assert_eq!(copy.length(), Some(7));

        let (RequestBody::Stream { reader: mut a, .. }, RequestBody::Stream { reader: mut b, .. }) =
            (body, copy)
        else {
            panic!("expected streams");
        };
        let mut first = String::new();
        a.read_to_string(&mut first).unwrap();
        let mut second = String::new();
        b.read_to_string(&mut second).unwrap();
        assert_eq!(first, "payload");
        assert_eq!(second, "payload");
    }

    #[tokio::test]
    async fn test_into_buffered_reads_stream() {
        let body = RequestBody::Stream {
            reader: Box::new(Cursor::new(b"abc".to_vec())),
            length: None,
        };
        let buffered = body.into_buffered(&Handle::current()).await.unwrap();
        assert!(matches!(buffered, RequestBody::Full(ref b) if &b[..] == b"abc"));
    }

    #[tokio::test]
    async fn test_into_buffered_checks_declared_length() {
        let body = RequestBody::Stream {
            reader: Box::new(Cursor::new(b"abc".to_vec())),
            length: Some(5),
        };
        let err = body.into_buffered(&Handle::current()).await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::BodyLengthMismatch {
                expected: 5,
                actual: 3
            }
        ));
    }
}
