//! HTTP/1.1 wire encoding for request heads and chunked bodies, and a sans-IO
//! decoder for response heads and bodies.

use crate::error::HttpError;
use crate::headers::Headers;
use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

const MAX_HEADERS: usize = 96;
/// Upper bound for a response head; larger heads are rejected.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;
const MAX_CHUNK_LINE: usize = 4 * 1024;

/// Terminator of a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Serialize the request line and headers. `Host` is always written first.
pub fn encode_head(method: &Method, target: &str, headers: &Headers) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    let map = headers.as_header_map();
    for value in map.get_all(HOST) {
        write_header(&mut out, HOST.as_str(), value);
    }
    for (name, value) in map.iter().filter(|(name, _)| **name != HOST) {
        write_header(&mut out, name.as_str(), value);
    }
    out.extend_from_slice(b"\r\n");
    out
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &HeaderValue) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Frame one chunk of a chunked body. Empty input yields an empty frame, not
/// the terminator.
pub fn encode_chunk(data: &[u8]) -> Bytes {
    if data.is_empty() {
        return Bytes::new();
    }
    let mut out = BytesMut::with_capacity(data.len() + 12);
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out.freeze()
}

/// Parsed status line and headers.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Interim responses the reader skips over (every `1xx` except `101`).
    pub fn is_interim(&self) -> bool {
        self.status.is_informational() && self.status != StatusCode::SWITCHING_PROTOCOLS
    }
}

/// Try to parse a response head from the front of `buf`.
///
/// Returns the head and the number of bytes it occupied, or `None` when more
/// bytes are needed.
///
/// # Errors
///
/// Returns `HttpError::MalformedResponse` for invalid syntax or an oversized head.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, HttpError> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut raw);

    let consumed = match response.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            if buf.len() > MAX_HEAD_SIZE {
                return Err(HttpError::MalformedResponse(format!(
                    "response head exceeds {MAX_HEAD_SIZE} bytes"
                )));
            }
            return Ok(None);
        }
        Err(e) => return Err(HttpError::MalformedResponse(e.to_string())),
    };

    let code = response
        .code
        .ok_or_else(|| HttpError::MalformedResponse("missing status code".to_owned()))?;
    let status = StatusCode::from_u16(code)
        .map_err(|e| HttpError::MalformedResponse(format!("invalid status {code}: {e}")))?;

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| HttpError::MalformedResponse(format!("bad header name: {e}")))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| HttpError::MalformedResponse(format!("bad value for {name}: {e}")))?;
        headers.append(name, value);
    }

    tracing::trace!(status = code, bytes = consumed, "parsed response head");
    Ok(Some((ResponseHead { status, headers }, consumed)))
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Empty,
    Chunked,
    Length(u64),
    UntilEof,
}

/// Determine body framing from the request method and response head.
///
/// # Errors
///
/// Returns `HttpError::MalformedResponse` for an unparseable or conflicting
/// `Content-Length`.
pub fn framing(method: &Method, head: &ResponseHead) -> Result<Framing, HttpError> {
    let status = head.status;
    if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(Framing::Empty);
    }

    if let Some(last) = head.headers.get_all(TRANSFER_ENCODING).iter().next_back() {
        let chunked = last
            .to_str()
            .ok()
            .and_then(|v| v.rsplit(',').next())
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        return Ok(if chunked { Framing::Chunked } else { Framing::UntilEof });
    }

    let mut length: Option<u64> = None;
    for value in &head.headers.get_all(CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| HttpError::MalformedResponse("invalid Content-Length".to_owned()))?;
        if length.is_some_and(|seen| seen != parsed) {
            return Err(HttpError::MalformedResponse(
                "conflicting Content-Length values".to_owned(),
            ));
        }
        length = Some(parsed);
    }

    Ok(match length {
        Some(0) => Framing::Empty,
        Some(n) => Framing::Length(n),
        None => Framing::UntilEof,
    })
}

/// Outcome of one decode step.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Data(Bytes),
    NeedMore,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug)]
enum DecoderKind {
    Length(u64),
    Chunked(ChunkState),
    UntilEof,
    Done,
}

/// Incremental body decoder that works on whatever bytes are buffered.
#[derive(Debug)]
pub struct BodyDecoder {
    kind: DecoderKind,
}

impl BodyDecoder {
    pub fn new(framing: Framing) -> Self {
        let kind = match framing {
            Framing::Empty | Framing::Length(0) => DecoderKind::Done,
            Framing::Length(n) => DecoderKind::Length(n),
            Framing::Chunked => DecoderKind::Chunked(ChunkState::Size),
            Framing::UntilEof => DecoderKind::UntilEof,
        };
        Self { kind }
    }

    #[cfg(test)]
    pub fn is_done(&self) -> bool {
        matches!(self.kind, DecoderKind::Done)
    }

    /// Decode the next piece of body from `buf`, consuming what it uses.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::MalformedResponse` for invalid chunk framing.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, HttpError> {
        loop {
            match &mut self.kind {
                DecoderKind::Done => return Ok(Decoded::Done),
                DecoderKind::UntilEof => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    return Ok(Decoded::Data(buf.split().freeze()));
                }
                DecoderKind::Length(remaining) => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let take = take_len(*remaining, buf.len());
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        self.kind = DecoderKind::Done;
                    }
                    return Ok(Decoded::Data(buf.split_to(take).freeze()));
                }
                DecoderKind::Chunked(state) => match *state {
                    ChunkState::Size => {
                        let Some(line) = take_line(buf)? else {
                            return Ok(Decoded::NeedMore);
                        };
                        let size = parse_chunk_size(&line)?;
                        *state = if size == 0 {
                            ChunkState::Trailers
                        } else {
                            ChunkState::Data(size)
                        };
                    }
                    ChunkState::Data(remaining) => {
                        if buf.is_empty() {
                            return Ok(Decoded::NeedMore);
                        }
                        let take = take_len(remaining, buf.len());
                        let left = remaining - take as u64;
                        *state = if left == 0 {
                            ChunkState::DataEnd
                        } else {
                            ChunkState::Data(left)
                        };
                        return Ok(Decoded::Data(buf.split_to(take).freeze()));
                    }
                    ChunkState::DataEnd => {
                        if buf.len() < 2 {
                            return Ok(Decoded::NeedMore);
                        }
                        if &buf[..2] != b"\r\n" {
                            return Err(HttpError::MalformedResponse(
                                "chunk data not followed by CRLF".to_owned(),
                            ));
                        }
                        buf.advance(2);
                        *state = ChunkState::Size;
                    }
                    ChunkState::Trailers => {
                        let Some(line) = take_line(buf)? else {
                            return Ok(Decoded::NeedMore);
                        };
                        if line.is_empty() {
                            self.kind = DecoderKind::Done;
                        } else {
                            tracing::trace!(trailer = %String::from_utf8_lossy(&line), "ignoring trailer");
                        }
                    }
                },
            }
        }
    }

    /// The connection reached end of stream.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Transport` if the body was not complete.
    pub fn finish_at_eof(&mut self) -> Result<(), HttpError> {
        match self.kind {
            DecoderKind::Done => Ok(()),
            DecoderKind::UntilEof => {
                self.kind = DecoderKind::Done;
                Ok(())
            }
            DecoderKind::Length(remaining) => Err(HttpError::Transport(
                format!("connection closed with {remaining} body bytes outstanding").into(),
            )),
            DecoderKind::Chunked(_) => Err(HttpError::Transport(
                "connection closed inside chunked body".into(),
            )),
        }
    }
}

fn take_len(remaining: u64, available: usize) -> usize {
    usize::try_from(remaining).map_or(available, |r| r.min(available))
}

/// Pop one CRLF-terminated line (without the CRLF).
fn take_line(buf: &mut BytesMut) -> Result<Option<BytesMut>, HttpError> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let line = buf.split_to(pos);
            buf.advance(2);
            Ok(Some(line))
        }
        None if buf.len() > MAX_CHUNK_LINE => Err(HttpError::MalformedResponse(
            "chunk line too long".to_owned(),
        )),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, HttpError> {
    let size = line.split(|b| *b == b';').next().unwrap_or_default();
    let size = std::str::from_utf8(size)
        .map_err(|_| HttpError::MalformedResponse("chunk size is not ASCII".to_owned()))?
        .trim();
    u64::from_str_radix(size, 16)
        .map_err(|_| HttpError::MalformedResponse(format!("invalid chunk size {size:?}")))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn head(status: u16, headers: &[(&str, &str)]) -> ResponseHead {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        ResponseHead {
            status: StatusCode::from_u16(status).unwrap(),
            headers: map,
        }
    }

    fn decode_all(decoder: &mut BodyDecoder, input: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        loop {
            match decoder.decode(&mut buf).unwrap() {
                Decoded::Data(data) => out.extend_from_slice(&data),
                Decoded::NeedMore | Decoded::Done => return out,
            }
        }
    }

    #[test]
    fn test_encode_head_writes_host_first() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain").unwrap();
        headers.append("Host", "example.com:8080").unwrap();
        headers.append("X-Trace", "1").unwrap();

        let head = String::from_utf8(encode_head(&Method::POST, "/a/b?x=1", &headers)).unwrap();
        assert!(head.starts_with("POST /a/b?x=1 HTTP/1.1\r\nhost: example.com:8080\r\n"));
        assert!(head.contains("content-type: text/plain\r\n"));
        assert!(head.contains("x-trace: 1\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
        assert_eq!(head.matches("host:").count(), 1);
    }

    #[test]
    fn test_encode_chunk() {
        assert_eq!(&encode_chunk(b"hello world!")[..], b"c\r\nhello world!\r\n");
        assert!(encode_chunk(b"").is_empty());
    }

    #[test]
    fn test_parse_head_partial_then_complete() {
        let raw = b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\nX-A: 1\r\nX-A: 2\r\n\r\nok";
        assert!(parse_response_head(&raw[..20]).unwrap().is_none());

        let (head, consumed) = parse_response_head(raw).unwrap().unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert_eq!(head.headers.get_all("x-a").iter().count(), 2);
        assert_eq!(&raw[consumed..], b"ok");
    }

    #[test]
    fn test_parse_head_rejects_garbage() {
        let err = parse_response_head(b"SMTP ready\r\n\r\n").unwrap_err();
        assert!(matches!(err, HttpError::MalformedResponse(_)));
        assert!(err.is_processing());
    }

    #[test]
    fn test_interim_heads() {
        assert!(head(100, &[]).is_interim());
        assert!(head(103, &[]).is_interim());
        assert!(!head(101, &[]).is_interim());
        assert!(!head(200, &[]).is_interim());
    }

    #[test]
    fn test_framing_rules() {
        let chunked = head(200, &[("Transfer-Encoding", "gzip, chunked"), ("Content-Length", "5")]);
        assert_eq!(framing(&Method::GET, &chunked).unwrap(), Framing::Chunked);
        assert_eq!(framing(&Method::HEAD, &chunked).unwrap(), Framing::Empty);

        assert_eq!(
            framing(&Method::GET, &head(200, &[("Content-Length", "12")])).unwrap(),
            Framing::Length(12)
        );
        assert_eq!(framing(&Method::GET, &head(200, &[])).unwrap(), Framing::UntilEof);
        assert_eq!(
            framing(&Method::GET, &head(204, &[("Content-Length", "3")])).unwrap(),
            Framing::Empty
        );
        assert_eq!(framing(&Method::GET, &head(304, &[])).unwrap(), Framing::Empty);
        assert!(framing(&Method::GET, &head(200, &[("Content-Length", "1"), ("Content-Length", "2")])).is_err());
        assert!(framing(&Method::GET, &head(200, &[("Content-Length", "x")])).is_err());
    }

    #[test]
    fn test_chunked_ignores_extensions_and_trailers() {
        let mut decoder = BodyDecoder::new(Framing::Chunked);
        let body = decode_all(
            &mut decoder,
            b"5;name=value\r\nhello\r\n6\r\n world\r\n0\r\nX-Checksum: abc\r\n\r\n",
        );
        assert_eq!(body, b"hello world");
        assert!(decoder.is_done());
    }

    #[test]
    fn test_chunked_across_splits() {
        let wire = b"3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n";
        for split in 1..wire.len() {
            let mut decoder = BodyDecoder::new(Framing::Chunked);
            let mut buf = BytesMut::new();
            let mut out = Vec::new();
            for part in [&wire[..split], &wire[split..]] {
                buf.extend_from_slice(part);
                while let Decoded::Data(data) = decoder.decode(&mut buf).unwrap() {
                    out.extend_from_slice(&data);
                }
            }
            assert_eq!(out, b"abcde", "split at {split}");
            assert!(decoder.is_done(), "split at {split}");
        }
    }

    #[test]
    fn test_chunked_bad_size() {
        let mut decoder = BodyDecoder::new(Framing::Chunked);
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(HttpError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_length_leaves_extra_bytes() {
        let mut decoder = BodyDecoder::new(Framing::Length(3));
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Decoded::Data(Bytes::from_static(b"abc"))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), Decoded::Done);
        assert_eq!(&buf[..], b"def");
    }

    #[test]
    fn test_eof_handling() {
        let mut until_eof = BodyDecoder::new(Framing::UntilEof);
        assert_eq!(decode_all(&mut until_eof, b"rest"), b"rest");
        assert!(until_eof.finish_at_eof().is_ok());
        assert!(until_eof.is_done());

        let mut short = BodyDecoder::new(Framing::Length(10));
        decode_all(&mut short, b"abc");
        assert!(short.finish_at_eof().unwrap_err().is_processing());
    }
}
