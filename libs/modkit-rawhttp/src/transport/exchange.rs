//! One request/response exchange over a fresh connection.
//!
//! connect → head → (100-continue) → body → response head → body pump

use super::codec::{
    BodyDecoder, Decoded, Framing, LAST_CHUNK, ResponseHead, encode_chunk, encode_head, framing,
    parse_response_head,
};
use super::connect::{Connection, Connector};
use crate::body::{BodyPipeline, BodySource, Demand, RequestBody};
use crate::config::MAX_WRITE_CHUNK;
use crate::error::{HttpError, TimeoutPhase, from_io};
use crate::headers::Headers;
use crate::runtime::{IoScoped, OffloadExecutor, offload};
use bytes::{Buf, Bytes, BytesMut};
use http::header::TRANSFER_ENCODING;
use http::{HeaderMap, Method, StatusCode, Uri};
use std::future::Future;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const READ_CHUNK: usize = 16 * 1024;
const WRITE_QUEUE: usize = 4;

/// A finalized request, ready for the wire.
pub struct WireRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: RequestBody,
    pub expect_continue: bool,
}

/// Per-client exchange settings.
#[derive(Clone)]
pub struct ExchangeSettings {
    pub read_timeout: Duration,
    pub drain_limit: usize,
    pub offload: Arc<dyn OffloadExecutor>,
}

/// Response head plus the live body pipeline.
///
/// Until [`WireResponse::into_parts`] hands the body over, dropping the
/// response aborts the body and closes the connection.
pub struct WireResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Arc<BodyPipeline>,
    owned: bool,
}

impl WireResponse {
    fn new(status: StatusCode, headers: HeaderMap, body: Arc<BodyPipeline>) -> Self {
        Self {
            status,
            headers,
            body,
            owned: true,
        }
    }

    /// Hand status, headers and body to the caller, who now owns the close.
    pub fn into_parts(mut self) -> (StatusCode, HeaderMap, Arc<BodyPipeline>) {
        self.owned = false;
        (
            self.status,
            std::mem::take(&mut self.headers),
            Arc::clone(&self.body),
        )
    }
}

impl Drop for WireResponse {
    fn drop(&mut self) {
        if self.owned {
            tracing::debug!(
                status = self.status.as_u16(),
                "response dropped before delivery; aborting body"
            );
            self.body.abort();
        }
    }
}

/// Run one exchange. Must be polled on the event loop.
///
/// # Errors
///
/// Returns a processing error for connect, TLS, timeout and framing failures,
/// and `HttpError::BodyLengthMismatch` when a stream body does not match its
/// declared length. HTTP error statuses are not errors.
pub async fn exchange(
    connector: Connector,
    request: WireRequest,
    settings: ExchangeSettings,
) -> Result<WireResponse, HttpError> {
    let WireRequest {
        method,
        uri,
        headers,
        body,
        expect_continue,
    } = request;
    let timeout = settings.read_timeout;

    let mut conn = connector.connect(&uri).await?;
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let head = encode_head(&method, target, &headers);
    io_timeout(timeout, conn.write_all(&head)).await?;
    tracing::debug!(method = %method, uri = %uri, "request head sent");

    let chunked = is_chunked(&headers);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    let mut early = None;
    if expect_continue && !body.is_empty() {
        io_timeout(timeout, conn.flush()).await?;
        let interim = read_head(&mut conn, &mut buf, timeout, true).await?;
        if interim.status == StatusCode::CONTINUE {
            tracing::debug!("server accepted body (100 Continue)");
        } else {
            tracing::debug!(status = interim.status.as_u16(), "server answered before the body was sent");
            early = Some(interim);
        }
    }

    let head = match early {
        Some(head) => {
            drop(body);
            head
        }
        None => {
            let written = write_body(&mut conn, body, chunked, &settings).await?;
            io_timeout(timeout, conn.flush()).await?;
            tracing::trace!(bytes = written, chunked, "request body sent");
            read_head(&mut conn, &mut buf, timeout, false).await?
        }
    };

    let framing = framing(&method, &head)?;
    tracing::debug!(status = head.status.as_u16(), ?framing, "response head received");

    let pipeline = if framing == Framing::Empty {
        BodyPipeline::empty()
    } else {
        let pipeline = BodyPipeline::new(settings.drain_limit);
        let pump = pump(
            conn,
            buf,
            BodyDecoder::new(framing),
            Arc::clone(&pipeline),
            timeout,
        );
        drop(tokio::spawn(IoScoped::new(pump.in_current_span())));
        pipeline
    };

    Ok(WireResponse::new(head.status, head.headers, pipeline))
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_all(TRANSFER_ENCODING.as_str())
        .iter()
        .any(|v| v.split(',').any(|coding| coding.trim().eq_ignore_ascii_case("chunked")))
}

async fn io_timeout<T>(
    duration: Duration,
    io: impl Future<Output = std::io::Result<T>>,
) -> Result<T, HttpError> {
    match tokio::time::timeout(duration, io).await {
        Err(_) => Err(HttpError::Timeout {
            phase: TimeoutPhase::Read,
            duration,
        }),
        Ok(result) => result.map_err(|e| HttpError::Transport(Box::new(e))),
    }
}

/// Read the next response head, skipping interim `1xx` heads.
///
/// With `stop_at_continue` a `100 Continue` head is returned instead of skipped.
async fn read_head(
    conn: &mut Connection,
    buf: &mut BytesMut,
    timeout: Duration,
    stop_at_continue: bool,
) -> Result<ResponseHead, HttpError> {
    loop {
        if let Some((head, used)) = parse_response_head(buf)? {
            buf.advance(used);
            if stop_at_continue && head.status == StatusCode::CONTINUE {
                return Ok(head);
            }
            if head.is_interim() {
                tracing::trace!(status = head.status.as_u16(), "skipping interim response");
                continue;
            }
            return Ok(head);
        }

        buf.reserve(READ_CHUNK);
        if io_timeout(timeout, conn.read_buf(buf)).await? == 0 {
            return Err(HttpError::Transport(
                "connection closed before the response head".into(),
            ));
        }
    }
}

async fn write_body(
    conn: &mut Connection,
    body: RequestBody,
    chunked: bool,
    settings: &ExchangeSettings,
) -> Result<u64, HttpError> {
    let timeout = settings.read_timeout;
    match body {
        RequestBody::Empty => {
            if chunked {
                io_timeout(timeout, conn.write_all(LAST_CHUNK)).await?;
            }
            Ok(0)
        }
        RequestBody::Full(bytes) => {
            if chunked {
                io_timeout(timeout, conn.write_all(&encode_chunk(&bytes))).await?;
                io_timeout(timeout, conn.write_all(LAST_CHUNK)).await?;
            } else {
                io_timeout(timeout, conn.write_all(&bytes)).await?;
            }
            Ok(bytes.len() as u64)
        }
        RequestBody::Stream { reader, length } => {
            write_stream(conn, reader, length, chunked, settings).await
        }
    }
}

/// Stream a blocking source: reads happen on the offload executor and reach
/// the socket through a bounded channel.
async fn write_stream(
    conn: &mut Connection,
    reader: BodySource,
    length: Option<u64>,
    chunked: bool,
    settings: &ExchangeSettings,
) -> Result<u64, HttpError> {
    let timeout = settings.read_timeout;
    let (tx, mut rx) = mpsc::channel::<Bytes>(WRITE_QUEUE);
    let producer = offload(settings.offload.as_ref(), move || read_source(reader, &tx));

    let out = &mut *conn;
    let writer = async move {
        let mut written = 0u64;
        while let Some(chunk) = rx.recv().await {
            written += chunk.len() as u64;
            if let Some(expected) = length
                && written > expected
            {
                return Err(HttpError::BodyLengthMismatch {
                    expected,
                    actual: written,
                });
            }
            if chunked {
                io_timeout(timeout, out.write_all(&encode_chunk(&chunk))).await?;
            } else {
                io_timeout(timeout, out.write_all(&chunk)).await?;
            }
        }
        Ok(written)
    };

    let (produced, written) = tokio::join!(producer, writer);
    let written = written?;
    let produced = produced??;

    if let Some(expected) = length
        && expected != produced
    {
        return Err(HttpError::BodyLengthMismatch {
            expected,
            actual: produced,
        });
    }
    if chunked {
        io_timeout(timeout, conn.write_all(LAST_CHUNK)).await?;
    }
    Ok(written)
}

fn read_source(mut reader: BodySource, tx: &mpsc::Sender<Bytes>) -> Result<u64, HttpError> {
    let mut total = 0u64;
    loop {
        let mut chunk = vec![0u8; MAX_WRITE_CHUNK];
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(from_io(e)),
        };
        chunk.truncate(n);
        total += n as u64;
        if tx.blocking_send(Bytes::from(chunk)).is_err() {
            // Writer stopped; its error is reported instead
            return Ok(total);
        }
    }
}

struct DetachOnDrop(Arc<BodyPipeline>);

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        self.0.detach();
    }
}

enum PumpEnd {
    Complete,
    Stopped,
}

async fn pump(
    conn: Connection,
    buf: BytesMut,
    decoder: BodyDecoder,
    pipeline: Arc<BodyPipeline>,
    timeout: Duration,
) {
    let _detach = DetachOnDrop(Arc::clone(&pipeline));
    let cancel = pipeline.cancellation();
    match pump_body(conn, buf, decoder, &pipeline, &cancel, timeout).await {
        Ok(PumpEnd::Complete) => {
            tracing::trace!("response body complete");
            pipeline.finish();
        }
        Ok(PumpEnd::Stopped) => tracing::trace!("body pump stopped; closing connection"),
        Err(err) => {
            tracing::debug!(error = %err, "response body failed");
            pipeline.fail(err);
        }
    }
}

async fn pump_body(
    mut conn: Connection,
    mut buf: BytesMut,
    mut decoder: BodyDecoder,
    pipeline: &BodyPipeline,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<PumpEnd, HttpError> {
    loop {
        loop {
            match decoder.decode(&mut buf)? {
                Decoded::Data(chunk) => match pipeline.push(chunk) {
                    Demand::Read => {}
                    Demand::Stop => return Ok(PumpEnd::Stopped),
                    Demand::Wait => {
                        let demand = tokio::select! {
                            () = cancel.cancelled() => Demand::Stop,
                            demand = pipeline.wait_for_demand() => demand,
                        };
                        if demand == Demand::Stop {
                            return Ok(PumpEnd::Stopped);
                        }
                    }
                },
                Decoded::Done => return Ok(PumpEnd::Complete),
                Decoded::NeedMore => break,
            }
        }

        buf.reserve(READ_CHUNK);
        let read = tokio::select! {
            () = cancel.cancelled() => return Ok(PumpEnd::Stopped),
            read = io_timeout(timeout, conn.read_buf(&mut buf)) => read?,
        };
        if read == 0 {
            decoder.finish_at_eof()?;
            return Ok(PumpEnd::Complete);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{TlsRootConfig, TransportSecurity};
    use crate::tls::{TlsSource, build_https_connector};
    use std::io::Cursor;
    use tokio::io::AsyncRead;
    use tokio::net::TcpListener;

    fn connector() -> Connector {
        let timeout = Duration::from_secs(5);
        let https = build_https_connector(
            TlsSource::Roots(TlsRootConfig::WebPki),
            TransportSecurity::AllowInsecureHttp,
            Connector::tcp(timeout),
        )
        .unwrap();
        Connector::new(https, None, timeout, TransportSecurity::AllowInsecureHttp)
    }

    fn settings(read_timeout: Duration) -> ExchangeSettings {
        ExchangeSettings {
            read_timeout,
            drain_limit: 64 * 1024,
            offload: Arc::new(tokio::runtime::Handle::current()),
        }
    }

    fn request(port: u16, method: Method, headers: &[(&str, &str)], body: RequestBody) -> WireRequest {
        let mut map = Headers::new();
        map.append("Host", &format!("127.0.0.1:{port}")).unwrap();
        let mut expect_continue = false;
        for (name, value) in headers {
            expect_continue |= name.eq_ignore_ascii_case("expect") && value.eq_ignore_ascii_case("100-continue");
            map.append(name, value).unwrap();
        }
        WireRequest {
            method,
            uri: format!("http://127.0.0.1:{port}/items?x=1").parse().unwrap(),
            headers: map,
            body,
            expect_continue,
        }
    }

    async fn listen() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn read_until<R: AsyncRead + Unpin>(stream: &mut R, seen: &mut Vec<u8>, marker: &[u8]) {
        let mut byte = [0u8; 1];
        while !seen.windows(marker.len()).any(|w| w == marker) {
            if stream.read(&mut byte).await.unwrap() == 0 {
                return;
            }
            seen.push(byte[0]);
        }
    }

    async fn collect(pipeline: &Arc<BodyPipeline>) -> Bytes {
        pipeline.as_buffer().unwrap().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_simple_exchange() {
        let (listener, port) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            read_until(&mut stream, &mut head, b"\r\n\r\n").await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Id: 7\r\n\r\nhello")
                .await
                .unwrap();
            String::from_utf8(head).unwrap()
        });

        let response = exchange(
            connector(),
            request(port, Method::GET, &[("Content-Length", "0")], RequestBody::Empty),
            settings(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers["x-id"], "7");
        assert_eq!(&collect(&response.body).await[..], b"hello");

        let head = server.await.unwrap();
        assert!(head.starts_with(&format!("GET /items?x=1 HTTP/1.1\r\nhost: 127.0.0.1:{port}\r\n")));
    }

    #[tokio::test]
    async fn test_stream_body_is_chunk_encoded() {
        let (listener, port) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            read_until(&mut stream, &mut seen, b"\r\n\r\n").await;
            let head_len = seen.len();
            read_until(&mut stream, &mut seen, b"0\r\n\r\n").await;
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                .await
                .unwrap();
            seen.split_off(head_len)
        });

        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 200) as u8).collect();
        let body = RequestBody::Stream {
            reader: Box::new(Cursor::new(payload.clone())),
            length: None,
        };
        let response = exchange(
            connector(),
            request(port, Method::POST, &[("Transfer-Encoding", "chunked")], body),
            settings(Duration::from_secs(5)),
        )
        .await
        .unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);

        let wire = server.await.unwrap();
        let mut decoder = BodyDecoder::new(Framing::Chunked);
        let mut buf = BytesMut::from(&wire[..]);
        let mut decoded = Vec::new();
        while let Decoded::Data(data) = decoder.decode(&mut buf).unwrap() {
            decoded.extend_from_slice(&data);
        }
        assert!(decoder.is_done());
        assert_eq!(decoded, payload);
    }

    struct PanicsOnRead;

    impl Read for PanicsOnRead {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            panic!("body must not be read");
        }
    }

    #[tokio::test]
    async fn test_expect_continue_rejected_body_is_never_read() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            read_until(&mut stream, &mut head, b"\r\n\r\n").await;
            stream
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\n\r\nnope")
                .await
                .unwrap();
        });

        let body = RequestBody::Stream {
            reader: Box::new(PanicsOnRead),
            length: Some(10),
        };
        let response = exchange(
            connector(),
            request(
                port,
                Method::PUT,
                &[("Expect", "100-continue"), ("Content-Length", "10")],
                body,
            ),
            settings(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&collect(&response.body).await[..], b"nope");
    }

    #[tokio::test]
    async fn test_expect_continue_sends_body_after_100() {
        let (listener, port) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            read_until(&mut stream, &mut seen, b"\r\n\r\n").await;
            let head_len = seen.len();
            stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.unwrap();
            let mut body = vec![0u8; 7];
            stream.read_exact(&mut body).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            (head_len, body)
        });

        let response = exchange(
            connector(),
            request(
                port,
                Method::PUT,
                &[("Expect", "100-continue"), ("Content-Length", "7")],
                RequestBody::Full(Bytes::from_static(b"payload")),
            ),
            settings(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        let (_, body) = server.await.unwrap();
        assert_eq!(body, b"payload");
    }

    #[tokio::test]
    async fn test_interim_heads_are_skipped() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            read_until(&mut stream, &mut head, b"\r\n\r\n").await;
            stream
                .write_all(
                    b"HTTP/1.1 103 Early Hints\r\nLink: </a.css>\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
                )
                .await
                .unwrap();
        });

        let response = exchange(
            connector(),
            request(port, Method::GET, &[], RequestBody::Empty),
            settings(Duration::from_secs(5)),
        )
        .await
        .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&collect(&response.body).await[..], b"ok");
    }

    #[tokio::test]
    async fn test_read_timeout_is_processing_error() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let err = exchange(
            connector(),
            request(port, Method::GET, &[], RequestBody::Empty),
            settings(Duration::from_millis(100)),
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(
            err,
            HttpError::Timeout {
                phase: TimeoutPhase::Read,
                ..
            }
        ));
        assert!(err.is_processing());
    }

    #[tokio::test]
    async fn test_declared_length_mismatch() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let body = RequestBody::Stream {
            reader: Box::new(Cursor::new(b"short".to_vec())),
            length: Some(9),
        };
        let err = exchange(
            connector(),
            request(port, Method::POST, &[("Content-Length", "9")], body),
            settings(Duration::from_secs(5)),
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(
            err,
            HttpError::BodyLengthMismatch {
                expected: 9,
                actual: 5
            }
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_fails_consumer() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            read_until(&mut stream, &mut head, b"\r\n\r\n").await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                .await
                .unwrap();
        });

        let response = exchange(
            connector(),
            request(port, Method::GET, &[], RequestBody::Empty),
            settings(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        let err = response.body.as_buffer().unwrap().await.unwrap().unwrap_err();
        assert!(err.is_processing());
    }

    #[tokio::test]
    async fn test_cancel_stops_pump_waiting_on_server() {
        let (listener, port) = listen().await;
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            read_until(&mut stream, &mut head, b"\r\n\r\n").await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n")
                .await
                .unwrap();
            // Wait until the client hangs up
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
            let _ = closed_tx.send(());
        });

        let response = exchange(
            connector(),
            request(port, Method::GET, &[], RequestBody::Empty),
            settings(Duration::from_secs(30)),
        )
        .await
        .unwrap();

        let mut reader = response.body.as_stream().unwrap();
        assert_eq!(&reader.next_chunk().await.unwrap().unwrap()[..], b"abc");
        reader.close();

        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_undelivered_response_closes_connection() {
        let (listener, port) = listen().await;
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            read_until(&mut stream, &mut head, b"\r\n\r\n").await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\n\r\n")
                .await
                .unwrap();
            stream.write_all(&[b'z'; 8192]).await.unwrap();
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
            let _ = closed_tx.send(());
        });

        let response = exchange(
            connector(),
            request(port, Method::GET, &[], RequestBody::Empty),
            settings(Duration::from_secs(30)),
        )
        .await
        .unwrap();
        let body = Arc::clone(&response.body);
        drop(response);

        assert_eq!(body.decision_name(), "discard");
        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_delivered_response_keeps_body() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            read_until(&mut stream, &mut head, b"\r\n\r\n").await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\ndone")
                .await
                .unwrap();
        });

        let response = exchange(
            connector(),
            request(port, Method::GET, &[], RequestBody::Empty),
            settings(Duration::from_secs(5)),
        )
        .await
        .unwrap();
        let (status, _, body) = response.into_parts();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.decision_name(), "undecided");
        assert_eq!(&collect(&body).await[..], b"done");
    }
}
