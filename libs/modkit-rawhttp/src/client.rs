use crate::builder::HttpClientBuilder;
use crate::filter::FilterChain;
use crate::request::{HttpRequest, Method};
use crate::runtime::EventLoop;
use crate::serializer::Serializer;
use crate::transport::{Connector, ExchangeSettings};
use std::sync::Arc;

/// State shared by a client and every request it creates.
pub struct ClientShared {
    pub base_uri: String,
    pub connector: Connector,
    pub settings: ExchangeSettings,
    pub event_loop: Arc<EventLoop>,
    pub chain: FilterChain,
    pub serializer: Arc<dyn Serializer>,
    pub buffered: bool,
}

/// HTTP/1.1 client bound to one base URI.
///
/// Every request opens its own connection; nothing is pooled. Connection I/O
/// runs on the client's [`EventLoop`], so requests can be executed and their
/// bodies read from any runtime or plain thread.
///
/// Use [`HttpClientBuilder`] to construct instances.
///
/// # Thread Safety
///
/// `HttpClient` is `Clone + Send + Sync`. Cloning is cheap (an `Arc` clone) and
/// clones share the event loop, interceptors and filters.
///
/// # Example
///
/// ```ignore
/// let client = HttpClient::builder()
///     .base_uri("https://objectstorage.example.com/n/ns")
///     .read_timeout(Duration::from_secs(60))
///     .build()?;
///
/// let mut request = client.create_request(Method::Get);
/// request.append_path_part("b").query("limit", "100");
///
/// let buckets: Vec<Bucket> = request.execute().await?.list_body().await?;
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) shared: Arc<ClientShared>,
}

impl HttpClient {
    /// Create a builder for configuring the client
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Start a request at the base URI
    pub fn create_request(&self, method: Method) -> HttpRequest {
        HttpRequest::new(Arc::clone(&self.shared), method)
    }

    #[must_use]
    pub fn base_uri(&self) -> &str {
        &self.shared.base_uri
    }

    /// Event loop driving this client's connections
    #[must_use]
    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.shared.event_loop
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_uri", &self.shared.base_uri)
            .field("buffered", &self.shared.buffered)
            .field("read_timeout", &self.shared.settings.read_timeout)
            .field("chain", &self.shared.chain)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::HttpClientConfig;
    use crate::error::HttpError;
    use httpmock::MockServer;
    use tokio::runtime::Handle;

    fn client_for(server: &MockServer) -> HttpClient {
        HttpClientBuilder::with_config(HttpClientConfig::for_testing())
            .base_uri(server.base_url())
            .event_loop(Arc::new(EventLoop::with_handle(Handle::current())))
            .build()
            .unwrap()
    }

    #[test]
    fn test_client_is_send_sync_clone() {
        fn assert_traits<T: Clone + Send + Sync>() {}
        assert_traits::<HttpClient>();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_returns_status_and_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/n/ns/b");
            then.status(200).header("x-request-id", "abc").body("hello");
        });

        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing())
            .base_uri(format!("{}/n/ns", server.base_url()))
            .event_loop(Arc::new(EventLoop::with_handle(Handle::current())))
            .build()
            .unwrap();
        let mut request = client.create_request(Method::Get);
        request.append_path_part("b");
        let response = request.execute().await.unwrap();

        mock.assert();
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.headers().get("X-Request-Id"), Some("abc"));
        assert_eq!(response.text_body().await.unwrap(), "hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_error_status_is_not_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::DELETE).path("/gone");
            then.status(404).body(r#"{"code":"NotFound"}"#);
        });

        let client = client_for(&server);
        let mut request = client.create_request(Method::Delete);
        request.append_path_part("gone");
        let response = request.execute().await.unwrap();

        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
        let body: Option<serde_json::Value> = response.body().await.unwrap();
        assert_eq!(body.unwrap()["code"], "NotFound");
    }

    #[tokio::test(flavor = "multi_thread")]
    #[tracing_test::traced_test]
    async fn test_exchange_is_logged() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/health");
            then.status(200);
        });

        let client = client_for(&server);
        let mut request = client.create_request(Method::Get);
        request.append_path_part("health");
        request.execute().await.unwrap();

        assert!(logs_contain("request head sent"));
        assert!(logs_contain("response head received"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clones_share_event_loop() {
        let server = MockServer::start();
        let client = client_for(&server);
        let clone = client.clone();
        assert!(Arc::ptr_eq(client.event_loop(), clone.event_loop()));
        assert_eq!(clone.base_uri(), server.base_url());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connection_refused_is_processing() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing())
            .base_uri(format!("http://127.0.0.1:{port}"))
            .build()
            .unwrap();
        let err = client
            .create_request(Method::Get)
            .execute()
            .await
            .unwrap_err();
        assert!(err.is_processing(), "unexpected error: {err:?}");
        assert!(!matches!(err, HttpError::Cancelled));
    }
}
