//! TLS setup for HTTPS connections.
//!
//! Native root certificates are loaded from the OS store once per process and
//! cached, since the lookup is slow on some platforms. Connections negotiate
//! HTTP/1.1 only.

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// Always stores Ok; an empty vec means no certs were found (warned, not errored).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }
    result.certs
}

/// Cached native root certificates (possibly empty).
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE.get_or_init(load_native_certs).as_slice()
}

/// Crypto provider for TLS connections.
///
/// Uses the process default when one is installed, otherwise an aws-lc-rs
/// provider that is not installed globally.
pub fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Build a rustls `ClientConfig` trusting the cached native roots.
///
/// # Errors
///
/// Returns `HttpError::Tls` if the OS store is empty or none of its
/// certificates parse, so misconfiguration shows up when the client is built
/// rather than at the first handshake.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(HttpError::Tls(
            "no native root CA certificates found in OS certificate store".into(),
        ));
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(HttpError::Tls(
            format!(
                "no valid native root CA certificates parsed (found {}, all failed to parse)",
                certs.len()
            )
            .into(),
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(config)
}

/// Where the TLS configuration of a connector comes from.
pub enum TlsSource {
    Roots(TlsRootConfig),
    Custom(rustls::ClientConfig),
}

/// Build the TCP/TLS connector used for every non-socket connection.
///
/// # Errors
///
/// Returns `HttpError::Tls` if the requested roots cannot be loaded.
pub fn build_https_connector(
    source: TlsSource,
    transport: TransportSecurity,
    http: HttpConnector,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = match source {
        TlsSource::Roots(TlsRootConfig::WebPki) => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(get_crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsSource::Roots(TlsRootConfig::Native) => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(native_roots_client_config()?)
        }
        TlsSource::Custom(config) => hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(config),
    };

    let connector = match transport {
        TransportSecurity::AllowInsecureHttp => builder.https_or_http().enable_http1().wrap_connector(http),
        TransportSecurity::TlsOnly => builder.https_only().enable_http1().wrap_connector(http),
    };
    Ok(connector)
}
