//! Pluggable body serialization.
//!
//! The transport never looks inside bodies. Typed bodies go through a
//! [`Serializer`] that works on the `serde_json::Value` data model, so any
//! serde-compatible wire format can be plugged in without the request and
//! response types becoming generic over it.

use crate::error::{BoxError, HttpError};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes and decodes structured bodies.
pub trait Serializer: Send + Sync + 'static {
    /// Encode a value into body bytes.
    ///
    /// # Errors
    ///
    /// Returns the encoder's error unchanged; the caller classifies it.
    fn write_value(&self, value: &serde_json::Value) -> Result<Vec<u8>, BoxError>;

    /// Decode body bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns the decoder's error unchanged; the caller classifies it.
    fn read_value(&self, bytes: &[u8]) -> Result<serde_json::Value, BoxError>;
}

/// Default serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn write_value(&self, value: &serde_json::Value) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn read_value(&self, bytes: &[u8]) -> Result<serde_json::Value, BoxError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serialize a request body object.
///
/// # Errors
///
/// Failures are argument errors (`HttpError::InvalidArgument`), never transport errors.
pub fn encode<T: Serialize + ?Sized>(
    serializer: &dyn Serializer,
    value: &T,
) -> Result<Vec<u8>, HttpError> {
    let value = serde_json::to_value(value)
        .map_err(|e| HttpError::invalid_argument("request body is not serializable", e))?;
    serializer
        .write_value(&value)
        .map_err(|e| HttpError::invalid_argument("request body serialization failed", e))
}

/// Decode a response body; a zero-length body yields `None`.
///
/// # Errors
///
/// Returns `HttpError::Deserialization` when the bytes do not describe a `T`.
pub fn decode<T: DeserializeOwned>(
    serializer: &dyn Serializer,
    bytes: &[u8],
) -> Result<Option<T>, HttpError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let value = serializer
        .read_value(bytes)
        .map_err(HttpError::Deserialization)?;
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| HttpError::Deserialization(Box::new(e)))
}
