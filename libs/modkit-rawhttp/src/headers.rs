//! Case-insensitive multi-value header map.
//!
//! [`Headers`] adapts [`http::HeaderMap`], which already stores names in
//! lowercase and keeps every value of a repeated header, to the string-oriented
//! view request and response callers work with.

use crate::error::HttpError;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;

/// Multi-value header collection with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: HeaderMap,
}

impl Headers {
    /// Create an empty header collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping values already present under the same name.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::InvalidHeaderName` or `HttpError::InvalidHeaderValue`
    /// when the name or value is not valid for HTTP/1.1.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.inner.append(name, value);
        Ok(())
    }

    /// Set a header, replacing every existing value
    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.insert(name, value);
    }

    /// First value for `name`, if present and valid UTF-8
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values for `name` in insertion order
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.inner
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Whether at least one value is present for `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Distinct header names (lowercase)
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(HeaderName::as_str)
    }

    /// Iterate over every `(name, value)` pair; repeated headers yield one pair per value
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
    }

    /// Number of distinct header names
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.keys_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove every value for `name`
    pub fn remove(&mut self, name: &str) {
        self.inner.remove(name);
    }

    /// Copy into an ordered `name -> values` map
    #[must_use]
    pub fn to_multimap(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in self.iter() {
            map.entry(name.to_owned())
                .or_default()
                .push(value.to_owned());
        }
        map
    }

    /// Borrow the underlying `http::HeaderMap`
    #[must_use]
    pub fn as_header_map(&self) -> &HeaderMap {
        &self.inner
    }
}

impl From<HeaderMap> for Headers {
    fn from(inner: HeaderMap) -> Self {
        Self { inner }
    }
}
