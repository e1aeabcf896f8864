use std::fmt;

use crate::error::DataError;

/// Joins namespace and key in the composed form.
pub const SEPARATOR: char = ':';

pub const MAX_NAMESPACE_LEN: usize = 50;
pub const MAX_KEY_LEN: usize = 100;

/// A namespaced cache key. Identity is the composed `namespace:key` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    composed: String,
    split: usize,
}

impl CacheKey {
    pub fn new(namespace: &str, key: &str) -> Result<Self, DataError> {
        validate_part("namespace", namespace, MAX_NAMESPACE_LEN)?;
        validate_part("key", key, MAX_KEY_LEN)?;
        Ok(Self {
            composed: format!("{}{}{}", namespace, SEPARATOR, key),
            split: namespace.len(),
        })
    }

    /// Parse a composed `namespace:key` string.
    pub fn parse(composed: &str) -> Result<Self, DataError> {
        let (namespace, key) = composed.split_once(SEPARATOR).ok_or_else(|| {
            DataError::Configuration(format!("cache key {:?} has no namespace", composed))
        })?;
        Self::new(namespace, key)
    }

    pub fn namespace(&self) -> &str {
        &self.composed[..self.split]
    }

    pub fn key(&self) -> &str {
        &self.composed[self.split + SEPARATOR.len_utf8()..]
    }

    pub fn as_str(&self) -> &str {
        &self.composed
    }
}

fn validate_part(what: &str, value: &str, max_len: usize) -> Result<(), DataError> {
    if value.is_empty() {
        return Err(DataError::Configuration(format!("cache {} is empty", what)));
    }
    if value.chars().count() > max_len {
        return Err(DataError::Configuration(format!(
            "cache {} {:?} exceeds {} characters",
            what, value, max_len
        )));
    }
    if value.contains(SEPARATOR) {
        return Err(DataError::Configuration(format!(
            "cache {} {:?} contains reserved separator '{}'",
            what, value, SEPARATOR
        )));
    }
    Ok(())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composed)
    }
}
