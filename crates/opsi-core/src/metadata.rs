//! Flat package metadata
//!
//! Control files are parsed into a single map whose keys are prefixed with
//! their section, so `[Product] Version` and `[Package] Version` end up as
//! `product_version` and `package_version`. Command-line overrides use the
//! same map type.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{CoreError, Result};

/// Key holding the product id, first part of the package filename
pub const PRODUCT_ID: &str = "product_id";

/// Key holding the product version
pub const PRODUCT_VERSION: &str = "product_version";

/// Key holding the package version
pub const PACKAGE_VERSION: &str = "package_version";

/// Extension of the final package file
pub const PACKAGE_EXTENSION: &str = "opsi";

/// Key value metadata, keys unique, sorted for stable output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the value it replaced
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Get a value that must be present and non-empty
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(CoreError::MissingMetadata {
                key: key.to_string(),
            }),
        }
    }

    /// Filename of the final package: `<product_id>_<product_version>-<package_version>.opsi`
    pub fn package_filename(&self) -> Result<String> {
        Ok(format!(
            "{}_{}-{}.{}",
            self.require(PRODUCT_ID)?,
            self.require(PRODUCT_VERSION)?,
            self.require(PACKAGE_VERSION)?,
            PACKAGE_EXTENSION
        ))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Parse `key=value` arguments into override metadata
///
/// Keys are trimmed and lowercased, values trimmed. An argument that does
/// not split into exactly two parts on `=` is rejected.
pub fn parse_overrides(args: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();

    for arg in args {
        let mut parts = arg.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(CoreError::InvalidOverride { arg: arg.clone() });
        };

        metadata.insert(key.trim().to_ascii_lowercase(), value.trim());
    }

    Ok(metadata)
}
