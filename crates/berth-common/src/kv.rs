//! Key/value configuration-source contract.
//!
//! Appliance configuration reaches the network subsystem as a flat map of
//! string keys to string values. Inside a virtual machine that map is
//! backed by the hypervisor's guest-to-host channel; a source backed by
//! anything else (a file, a test fixture) satisfies the same contract.

use std::collections::HashMap;

use crate::error::{BerthError, BerthResult};

/// A read-only source of string configuration values.
///
/// Implementations that depend on a virtualized context return
/// [`BerthError::NotVirtualized`] from every call when that context is
/// absent, rather than failing at construction.
pub trait DataSource: Send + Sync {
    /// Look up the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::ResourceNotFound`] if the key has no value,
    /// or [`BerthError::NotVirtualized`] if the backing channel is
    /// unavailable.
    fn get(&self, key: &str) -> BerthResult<String>;
}

/// An in-memory [`DataSource`] backed by a `HashMap`.
#[derive(Debug, Default, Clone)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key to a value, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl<K, V> FromIterator<(K, V)> for MapSource
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl DataSource for MapSource {
    fn get(&self, key: &str) -> BerthResult<String> {
        let value = self
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| BerthError::ResourceNotFound {
                id: key.to_string(),
            });

        tracing::trace!(key, ok = value.is_ok(), "Config lookup");
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_source_lookup() {
        let src: MapSource = [("network/bridge", "vic-bridge")].into_iter().collect();
        assert_eq!(src.get("network/bridge").unwrap(), "vic-bridge");
        assert!(matches!(
            src.get("network/missing"),
            Err(BerthError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn set_replaces_value() {
        let mut src = MapSource::new();
        src.set("key", "old");
        src.set("key", "new");
        assert_eq!(src.get("key").unwrap(), "new");
    }
}
