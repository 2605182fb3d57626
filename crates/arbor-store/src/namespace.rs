//! Namespace prefix registry

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix to URI bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRegistry {
    bindings: BTreeMap<String, String>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert(String::new(), String::new());
        bindings.insert("nt".to_string(), "http://www.arbor.dev/nt/1.0".to_string());
        bindings.insert("mix".to_string(), "http://www.arbor.dev/mix/1.0".to_string());
        Self { bindings }
    }
}

impl NamespaceRegistry {
    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }

    pub fn prefix(&self, uri: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, u)| u.as_str() == uri)
            .map(|(p, _)| p.as_str())
    }

    /// Bind a prefix to a URI
    ///
    /// Re-registering an identical binding succeeds. Remapping a prefix or
    /// binding a URI under a second prefix is a conflict.
    pub fn register(&mut self, prefix: &str, uri: &str) -> StoreResult<()> {
        if prefix.is_empty() || prefix.contains(|c: char| c == ':' || c == '/' || c.is_whitespace()) {
            return Err(StoreError::invalid_path(prefix, "invalid namespace prefix"));
        }
        if let Some(existing) = self.uri(prefix) {
            if existing == uri {
                return Ok(());
            }
            return Err(StoreError::namespace_conflict(format!(
                "prefix '{}' is already bound to '{}'",
                prefix, existing
            )));
        }
        if let Some(other) = self.prefix(uri) {
            return Err(StoreError::namespace_conflict(format!(
                "URI '{}' is already bound to prefix '{}'",
                uri, other
            )));
        }
        self.bindings.insert(prefix.to_string(), uri.to_string());
        Ok(())
    }

    /// Check that a qualified name uses a registered prefix
    pub fn check_name(&self, name: &str) -> StoreResult<()> {
        if let Some((prefix, local)) = name.split_once(':') {
            if local.is_empty() {
                return Err(StoreError::invalid_path(name, "empty local name"));
            }
            if !self.bindings.contains_key(prefix) {
                return Err(StoreError::UnknownPrefix {
                    prefix: prefix.to_string(),
                });
            }
        }
        Ok(())
    }
}
